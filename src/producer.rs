//! Client that sends messages to Rafka.

use async_trait::async_trait;
use tracing::instrument;

use crate::{
    encode,
    error::{Error, Result},
    network::{GenericCommands, ManagedConnection, Reply, Transport},
    retry::RetryPolicy,
};

/// Rafka producer that can produce to any topic.
///
/// Producing is asynchronous on the server side: a successful
/// [`produce`](Self::produce) means the server accepted the message, not that
/// it was written to Kafka. Use [`flush`](Self::flush) to wait for buffered
/// messages.
///
/// ### Example
/// ```no_run
/// # async fn example() -> rafka::prelude::Result<()> {
/// use rafka::prelude::{BrokerAddress, ProducerBuilder, RedisConnection};
///
/// let mut producer = ProducerBuilder::<RedisConnection>::new(BrokerAddress::default())
///     .build()
///     .await?;
///
/// producer.produce("greetings", "Hello there!", None).await?;
/// // both end up in the same partition
/// producer.produce("greetings", "Aloha", Some("abc")).await?;
/// producer.produce("greetings", "Hola", Some("abc")).await?;
///
/// let unflushed = producer.flush(rafka::prelude::DEFAULT_FLUSH_TIMEOUT_MS).await?;
/// assert_eq!(unflushed, 0);
/// # Ok(())
/// # }
/// ```
pub struct Producer<T: Transport> {
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) conn: ManagedConnection<T>,
}

impl<T: Transport> Producer<T> {
    /// Produce a message to `topic`.
    ///
    /// Messages sharing the same `key` are always written to the same
    /// partition.
    #[instrument(level = "debug", skip(self, value))]
    pub async fn produce(
        &mut self,
        topic: &str,
        value: impl AsRef<[u8]>,
        key: Option<&str>,
    ) -> Result<i64> {
        let produce_key = encode::produce_key(topic, key);
        let value = value.as_ref();

        self.retry_policy
            .run(&mut self.conn, |conn| {
                let produce_key = produce_key.clone();
                let value = value.to_vec();
                Box::pin(async move { conn.push_if_exists(&produce_key, &value).await })
            })
            .await
    }

    /// Flush buffered messages, waiting at most `timeout_ms`.
    ///
    /// Returns the number of messages that could not be flushed in time.
    #[instrument(level = "debug", skip(self))]
    pub async fn flush(&mut self, timeout_ms: u64) -> Result<u64> {
        let reply = self.conn.flush_pending(timeout_ms).await?;
        let unflushed = match &reply {
            Reply::Int(n) => u64::try_from(*n).ok(),
            other => other.as_str().and_then(|text| text.parse::<u64>().ok()),
        };

        unflushed.ok_or_else(|| {
            tracing::error!("Unexpected reply to flush {:?}", reply);
            Error::CommandError(format!("unexpected flush reply {reply:?}"))
        })
    }
}

#[async_trait]
impl<T: Transport> GenericCommands for Producer<T> {
    async fn ping(&mut self) -> Result<String> {
        self.conn.ping().await
    }

    async fn close(&mut self) -> Result<()> {
        tracing::info!("Closing producer");
        self.conn.close().await
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use bytes::Bytes;

    use super::*;
    use crate::{
        network::{
            mock::{MockCall, MockTransport},
            TransportError,
        },
        producer_builder::ProducerBuilder,
        retry::test::RecordingSleeper,
        DEFAULT_FLUSH_TIMEOUT_MS,
    };

    async fn producer(mock: &MockTransport) -> (Producer<MockTransport>, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let producer = ProducerBuilder::<MockTransport>::new(mock.clone())
            .retry_policy(RetryPolicy::new(2, Duration::from_secs(2)).sleeper(sleeper.clone()))
            .build()
            .await
            .unwrap();
        (producer, sleeper)
    }

    #[tokio::test]
    async fn it_produces_to_the_topic_key() {
        let mock = MockTransport::new();
        let (mut producer, _) = producer(&mock).await;

        producer.produce("greetings", "Hi!", None).await.unwrap();
        producer
            .produce("greetings", b"Aloha".to_vec(), Some("abc"))
            .await
            .unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                MockCall::PushIfExists {
                    key: "topics:greetings".to_owned(),
                    value: Bytes::from_static(b"Hi!"),
                },
                MockCall::PushIfExists {
                    key: "topics:greetings:abc".to_owned(),
                    value: Bytes::from_static(b"Aloha"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn it_classifies_produce_errors() {
        let mock = MockTransport::new()
            .with_produce_error(TransportError::Server("PROD queue full".to_owned()));
        let (mut producer, sleeper) = producer(&mock).await;

        match producer.produce("greetings", "Hi!", None).await {
            Err(Error::ProduceError(msg)) => assert_eq!(msg, "queue full"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sleeper.count(), 0);
    }

    #[tokio::test]
    async fn it_retries_while_the_server_shuts_down() {
        let mock = MockTransport::new()
            .with_produce_error(TransportError::Server(
                "PROD server is shutting down".to_owned(),
            ))
            .with_produce_error(TransportError::Connection("reset by peer".to_owned()));
        let (mut producer, sleeper) = producer(&mock).await;

        producer.produce("greetings", "Hi!", None).await.unwrap();
        assert_eq!(sleeper.count(), 2);
        // the dropped connection was reopened
        assert_eq!(mock.connects().len(), 2);
    }

    #[tokio::test]
    async fn it_flushes() {
        let mock = MockTransport::new()
            .with_flush_reply(Ok(Reply::Int(3)))
            .with_flush_reply(Ok(Reply::from("0")));
        let (mut producer, _) = producer(&mock).await;

        assert_eq!(producer.flush(DEFAULT_FLUSH_TIMEOUT_MS).await.unwrap(), 3);
        assert_eq!(producer.flush(100).await.unwrap(), 0);
        assert_eq!(
            mock.calls(),
            vec![
                MockCall::FlushPending { timeout_ms: 5000 },
                MockCall::FlushPending { timeout_ms: 100 },
            ]
        );
    }

    #[tokio::test]
    async fn it_rejects_non_numeric_flush_replies() {
        let mock = MockTransport::new()
            .with_flush_reply(Ok(Reply::from("many")))
            .with_flush_reply(Ok(Reply::Int(-1)))
            .with_flush_reply(Err(TransportError::Server("ERR unknown command".to_owned())));
        let (mut producer, _) = producer(&mock).await;

        assert!(matches!(producer.flush(10).await, Err(Error::CommandError(_))));
        assert!(matches!(producer.flush(10).await, Err(Error::CommandError(_))));
        match producer.flush(10).await {
            Err(Error::CommandError(msg)) => assert_eq!(msg, "ERR unknown command"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn it_supports_generic_commands() {
        let mock = MockTransport::new();
        let (mut producer, _) = producer(&mock).await;

        assert_eq!(producer.ping().await.unwrap(), "PONG");
        producer.close().await.unwrap();
        // closing twice is harmless
        producer.close().await.unwrap();
        assert_eq!(mock.calls(), vec![MockCall::Ping, MockCall::Close]);
    }
}
