//! Client that consumes messages from Rafka.

use std::{collections::HashMap, time::Duration};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_stream::Stream;
use tracing::instrument;

use crate::{
    encode::{self, ConsumerOptions, ACKS_KEY},
    error::{BoxError, Error, Result},
    network::{GenericCommands, ManagedConnection, Transport},
    parser::parse_message,
    retry::RetryPolicy,
};

/// Common consumed message format.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumeMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub value: Bytes,
}

/// Highest offset per partition.
pub type PartitionOffsets = HashMap<u32, u64>;

/// Offsets to commit, keyed by topic.
pub type CommitSet = HashMap<String, PartitionOffsets>;

/// Settings of a [`Consumer`], fixed once it is built.
///
/// Use a [`ConsumerBuilder`](crate::prelude::ConsumerBuilder) to create one.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub group: String,
    /// Client name, namespaced as `group:id`.
    pub client_id: String,
    pub topics: Vec<String>,
    pub auto_commit: bool,
    /// Kafka consumer settings forwarded to the server.
    pub options: ConsumerOptions,
    pub retry_policy: RetryPolicy,
}

/// Rafka consumer belonging to a consumer group.
///
/// Messages are popped one at a time from the server. Offsets are either
/// committed automatically after each successful [`consume`](Self::consume)
/// or [`consume_batch`](Self::consume_batch), or manually with
/// [`commit`](Self::commit) when auto-commit is off.
///
/// ### Example
/// ```no_run
/// # async fn example() -> rafka::prelude::Result<()> {
/// use std::time::Duration;
/// use rafka::prelude::{BrokerAddress, ConsumerBuilder, RedisConnection};
///
/// let mut consumer = ConsumerBuilder::<RedisConnection>::new(
///     BrokerAddress::default(),
///     "my-group",
///     vec!["greetings".to_string()],
/// )?
/// .build()
/// .await?;
///
/// // the offset is committed only if the callback succeeds
/// consumer
///     .consume_with(Duration::from_secs(5), |message| {
///         println!("received {:?}", message.value);
///         Ok::<(), std::io::Error>(())
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Consumer<T: Transport> {
    pub(crate) config: ConsumerConfig,
    /// Key passed to the blocking pop.
    pub(crate) topic_key: String,
    pub(crate) conn: ManagedConnection<T>,
}

/// Offsets owed to the server for messages handed out to the caller.
///
/// The obligation is taken as soon as messages arrive. It is then either
/// discharged by sending the acks, or cancelled when the caller's callback
/// fails.
#[must_use = "pending offsets must be committed or cancelled"]
struct PendingCommit {
    commit_set: Option<CommitSet>,
}

impl PendingCommit {
    fn new(auto_commit: bool) -> Self {
        Self {
            commit_set: auto_commit.then(CommitSet::new),
        }
    }

    fn add(&mut self, message: &ConsumeMessage) {
        if let Some(commit_set) = self.commit_set.as_mut() {
            record_offset(commit_set, message);
        }
    }

    fn cancel(&mut self) {
        self.commit_set = None;
    }

    async fn discharge<T: Transport>(mut self, conn: &mut ManagedConnection<T>) -> Result<()> {
        match self.commit_set.take() {
            Some(commit_set) => send_acks(conn, &commit_set).await,
            None => Ok(()),
        }
    }
}

impl Drop for PendingCommit {
    fn drop(&mut self) {
        if let Some(commit_set) = &self.commit_set {
            if !commit_set.is_empty() {
                tracing::warn!("Offsets {:?} were never committed", commit_set);
            }
        }
    }
}

impl<T: Transport> Consumer<T> {
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// The key this consumer pops messages from.
    pub fn topic_key(&self) -> &str {
        &self.topic_key
    }

    /// Pop the next message, waiting at most `timeout`.
    ///
    /// Returns `None` when the timeout is reached. A zero timeout waits
    /// forever. Connection failures and transient server errors are retried
    /// according to the consumer's [`RetryPolicy`].
    #[instrument(level = "debug", skip(self), fields(key = %self.topic_key))]
    pub async fn consume_one(&mut self, timeout: Duration) -> Result<Option<ConsumeMessage>> {
        let keys = vec![self.topic_key.clone()];
        let reply = self
            .config
            .retry_policy
            .run(&mut self.conn, |conn| {
                let keys = keys.clone();
                Box::pin(async move { conn.blocking_pop(&keys, timeout).await })
            })
            .await?;

        reply.map(parse_message).transpose()
    }

    /// Consume the next message.
    ///
    /// With auto-commit on, the offset is committed before returning.
    pub async fn consume(&mut self, timeout: Duration) -> Result<Option<ConsumeMessage>> {
        self.consume_with(timeout, |_| Ok::<(), BoxError>(()))
            .await
    }

    /// Consume the next message and hand it to `callback`.
    ///
    /// If the callback fails its error is returned as [`Error::Callback`] and
    /// the offset is not committed, even with auto-commit on.
    #[instrument(level = "debug", skip(self, callback))]
    pub async fn consume_with<F, E>(
        &mut self,
        timeout: Duration,
        callback: F,
    ) -> Result<Option<ConsumeMessage>>
    where
        F: FnOnce(&ConsumeMessage) -> std::result::Result<(), E>,
        E: Into<BoxError>,
    {
        let message = match self.consume_one(timeout).await? {
            Some(message) => message,
            None => return Ok(None),
        };

        let mut pending = PendingCommit::new(self.config.auto_commit);
        pending.add(&message);

        let outcome = callback(&message);
        if outcome.is_err() {
            pending.cancel();
        }
        pending.discharge(&mut self.conn).await?;
        outcome.map_err(|err| Error::Callback(err.into()))?;

        Ok(Some(message))
    }

    /// Consume a batch of messages.
    ///
    /// Messages are accumulated until `batch_size` messages were received or
    /// `batching_max` has passed, whichever happens first. A zero value turns
    /// a condition off, but at least one of them is required. Each pop waits
    /// at most `timeout`.
    pub async fn consume_batch(
        &mut self,
        timeout: Duration,
        batch_size: usize,
        batching_max: Duration,
    ) -> Result<Vec<ConsumeMessage>> {
        self.consume_batch_with(timeout, batch_size, batching_max, |_| {
            Ok::<(), BoxError>(())
        })
        .await
    }

    /// Consume a batch of messages and hand it to `callback`.
    ///
    /// With auto-commit on, the whole batch is committed at once, unless the
    /// callback fails.
    #[instrument(level = "debug", skip(self, callback))]
    pub async fn consume_batch_with<F, E>(
        &mut self,
        timeout: Duration,
        batch_size: usize,
        batching_max: Duration,
        callback: F,
    ) -> Result<Vec<ConsumeMessage>>
    where
        F: FnOnce(&[ConsumeMessage]) -> std::result::Result<(), E>,
        E: Into<BoxError>,
    {
        if batch_size == 0 && batching_max.is_zero() {
            return Err(Error::InvalidArgument(
                "one of batch_size or batching_max must be greater than 0".to_owned(),
            ));
        }

        let start = Instant::now();
        let mut pending = PendingCommit::new(self.config.auto_commit);
        let mut batch = Vec::new();

        loop {
            if batch_size > 0 && batch.len() >= batch_size {
                break;
            }
            if !batching_max.is_zero() && start.elapsed() >= batching_max {
                break;
            }

            match self.consume_one(timeout).await {
                Ok(Some(message)) => {
                    pending.add(&message);
                    batch.push(message);
                }
                Ok(None) => {}
                Err(err) => {
                    pending.discharge(&mut self.conn).await?;
                    return Err(err);
                }
            }
        }

        tracing::debug!("Accumulated {} messages in {:?}", batch.len(), start.elapsed());

        let outcome = callback(&batch);
        if outcome.is_err() {
            pending.cancel();
        }
        pending.discharge(&mut self.conn).await?;
        outcome.map_err(|err| Error::Callback(err.into()))?;

        Ok(batch)
    }

    /// Commit offsets for the given messages.
    ///
    /// Only the largest offset of each topic/partition is sent. A successful
    /// return means the server received the offsets, they are committed to
    /// Kafka eventually. If an ack fails, those sent before it stay sent, and
    /// committing the same messages again is harmless.
    ///
    /// Returns the offsets that were sent.
    pub async fn commit(&mut self, messages: &[ConsumeMessage]) -> Result<CommitSet> {
        let commit_set = prepare_commit(messages);
        send_acks(&mut self.conn, &commit_set).await?;
        Ok(commit_set)
    }

    /// Convert consumer into an asynchronous iterator.
    ///
    /// Timeouts are skipped and nothing is committed. A malformed message is
    /// yielded as an error and the stream moves on to the next one, any other
    /// error ends the stream.
    #[must_use = "stream does nothing by itself"]
    pub fn into_stream(mut self, timeout: Duration) -> impl Stream<Item = Result<ConsumeMessage>> {
        async_stream::stream! {
            loop {
                match self.consume_one(timeout).await {
                    Ok(Some(message)) => yield Ok(message),
                    Ok(None) => continue,
                    Err(err @ Error::MalformedMessage(_)) => yield Err(err),
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }

    /// Convert consumer into an asynchronous iterator that commits.
    ///
    /// The offset of a message is committed when the next one is requested,
    /// so a message is only acknowledged once the caller is done with it. The
    /// stream ends on the first error.
    #[must_use = "stream does nothing by itself"]
    pub fn into_autocommit_stream(
        mut self,
        timeout: Duration,
    ) -> impl Stream<Item = Result<ConsumeMessage>> {
        try_stream! {
            loop {
                if let Some(message) = self.consume_one(timeout).await? {
                    let commit_set = prepare_commit(std::slice::from_ref(&message));
                    yield message;
                    send_acks(&mut self.conn, &commit_set).await?;
                }
            }
        }
    }
}

#[async_trait]
impl<T: Transport> GenericCommands for Consumer<T> {
    async fn ping(&mut self) -> Result<String> {
        self.conn.ping().await
    }

    async fn close(&mut self) -> Result<()> {
        tracing::info!("Closing consumer {}", self.config.client_id);
        self.conn.close().await
    }
}

fn record_offset(commit_set: &mut CommitSet, message: &ConsumeMessage) {
    let offset = commit_set
        .entry(message.topic.clone())
        .or_default()
        .entry(message.partition)
        .or_insert(message.offset);
    if message.offset >= *offset {
        *offset = message.offset;
    }
}

/// Compute the offsets to commit for the given messages.
///
/// Messages are grouped by topic and partition, keeping the largest offset
/// of each group.
pub fn prepare_commit(messages: &[ConsumeMessage]) -> CommitSet {
    let mut commit_set = CommitSet::new();
    for message in messages {
        record_offset(&mut commit_set, message);
    }
    commit_set
}

#[instrument(level = "debug", skip(conn))]
async fn send_acks<T: Transport>(
    conn: &mut ManagedConnection<T>,
    commit_set: &CommitSet,
) -> Result<()> {
    for (topic, partition_offsets) in commit_set.iter() {
        for (partition, offset) in partition_offsets.iter() {
            conn.push(ACKS_KEY, &encode::ack_value(topic, *partition, *offset))
                .await?;
        }
    }
    tracing::debug!("Committed offsets {:?}", commit_set);
    Ok(())
}
