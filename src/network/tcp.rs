use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::Connection, ConnectionAddr, ConnectionInfo, RedisError, Value};
use tracing::instrument;

use super::{BrokerAddress, Reply, Transport, TransportError, TransportResult};

/// TCP connection to a Rafka server.
///
/// The `redis` crate takes care of the wire format. No socket timeout is
/// set on the connection since it would conflict with the timeout of the
/// blocking pop, and no command is retried here.
///
/// Typically this would only be used directly in a low level context.
/// Otherwise the Consumer or Producer modules abstract out the connection
/// details for the user.
pub struct RedisConnection {
    address: BrokerAddress,
    conn: Connection,
}

impl RedisConnection {
    /// Connect to a Rafka server.
    ///
    /// ### Example
    /// ```no_run
    /// # async fn example() -> Result<(), rafka::prelude::TransportError> {
    /// let address = rafka::prelude::BrokerAddress::new("localhost", 6380);
    /// let conn = rafka::prelude::RedisConnection::new_(address, Some("group:id".to_owned())).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new_(address: BrokerAddress, client_id: Option<String>) -> TransportResult<Self> {
        tracing::debug!("Connecting to {:?}", address);
        let client = redis::Client::open(connection_info(&address))
            .map_err(|err| {
                tracing::error!("Error could not create client for {:?} {:?}", address, err);
                to_transport_error(err)
            })?;
        let mut conn = client
            .get_async_connection()
            .await
            .map_err(to_transport_error)?;

        if let Some(client_id) = client_id {
            redis::cmd("CLIENT")
                .arg("SETNAME")
                .arg(&client_id)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(to_transport_error)?;
        }

        Ok(Self { address, conn })
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    #[instrument(name = "network-blpop", level = "trace", skip(self))]
    async fn blocking_pop_(
        &mut self,
        keys: &[String],
        timeout: Duration,
    ) -> TransportResult<Option<Reply>> {
        let value = redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout_secs(timeout))
            .query_async::<_, Value>(&mut self.conn)
            .await
            .map_err(to_transport_error)?;

        match value {
            Value::Nil => Ok(None),
            value => Ok(Some(to_reply(value))),
        }
    }

    #[instrument(name = "network-rpushx", level = "trace", skip(self, value))]
    async fn push_if_exists_(&mut self, key: &str, value: &[u8]) -> TransportResult<i64> {
        redis::cmd("RPUSHX")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn)
            .await
            .map_err(to_transport_error)
    }

    #[instrument(name = "network-rpush", level = "trace", skip(self))]
    async fn push_(&mut self, key: &str, value: &str) -> TransportResult<i64> {
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn)
            .await
            .map_err(to_transport_error)
    }

    #[instrument(name = "network-dump", level = "trace", skip(self))]
    async fn flush_pending_(&mut self, timeout_ms: u64) -> TransportResult<Reply> {
        redis::cmd("DUMP")
            .arg(timeout_ms.to_string())
            .query_async::<_, Value>(&mut self.conn)
            .await
            .map(to_reply)
            .map_err(to_transport_error)
    }
}

#[async_trait]
impl Transport for RedisConnection {
    type ConnConfig = BrokerAddress;

    async fn connect(config: Self::ConnConfig, client_id: Option<String>) -> TransportResult<Self> {
        Self::new_(config, client_id).await
    }

    async fn blocking_pop(
        &mut self,
        keys: &[String],
        timeout: Duration,
    ) -> TransportResult<Option<Reply>> {
        self.blocking_pop_(keys, timeout).await
    }

    async fn push_if_exists(&mut self, key: &str, value: &[u8]) -> TransportResult<i64> {
        self.push_if_exists_(key, value).await
    }

    async fn push(&mut self, key: &str, value: &str) -> TransportResult<i64> {
        self.push_(key, value).await
    }

    async fn flush_pending(&mut self, timeout_ms: u64) -> TransportResult<Reply> {
        self.flush_pending_(timeout_ms).await
    }

    async fn ping(&mut self) -> TransportResult<String> {
        redis::cmd("PING")
            .query_async(&mut self.conn)
            .await
            .map_err(to_transport_error)
    }

    async fn close(&mut self) -> TransportResult<()> {
        match redis::cmd("QUIT").query_async::<_, ()>(&mut self.conn).await {
            Ok(()) => Ok(()),
            // the server may hang up before replying
            Err(err) if err.is_connection_dropped() => Ok(()),
            Err(err) => Err(to_transport_error(err)),
        }
    }
}

/// BLPOP takes whole seconds, a partial second is rounded up.
fn timeout_secs(timeout: Duration) -> u64 {
    if timeout.subsec_nanos() > 0 {
        timeout.as_secs() + 1
    } else {
        timeout.as_secs()
    }
}

fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Int(n),
        Value::Data(data) => Reply::Bulk(Bytes::from(data)),
        Value::Bulk(items) => Reply::Array(items.into_iter().map(to_reply).collect()),
        Value::Status(status) => Reply::Status(status),
        Value::Okay => Reply::Status("OK".to_owned()),
    }
}

// built field by field, an IPv6 host would need brackets in a URL
fn connection_info(address: &BrokerAddress) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(address.host.clone(), address.port),
        redis: Default::default(),
    }
}

/// Detail redis fills in for an error reply that is a single word.
const MISSING_DETAIL: &str = "Unknown extension error encountered";

fn to_transport_error(err: RedisError) -> TransportError {
    if err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error()
        || err.is_timeout()
    {
        return TransportError::Connection(err.to_string());
    }

    // rebuild the text the server sent, the first word being its tag
    match (err.code(), err.detail()) {
        (Some(code), Some(MISSING_DETAIL)) if err.kind() == redis::ErrorKind::ExtensionError => {
            TransportError::Server(code.to_owned())
        }
        (Some(code), Some(detail)) => TransportError::Server(format!("{code} {detail}")),
        (Some(code), None) => TransportError::Server(code.to_owned()),
        (None, _) => TransportError::Protocol(err.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn it_rounds_timeouts_up_to_seconds() {
        assert_eq!(timeout_secs(Duration::from_secs(5)), 5);
        assert_eq!(timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(timeout_secs(Duration::from_millis(1)), 1);
        assert_eq!(timeout_secs(Duration::ZERO), 0);
    }

    #[test]
    fn it_converts_values_to_replies() {
        let value = Value::Bulk(vec![
            Value::Data(b"topic".to_vec()),
            Value::Int(2),
            Value::Nil,
            Value::Okay,
        ]);
        assert_eq!(
            to_reply(value),
            Reply::Array(vec![
                Reply::from("topic"),
                Reply::Int(2),
                Reply::Nil,
                Reply::Status("OK".to_owned()),
            ])
        );
    }

    #[test]
    fn it_keeps_the_server_error_tag() {
        let err = RedisError::from((
            redis::ErrorKind::ResponseError,
            "An error was signalled by the server",
            "boom".to_owned(),
        ));
        assert_eq!(
            to_transport_error(err),
            TransportError::Server("ERR boom".to_owned())
        );

        let err = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(
            to_transport_error(err),
            TransportError::Connection(_)
        ));
    }

    fn server_error(reply: &[u8]) -> TransportError {
        match redis::parse_redis_value(reply) {
            Err(err) => to_transport_error(err),
            Ok(value) => panic!("expected an error reply, got {value:?}"),
        }
    }

    #[test]
    fn it_keeps_error_replies_verbatim() {
        assert_eq!(
            server_error(b"-CONS Server shutting down\r\n"),
            TransportError::Server("CONS Server shutting down".to_owned())
        );
        assert_eq!(
            server_error(b"-PROD unknown topic\r\n"),
            TransportError::Server("PROD unknown topic".to_owned())
        );

        // a single word reply has no detail to append
        let err = server_error(b"-boom\r\n");
        assert_eq!(err, TransportError::Server("boom".to_owned()));
        assert!(matches!(
            crate::error::Error::from(err),
            crate::error::Error::CommandError(text) if text == "boom"
        ));
    }

    #[test]
    fn it_connects_to_ipv6_hosts() {
        let info = connection_info(&BrokerAddress::new("::1", 6380));
        assert!(matches!(
            info.addr,
            ConnectionAddr::Tcp(ref host, 6380) if host == "::1"
        ));
        assert_eq!(info.redis.db, 0);
    }
}
