//! Connection & communication with a Rafka server.
//!
//! # Network Module
//!
//! Rafka exposes a Kafka cluster through the Redis protocol. Consumers and
//! producers only need a handful of commands:
//!
//! - `BLPOP topics:<topics>[:<config>] <timeout>` pops the next message for a
//!   consumer, waiting at most `timeout` seconds.
//! - `RPUSH acks <topic>:<partition>:<offset>` acknowledges consumed offsets.
//! - `RPUSHX topics:<topic>[:<key>] <value>` produces a message.
//! - `DUMP <timeout_ms>` flushes the producer and returns the number of
//!   messages that are still buffered.
//! - `PING` and `QUIT`.
//!
//! The [`Transport`] trait is the seam between the client logic and the code
//! that actually speaks to the server. [`tcp::RedisConnection`] talks to a real
//! server through the `redis` crate, [`mock::MockTransport`] replays scripted
//! replies for tests.
//!
//! A consumer identifies itself with its client name (`group:id`). The server
//! keeps one Kafka consumer per client name, which is why a blocking pop is
//! never retried blindly by the transport: reconnecting straight away may find
//! the previous client still registered. Retrying is left to the
//! [`RetryPolicy`](crate::retry::RetryPolicy), which always waits before it
//! reconnects.

use std::{fmt::Debug, str::FromStr, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{
    error::{Error, Result},
    DEFAULT_HOST, DEFAULT_PORT,
};

pub mod mock;
pub mod tcp;

/// Address of a Rafka server.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for BrokerAddress {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl FromStr for BrokerAddress {
    type Err = Error;

    /// Parse `host:port`. A missing port falls back to the default one.
    ///
    /// IPv6 hosts are written `[::1]:6380`, or bare as `::1` without a port.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid address {s}"));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            match rest {
                "" => (host, None),
                _ => (host, Some(rest.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else if s.matches(':').count() > 1 {
            (s, None)
        } else {
            match s.rsplit_once(':') {
                None => (s, None),
                Some((host, port)) => (host, Some(port)),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            None => DEFAULT_PORT,
            Some(port) => port.parse::<u16>().map_err(|err| {
                tracing::error!("Error parsing port of address {} {:?}", s, err);
                invalid()
            })?,
        };
        Ok(Self::new(host, port))
    }
}

/// A reply sent back by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bulk(Bytes),
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    /// The reply as text, if it is a string of some sort.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Bulk(data) => std::str::from_utf8(data).ok(),
            Reply::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Bulk(Bytes::from(s))
    }
}

impl From<Bytes> for Reply {
    fn from(b: Bytes) -> Self {
        Reply::Bulk(b)
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Reply::Int(n)
    }
}

impl<R: Into<Reply>> From<Vec<R>> for Reply {
    fn from(items: Vec<R>) -> Self {
        Reply::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Failure reported by a [`Transport`].
///
/// Server errors are kept as raw text; [`Error`] classifies them.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0}")]
    Server(String),
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// The commands a Rafka client sends to the server.
#[async_trait]
pub trait Transport: Send {
    type ConnConfig: Clone + Debug + Send + Sync;

    /// Open a connection, naming the client `client_id` if given.
    async fn connect(config: Self::ConnConfig, client_id: Option<String>) -> TransportResult<Self>
    where
        Self: Sized;

    /// Pop from the first non-empty key. `None` means the timeout was reached.
    async fn blocking_pop(
        &mut self,
        keys: &[String],
        timeout: Duration,
    ) -> TransportResult<Option<Reply>>;

    /// Append to a list that must already exist.
    async fn push_if_exists(&mut self, key: &str, value: &[u8]) -> TransportResult<i64>;

    async fn push(&mut self, key: &str, value: &str) -> TransportResult<i64>;

    /// Flush buffered messages, waiting at most `timeout_ms`.
    async fn flush_pending(&mut self, timeout_ms: u64) -> TransportResult<Reply>;

    async fn ping(&mut self) -> TransportResult<String>;

    async fn close(&mut self) -> TransportResult<()>;
}

/// Commands available on both consumers and producers.
#[async_trait]
pub trait GenericCommands {
    async fn ping(&mut self) -> Result<String>;

    /// Close the connection to the server.
    async fn close(&mut self) -> Result<()>;
}

/// A [`Transport`] that is (re)connected on demand.
///
/// Connection failures drop the underlying transport so the next call opens
/// a fresh one.
#[derive(Debug)]
pub struct ManagedConnection<T: Transport> {
    config: T::ConnConfig,
    client_id: Option<String>,
    conn: Option<T>,
}

impl<T: Transport> ManagedConnection<T> {
    /// Connect right away so configuration problems show up early.
    pub async fn open(config: T::ConnConfig, client_id: Option<String>) -> Result<Self> {
        tracing::debug!("Connecting to {:?} as {:?}", config, client_id);
        let conn = T::connect(config.clone(), client_id.clone()).await?;
        Ok(Self {
            config,
            client_id,
            conn: Some(conn),
        })
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn get(&mut self) -> Result<&mut T> {
        if self.conn.is_none() {
            tracing::info!("Reconnecting to {:?} as {:?}", self.config, self.client_id);
            let conn = T::connect(self.config.clone(), self.client_id.clone()).await?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| Error::ConnectionError("not connected".to_owned()))
    }

    fn settle<R>(&mut self, result: TransportResult<R>) -> Result<R> {
        if let Err(TransportError::Connection(reason)) = &result {
            tracing::warn!("Dropping connection {:?}: {}", self.client_id, reason);
            self.conn = None;
        }
        result.map_err(Error::from)
    }

    pub async fn blocking_pop(&mut self, keys: &[String], timeout: Duration) -> Result<Option<Reply>> {
        let result = self.get().await?.blocking_pop(keys, timeout).await;
        self.settle(result)
    }

    pub async fn push_if_exists(&mut self, key: &str, value: &[u8]) -> Result<i64> {
        let result = self.get().await?.push_if_exists(key, value).await;
        self.settle(result)
    }

    pub async fn push(&mut self, key: &str, value: &str) -> Result<i64> {
        let result = self.get().await?.push(key, value).await;
        self.settle(result)
    }

    pub async fn flush_pending(&mut self, timeout_ms: u64) -> Result<Reply> {
        let result = self.get().await?.flush_pending(timeout_ms).await;
        self.settle(result)
    }

    pub async fn ping(&mut self) -> Result<String> {
        let result = self.get().await?.ping().await;
        self.settle(result)
    }

    /// Send QUIT and forget the connection. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => conn.close().await.map_err(Error::from),
            None => Ok(()),
        }
    }
}
