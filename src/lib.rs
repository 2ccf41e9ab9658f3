//! # Rafka
//! Rust client for [Rafka](https://github.com/skroutz/rafka), a Kafka
//! proxy that speaks the Redis protocol.
//!
//! Rafka exposes Kafka consumers and producers through a handful of Redis
//! commands, which keeps the client thin: this crate opens a connection,
//! turns produce/consume/commit calls into those commands, parses the replies
//! into typed messages and retries around transient server failures.
//!
//! ## Table of contents
//! - [Getting started](#getting-started)
//!     - [Producer](#producer)
//!     - [Consumer](#consumer)
//! - [Errors and retries](#errors-and-retries)
//!
//! ## Getting started
//! Include the following snippet in your `Cargo.toml` dependencies:
//! ```toml
//! rafka = "0.1"
//! ```
//!
//! A Rafka server listens on `localhost:6380` by default, see
//! [`BrokerAddress`](prelude::BrokerAddress).
//!
//! ### Producer
//! A [`Producer`](prelude::Producer) sends messages to any topic. To instantiate one, start with a [`ProducerBuilder`](prelude::ProducerBuilder).
//! ```no_run
//! # async fn example() -> rafka::prelude::Result<()> {
//! use rafka::prelude::{BrokerAddress, ProducerBuilder, RedisConnection};
//!
//! let mut producer = ProducerBuilder::<RedisConnection>::new(BrokerAddress::default())
//!     .build()
//!     .await?;
//!
//! producer.produce("greetings", "Hello there!", None).await?;
//! producer.flush(rafka::prelude::DEFAULT_FLUSH_TIMEOUT_MS).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Consumer
//! A [`Consumer`](prelude::Consumer) pops messages for a consumer group. Offsets are committed automatically unless turned off. To instantiate one, start with a [`ConsumerBuilder`](prelude::ConsumerBuilder).
//! ```no_run
//! # async fn example() -> rafka::prelude::Result<()> {
//! use rafka::prelude::{BrokerAddress, ConsumerBuilder, RedisConnection, DEFAULT_CONSUME_TIMEOUT};
//! use tokio_stream::StreamExt;
//!
//! let consumer = ConsumerBuilder::<RedisConnection>::new(
//!     BrokerAddress::default(),
//!     "my-group",
//!     vec!["greetings".to_string()],
//! )?
//! .option("auto.offset.reset", "earliest")
//! .build()
//! .await?;
//!
//! let stream = consumer.into_autocommit_stream(DEFAULT_CONSUME_TIMEOUT);
//! // have to pin streams before iterating
//! tokio::pin!(stream);
//!
//! // Stream will do nothing unless consumed.
//! while let Some(Ok(message)) = stream.next().await {
//!     println!("{:?}", message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors and retries
//! Server errors are classified by their tag into
//! [`ProduceError`](prelude::Error::ProduceError),
//! [`ConsumeError`](prelude::Error::ConsumeError) or
//! [`CommandError`](prelude::Error::CommandError). Lost connections and
//! servers that are shutting down are retried by a
//! [`RetryPolicy`](prelude::RetryPolicy), everything else is returned as is.

use std::time::Duration;

mod consumer;
mod consumer_builder;
mod encode;
mod error;
mod network;
mod parser;
mod producer;
mod producer_builder;
mod retry;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6380;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_CONSUME_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 5000;

pub mod prelude {
    //! Main export of various structures and methods
    //!
    //! # Producing
    //! The [`Producer`] writes messages to topics. Produce a message with an
    //! optional key to pin it to a partition, then [`Producer::flush`] to wait
    //! until buffered messages are written.
    //!
    //! # Consuming
    //! The [`Consumer`] pops messages one at a time, either directly with
    //! [`Consumer::consume`] and [`Consumer::consume_batch`], or as a
    //! [`Stream`](https://docs.rs/futures/latest/futures/stream/trait.Stream.html)
    //! with [`Consumer::into_stream`] and [`Consumer::into_autocommit_stream`].
    //!
    //! Offsets are tracked per topic and partition, only the highest one is
    //! sent on commit. See [`prepare_commit`].
    //!
    //! # Transports
    //! Consumers and producers are generic over a [`Transport`].
    //! [`RedisConnection`] talks to a real server, [`MockTransport`] replays
    //! scripted replies and is meant for tests.
    pub use crate::consumer::{
        prepare_commit, CommitSet, ConsumeMessage, Consumer, ConsumerConfig, PartitionOffsets,
    };
    pub use crate::consumer_builder::ConsumerBuilder;
    pub use crate::error::{classify, BoxError, Error, Result};
    pub use crate::network::mock::{MockCall, MockTransport};
    pub use crate::network::tcp::RedisConnection;
    pub use crate::network::{
        BrokerAddress, GenericCommands, ManagedConnection, Reply, Transport, TransportError,
        TransportResult,
    };
    pub use crate::parser::parse_message;
    pub use crate::producer::Producer;
    pub use crate::producer_builder::ProducerBuilder;
    pub use crate::retry::{
        Attempt, RetryPolicy, Sleeper, TokioSleeper, DEFAULT_RETRIABLE_MESSAGES,
    };
    pub use crate::{
        DEFAULT_CONSUME_TIMEOUT, DEFAULT_FLUSH_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_MAX_RETRIES,
        DEFAULT_PORT, DEFAULT_RETRY_BACKOFF,
    };

    pub use bytes;

    pub mod encode {
        pub use crate::encode::*;
    }
}
