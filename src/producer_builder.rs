use std::time::Duration;

use crate::{
    error::Result,
    network::{ManagedConnection, Transport},
    producer::Producer,
    retry::RetryPolicy,
};

/// Configure a [`Producer`].
///
/// ### Example
/// ```no_run
/// # async fn example() -> rafka::prelude::Result<()> {
/// use std::time::Duration;
/// use rafka::prelude::{BrokerAddress, ProducerBuilder, RedisConnection};
///
/// let producer = ProducerBuilder::<RedisConnection>::new(BrokerAddress::new("rafka.local", 6380))
///     .max_retries(3)
///     .retry_backoff(Duration::from_millis(500))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProducerBuilder<T: Transport> {
    connection_params: T::ConnConfig,
    client_id: Option<String>,
    retry_policy: RetryPolicy,
}

impl<T: Transport> ProducerBuilder<T> {
    /// Start a producer builder. To complete, use the [`build`](Self::build) method.
    pub fn new(connection_params: T::ConnConfig) -> Self {
        Self {
            connection_params,
            client_id: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Name the connection on the server. Producers are anonymous by default.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy = self.retry_policy.max_retries(max_retries);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_policy = self.retry_policy.backoff(backoff);
        self
    }

    pub async fn build(self) -> Result<Producer<T>> {
        tracing::info!("Starting producer on {:?}", self.connection_params);
        let conn = ManagedConnection::open(self.connection_params, self.client_id).await?;

        Ok(Producer {
            retry_policy: self.retry_policy,
            conn,
        })
    }
}
