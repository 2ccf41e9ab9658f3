use std::time::Duration;

use serde_json::Value;

use crate::{
    consumer::{Consumer, ConsumerConfig},
    encode::{self, ConsumerOptions},
    error::{Error, Result},
    network::{ManagedConnection, Transport},
    retry::RetryPolicy,
};

/// Configure a [`Consumer`].
pub struct ConsumerBuilder<T: Transport> {
    connection_params: T::ConnConfig,
    group: String,
    topics: Vec<String>,
    id: Option<String>,
    auto_commit: bool,
    options: ConsumerOptions,
    retry_policy: RetryPolicy,
}

impl<T: Transport> ConsumerBuilder<T> {
    /// Start a consumer builder. To complete, use the [`build`](Self::build) method.
    ///
    /// Both a group and at least one topic are required.
    pub fn new(
        connection_params: T::ConnConfig,
        group: impl Into<String>,
        topics: Vec<String>,
    ) -> Result<Self> {
        let group = group.into();
        if group.is_empty() {
            return Err(Error::MissingConfigOption("group"));
        }
        if topics.is_empty() || topics.iter().any(|topic| topic.is_empty()) {
            return Err(Error::MissingConfigOption("topic"));
        }

        Ok(Self {
            connection_params,
            group,
            topics,
            id: None,
            auto_commit: true,
            options: ConsumerOptions::new(),
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Identify this member of the group. Defaults to a random id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Commit offsets after each consume. Defaults to true.
    pub fn auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Set a Kafka consumer option, e.g. `auto.offset.reset`.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Replace all Kafka consumer options.
    pub fn options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
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

    /// Connect to the server and hand out the consumer.
    pub async fn build(self) -> Result<Consumer<T>> {
        let topic_key = encode::topic_selector(&self.topics, &self.options)?;
        let id = self.id.unwrap_or_else(random_id);
        let client_id = format!("{}:{}", self.group, id);

        tracing::info!("Starting consumer {} on {}", client_id, topic_key);
        let conn =
            ManagedConnection::open(self.connection_params, Some(client_id.clone())).await?;

        Ok(Consumer {
            config: ConsumerConfig {
                group: self.group,
                client_id,
                topics: self.topics,
                auto_commit: self.auto_commit,
                options: self.options,
                retry_policy: self.retry_policy,
            },
            topic_key,
            conn,
        })
    }
}

/// 32 random hex characters.
fn random_id() -> String {
    rand::random::<[u8; 16]>()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::mock::MockTransport;

    fn topics() -> Vec<String> {
        vec!["foo".to_owned(), "bar".to_owned()]
    }

    #[test]
    fn it_requires_a_group_and_topics() {
        let mock = MockTransport::new();
        assert!(matches!(
            ConsumerBuilder::<MockTransport>::new(mock.clone(), "", topics()),
            Err(Error::MissingConfigOption("group"))
        ));
        assert!(matches!(
            ConsumerBuilder::<MockTransport>::new(mock.clone(), "grp", vec![]),
            Err(Error::MissingConfigOption("topic"))
        ));
        assert!(matches!(
            ConsumerBuilder::<MockTransport>::new(mock, "grp", vec![String::new()]),
            Err(Error::MissingConfigOption("topic"))
        ));
    }

    #[test]
    fn it_generates_hex_ids() {
        let id = random_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }

    #[tokio::test]
    async fn it_names_the_client_after_group_and_id() {
        let mock = MockTransport::new();
        let consumer = ConsumerBuilder::<MockTransport>::new(mock.clone(), "grp", topics())
            .unwrap()
            .id("1")
            .build()
            .await
            .unwrap();

        assert_eq!(consumer.config().client_id, "grp:1");
        assert_eq!(consumer.topic_key(), "topics:foo,bar");
        assert!(consumer.config().auto_commit);
        assert_eq!(mock.connects(), vec![Some("grp:1".to_owned())]);
    }

    #[tokio::test]
    async fn it_defaults_to_a_random_id() {
        let consumer = ConsumerBuilder::<MockTransport>::new(MockTransport::new(), "grp", topics())
            .unwrap()
            .build()
            .await
            .unwrap();

        let (group, id) = consumer.config().client_id.split_once(':').unwrap();
        assert_eq!(group, "grp");
        assert_eq!(id.len(), 32);
    }

    #[tokio::test]
    async fn it_appends_options_to_the_topic_key() {
        let consumer = ConsumerBuilder::<MockTransport>::new(
            MockTransport::new(),
            "grp",
            vec!["bar".to_owned()],
        )
        .unwrap()
        .option("auto.offset.reset", "latest")
        .option("fetch.wait.max.ms", 100)
        .build()
        .await
        .unwrap();

        assert_eq!(
            consumer.topic_key(),
            r#"topics:bar:{"auto.offset.reset":"latest","fetch.wait.max.ms":100}"#
        );
    }

    #[tokio::test]
    async fn it_reports_connection_failures() {
        let mock = MockTransport::new().with_connect_failures(1);
        let result = ConsumerBuilder::<MockTransport>::new(mock, "grp", topics())
            .unwrap()
            .build()
            .await;
        assert!(matches!(result, Err(Error::ConnectionError(_))));
    }

    #[test]
    fn it_adjusts_the_retry_policy() {
        let builder = ConsumerBuilder::<MockTransport>::new(MockTransport::new(), "grp", topics())
            .unwrap()
            .max_retries(1)
            .retry_backoff(Duration::from_millis(10));
        assert_eq!(builder.retry_policy.get_max_retries(), 1);
        assert_eq!(builder.retry_policy.get_backoff(), Duration::from_millis(10));
    }
}
