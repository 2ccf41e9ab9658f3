//! Serialize consumer and producer requests into Rafka keys and values.
//!
//! Rafka encodes everything it needs to know in the key of a command:
//!
//! | Purpose | Key | Value |
//! |---|---|---|
//! | consume | `topics:<t1>,<t2>[:<json config>]` | |
//! | produce | `topics:<topic>[:<hash key>]` | message |
//! | commit | `acks` | `<topic>:<partition>:<offset>` |
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const TOPICS_PREFIX: &str = "topics";
pub const ACKS_KEY: &str = "acks";

/// Consumer configuration forwarded to the server (librdkafka settings).
pub type ConsumerOptions = Map<String, Value>;

/// Key a consumer pops from.
///
/// Options are serialized as a JSON object in insertion order and appended
/// only when there is at least one.
pub fn topic_selector(topics: &[String], options: &ConsumerOptions) -> Result<String> {
    if topics.is_empty() {
        return Err(Error::MissingConfigOption("topic"));
    }

    let mut key = format!("{}:{}", TOPICS_PREFIX, topics.join(","));
    if !options.is_empty() {
        key.push(':');
        key.push_str(&serde_json::to_string(options)?);
    }

    Ok(key)
}

/// Key a message is produced to. Messages sharing a hash key end up in the
/// same partition.
pub fn produce_key(topic: &str, hash_key: Option<&str>) -> String {
    match hash_key {
        Some(hash_key) => format!("{TOPICS_PREFIX}:{topic}:{hash_key}"),
        None => format!("{TOPICS_PREFIX}:{topic}"),
    }
}

/// Value pushed to [`ACKS_KEY`] to commit an offset.
pub fn ack_value(topic: &str, partition: u32, offset: u64) -> String {
    format!("{topic}:{partition}:{offset}")
}
