//! Deserialize messages from server replies.
//!
//! A consumed message arrives as a flat array of tagged fields:
//!
//! ```text
//! ["topic", <topic>, "partition", <partition>, "offset", <offset>, "value", <value>]
//! ```
//!
//! Partition and offset may be sent as integers or as numeric strings.
use bytes::Bytes;

use crate::{
    consumer::ConsumeMessage,
    error::{Error, Result},
    network::Reply,
};

const MESSAGE_TAGS: [&str; 4] = ["topic", "partition", "offset", "value"];

/// Build a [`ConsumeMessage`] out of a reply.
///
/// Anything that does not have the exact layout above is rejected with
/// [`Error::MalformedMessage`] carrying the reply.
pub fn parse_message(reply: Reply) -> Result<ConsumeMessage> {
    match parse_fields(&reply) {
        Some(message) => Ok(message),
        None => {
            tracing::error!("Could not parse message {:?}", reply);
            Err(Error::MalformedMessage(reply))
        }
    }
}

fn parse_fields(reply: &Reply) -> Option<ConsumeMessage> {
    let fields = match reply {
        Reply::Array(fields) if fields.len() == MESSAGE_TAGS.len() * 2 => fields,
        _ => return None,
    };

    let tags_match = fields
        .iter()
        .step_by(2)
        .zip(MESSAGE_TAGS)
        .all(|(field, tag)| field.as_str() == Some(tag));
    if !tags_match {
        return None;
    }

    let topic = fields[1].as_str()?.to_owned();
    let partition = u32::try_from(parse_integer(&fields[3])?).ok()?;
    let offset = u64::try_from(parse_integer(&fields[5])?).ok()?;
    let value = parse_value(&fields[7])?;

    Some(ConsumeMessage {
        topic,
        partition,
        offset,
        value,
    })
}

fn parse_integer(field: &Reply) -> Option<i64> {
    match field {
        Reply::Int(n) => Some(*n),
        other => other.as_str()?.parse().ok(),
    }
}

fn parse_value(field: &Reply) -> Option<Bytes> {
    match field {
        Reply::Bulk(data) => Some(data.clone()),
        Reply::Status(status) => Some(Bytes::from(status.clone())),
        _ => None,
    }
}
