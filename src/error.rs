//! Errors surfaced by consumers and producers.
//!
//! The server reports failures as plain text. Errors raised while producing
//! are prefixed with `PROD `, errors raised while consuming or committing with
//! `CONS `. Everything else is a generic command error. [`classify`] turns that
//! text into an [`Error`] and is applied to every server error coming out of a
//! [`Transport`](crate::network::Transport).

use thiserror::Error;

use crate::network::{Reply, TransportError};

const PRODUCE_ERROR_TAG: &str = "PROD ";
const CONSUME_ERROR_TAG: &str = "CONS ";

/// Error type returned by a failed user callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The server reply did not have the shape of a message.
    #[error("The message {0:?} could not be parsed")]
    MalformedMessage(Reply),

    #[error("Produce error: {0}")]
    ProduceError(String),

    #[error("Consume error: {0}")]
    ConsumeError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0} option not provided")]
    MissingConfigOption(&'static str),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// A consume callback failed. The original error is kept as is.
    #[error("Callback failed: {0}")]
    Callback(#[source] BoxError),
}

impl Error {
    /// The text carried by server-originated errors.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Error::ProduceError(msg) | Error::ConsumeError(msg) | Error::CommandError(msg) => {
                Some(msg)
            }
            _ => None,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectionError(_))
    }

    /// Unwraps the error returned by a user callback.
    pub fn into_callback_error(self) -> std::result::Result<BoxError, Self> {
        match self {
            Error::Callback(err) => Ok(err),
            other => Err(other),
        }
    }
}

/// Map the text of a server error to an [`Error`] according to its tag.
///
/// ```rust
/// use rafka::prelude::{classify, Error};
///
/// assert!(matches!(classify("PROD boom"), Error::ProduceError(msg) if msg == "boom"));
/// assert!(matches!(classify("CONS boom"), Error::ConsumeError(msg) if msg == "boom"));
/// assert!(matches!(classify("boom"), Error::CommandError(msg) if msg == "boom"));
/// ```
pub fn classify(text: &str) -> Error {
    if let Some(msg) = text.strip_prefix(PRODUCE_ERROR_TAG) {
        Error::ProduceError(msg.to_owned())
    } else if let Some(msg) = text.strip_prefix(CONSUME_ERROR_TAG) {
        Error::ConsumeError(msg.to_owned())
    } else {
        Error::CommandError(text.to_owned())
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Server(text) => classify(&text),
            TransportError::Connection(msg) => Error::ConnectionError(msg),
            TransportError::Protocol(msg) => Error::CommandError(msg),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Error encoding consumer options {:?}", err);
        Error::EncodingError(err.to_string())
    }
}
