//! Bounded retries around transient server failures.
//!
//! Only two kinds of failures are retried: the transport losing (or not
//! getting) its connection, and server errors whose message names a
//! transient condition, e.g. the server shutting down. Before each retry the
//! policy sleeps for its backoff so the server has time to release the
//! previous client, and the operation then starts over from scratch.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
    error::{Error, Result},
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF,
};

/// Server messages treated as transient unless configured otherwise.
///
/// Matching ignores case, so `"shutting down"` also covers the server's
/// `Server shutting down` and `server is shutting down` replies.
pub const DEFAULT_RETRIABLE_MESSAGES: &[&str] = &["shutting down"];

/// Waits between two attempts.
#[async_trait]
pub trait Sleeper: Debug + Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retriable(Error),
    Terminal(Error),
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
    retriable_messages: Vec<String>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            retriable_messages: DEFAULT_RETRIABLE_MESSAGES
                .iter()
                .map(|msg| msg.to_string())
                .collect(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// A policy that gives up on the first failure.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replace the server messages that are considered transient. A server
    /// error is retried when its text contains one of them, ignoring case.
    pub fn retriable_messages(mut self, messages: Vec<String>) -> Self {
        self.retriable_messages = messages;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn get_max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn get_backoff(&self) -> Duration {
        self.backoff
    }

    pub fn is_retriable(&self, err: &Error) -> bool {
        if err.is_connection_error() {
            return true;
        }
        match err.server_message() {
            Some(text) => {
                let text = text.to_lowercase();
                self.retriable_messages
                    .iter()
                    .any(|msg| text.contains(&msg.to_lowercase()))
            }
            None => false,
        }
    }

    pub fn evaluate<T>(&self, result: Result<T>) -> Attempt<T> {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(err) if self.is_retriable(&err) => Attempt::Retriable(err),
            Err(err) => Attempt::Terminal(err),
        }
    }

    /// Run `op` against `state`, retrying transient failures.
    ///
    /// `op` is called again from scratch on every attempt. The last error is
    /// returned unchanged once the retries run out.
    pub async fn run<S, T, F>(&self, state: &mut S, mut op: F) -> Result<T>
    where
        S: Send,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>>,
    {
        let mut retries = 0;
        loop {
            match self.evaluate(op(state).await) {
                Attempt::Success(value) => return Ok(value),
                Attempt::Terminal(err) => return Err(err),
                Attempt::Retriable(err) => {
                    if retries >= self.max_retries {
                        tracing::error!("Giving up after {} retries: {}", retries, err);
                        return Err(err);
                    }
                    retries += 1;
                    tracing::warn!(
                        "{}, retrying in {:?} ({}/{})",
                        err,
                        self.backoff,
                        retries,
                        self.max_retries
                    );
                    self.sleeper.sleep(self.backoff).await;
                }
            }
        }
    }
}
