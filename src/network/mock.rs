//! In-memory [`Transport`] for tests.
//!
//! Replies are scripted up front and every command is recorded. Clones share
//! the same state, which is also how a [`MockTransport`] acts as its own
//! connection config: connecting hands out another handle on the script.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Reply, Transport, TransportError, TransportResult};

/// A command received by a [`MockTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    BlockingPop { keys: Vec<String>, timeout: Duration },
    PushIfExists { key: String, value: Bytes },
    Push { key: String, value: String },
    FlushPending { timeout_ms: u64 },
    Ping,
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    pops: VecDeque<TransportResult<Option<Reply>>>,
    push_errors: VecDeque<(usize, TransportError)>,
    produce_errors: VecDeque<TransportError>,
    flushes: VecDeque<TransportResult<Reply>>,
    connect_failures: usize,
    connects: Vec<Option<String>>,
    calls: Vec<MockCall>,
}

#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // a panicking test must not hide the calls from the others
    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue a reply for the next blocking pop.
    pub fn with_reply(self, reply: impl Into<Reply>) -> Self {
        self.lock().pops.push_back(Ok(Some(reply.into())));
        self
    }

    /// Queue a timed out blocking pop.
    pub fn with_timeout(self) -> Self {
        self.lock().pops.push_back(Ok(None));
        self
    }

    /// Queue a failed blocking pop.
    pub fn with_pop_error(self, err: TransportError) -> Self {
        self.lock().pops.push_back(Err(err));
        self
    }

    /// Fail the push that comes after `successes` more successful pushes.
    pub fn with_push_error(self, successes: usize, err: TransportError) -> Self {
        self.lock().push_errors.push_back((successes, err));
        self
    }

    /// Fail the next produce (push if exists).
    pub fn with_produce_error(self, err: TransportError) -> Self {
        self.lock().produce_errors.push_back(err);
        self
    }

    pub fn with_flush_reply(self, reply: TransportResult<Reply>) -> Self {
        self.lock().flushes.push_back(reply);
        self
    }

    /// Refuse the next `count` connection attempts.
    pub fn with_connect_failures(self, count: usize) -> Self {
        self.lock().connect_failures = count;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Values pushed to `key` with a plain push, in order.
    pub fn pushed(&self, key: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Push { key: k, value } if k == key => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pop_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::BlockingPop { .. }))
            .count()
    }

    /// Client ids of every connection attempt, in order.
    pub fn connects(&self) -> Vec<Option<String>> {
        self.lock().connects.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type ConnConfig = MockTransport;

    async fn connect(config: Self::ConnConfig, client_id: Option<String>) -> TransportResult<Self> {
        let mut state = config.lock();
        state.connects.push(client_id);
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::Connection("connection refused".to_owned()));
        }
        drop(state);
        Ok(config)
    }

    async fn blocking_pop(
        &mut self,
        keys: &[String],
        timeout: Duration,
    ) -> TransportResult<Option<Reply>> {
        let reply = {
            let mut state = self.lock();
            state.calls.push(MockCall::BlockingPop {
                keys: keys.to_vec(),
                timeout,
            });
            state.pops.pop_front()
        };

        match reply {
            Some(reply) => reply,
            None => {
                // nothing scripted, behave like an idle topic
                tokio::task::yield_now().await;
                Ok(None)
            }
        }
    }

    async fn push_if_exists(&mut self, key: &str, value: &[u8]) -> TransportResult<i64> {
        let mut state = self.lock();
        state.calls.push(MockCall::PushIfExists {
            key: key.to_owned(),
            value: Bytes::copy_from_slice(value),
        });
        match state.produce_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(1),
        }
    }

    async fn push(&mut self, key: &str, value: &str) -> TransportResult<i64> {
        let mut state = self.lock();
        if let Some((successes, _)) = state.push_errors.front_mut() {
            if *successes == 0 {
                if let Some((_, err)) = state.push_errors.pop_front() {
                    return Err(err);
                }
            } else {
                *successes -= 1;
            }
        }
        state.calls.push(MockCall::Push {
            key: key.to_owned(),
            value: value.to_owned(),
        });
        Ok(1)
    }

    async fn flush_pending(&mut self, timeout_ms: u64) -> TransportResult<Reply> {
        let mut state = self.lock();
        state.calls.push(MockCall::FlushPending { timeout_ms });
        state.flushes.pop_front().unwrap_or(Ok(Reply::Int(0)))
    }

    async fn ping(&mut self) -> TransportResult<String> {
        self.lock().calls.push(MockCall::Ping);
        Ok("PONG".to_owned())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.lock().calls.push(MockCall::Close);
        Ok(())
    }
}
