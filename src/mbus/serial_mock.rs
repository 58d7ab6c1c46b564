//! Mock transport for testing
//!
//! [`MockTransport`] plays back scripted responses and records every call, so
//! the poll cycle can be tested without an optical head. Clones share state:
//! keep one clone in the test and hand the other to the coordinator.

use crate::error::MBusError;
use crate::mbus::serial::{response_from_window, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Open(String),
    Wake,
    Command(Vec<u8>),
    Read,
    Close,
}

/// What the next `read_response` produces.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// Bytes as they would arrive on the line.
    Bytes(Vec<u8>),
    /// Nothing arrives; the read waits out its window.
    Silence,
    Error(MBusError),
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    open_results: VecDeque<Result<(), MBusError>>,
    responses: VecDeque<MockResponse>,
    events: Vec<MockEvent>,
    read_delay: Duration,
}

/// Scripted [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the result of the next `open`. Without one, opens succeed.
    pub fn queue_open_result(&self, result: Result<(), MBusError>) {
        self.state().open_results.push_back(result);
    }

    pub fn queue_response(&self, response: MockResponse) {
        self.state().responses.push_back(response);
    }

    /// Queue raw bytes to be returned by the next read.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.queue_response(MockResponse::Bytes(bytes.to_vec()));
    }

    /// Time each read takes before producing its response.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state().read_delay = delay;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Command frames written so far, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Command(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &MockEvent) -> usize {
        self.state().events.iter().filter(|e| *e == event).count()
    }

    pub fn pending_responses(&self) -> usize {
        self.state().responses.len()
    }

    fn record(&self, event: MockEvent) {
        self.state().events.push(event);
    }

    fn ensure_open(&self) -> Result<(), MBusError> {
        if self.state().open {
            Ok(())
        } else {
            Err(MBusError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, path: &str) -> Result<(), MBusError> {
        self.record(MockEvent::Open(path.to_string()));
        let mut state = self.state();
        let result = state.open_results.pop_front().unwrap_or(Ok(()));
        state.open = result.is_ok();
        result
    }

    async fn wake(&mut self) -> Result<(), MBusError> {
        self.ensure_open()?;
        self.record(MockEvent::Wake);
        Ok(())
    }

    async fn send_command(&mut self, command: &[u8]) -> Result<(), MBusError> {
        self.ensure_open()?;
        self.record(MockEvent::Command(command.to_vec()));
        Ok(())
    }

    async fn read_response(&mut self, timeout: Duration) -> Result<Vec<u8>, MBusError> {
        self.ensure_open()?;
        self.record(MockEvent::Read);

        let (delay, response) = {
            let mut state = self.state();
            (
                state.read_delay,
                state.responses.pop_front().unwrap_or(MockResponse::Silence),
            )
        };

        match response {
            MockResponse::Bytes(bytes) => {
                if delay >= timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(MBusError::Timeout(timeout));
                }
                tokio::time::sleep(delay).await;
                response_from_window(&bytes, timeout)
            }
            MockResponse::Silence => {
                tokio::time::sleep(timeout).await;
                Err(MBusError::Timeout(timeout))
            }
            MockResponse::Error(e) => {
                tokio::time::sleep(delay.min(timeout)).await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        let mut state = self.state();
        state.open = false;
        state.events.push(MockEvent::Close);
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}
