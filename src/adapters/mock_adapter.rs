//! Mock transport for testing
//!
//! Implements [`Transport`] without physical hardware. It provides:
//! - Fixed replies per query command
//! - A FIFO of one-off replies
//! - An echo mode that remembers the token of `MNEMONIC value` writes and
//!   answers `MNEMONIC?` with it
//! - One-shot failure injection
//! - Call logging for test verification

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};

#[derive(Default)]
struct MockState {
    replies: HashMap<String, String>,
    queued: VecDeque<String>,
    echoed: HashMap<String, String>,
    default_reply: Option<String>,
    last_command: Option<String>,
    call_log: Vec<String>,
}

/// Scripted in-memory instrument.
///
/// # Example
///
/// ```
/// use scpi_daq::adapters::{MockAdapter, Transport};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mock = MockAdapter::new().with_reply("*IDN?", "ANRITSU,MG3692C,123,1.0");
/// assert_eq!(mock.query("*IDN?").await.unwrap(), "ANRITSU,MG3692C,123,1.0");
/// # })
/// ```
pub struct MockAdapter {
    state: Mutex<MockState>,
    echo: bool,
    should_fail_next: AtomicBool,
    writes_until_failure: AtomicUsize,
}

impl MockAdapter {
    /// Create an empty mock with echo disabled.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            echo: false,
            should_fail_next: AtomicBool::new(false),
            writes_until_failure: AtomicUsize::new(0),
        }
    }

    /// Create a mock that echoes set commands back on the matching query.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    /// Always answer `command` with `reply`.
    pub fn with_reply(self, command: &str, reply: &str) -> Self {
        self.set_reply(command, reply);
        self
    }

    /// Replace the fixed reply for `command`.
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.lock()
            .replies
            .insert(command.to_string(), reply.to_string());
    }

    /// Answer any otherwise unscripted exchange with `reply` (e.g. an ACK byte).
    pub fn with_default_reply(self, reply: &str) -> Self {
        self.lock().default_reply = Some(reply.to_string());
        self
    }

    /// Queue a reply consumed by the next read that has no fixed reply.
    pub fn push_reply(&self, reply: &str) {
        self.lock().queued.push_back(reply.to_string());
    }

    /// Make the next transport operation fail.
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Let `n` writes succeed, then fail the one after (one-shot).
    pub fn fail_after_writes(&self, n: usize) {
        self.writes_until_failure.store(n + 1, Ordering::SeqCst);
    }

    /// Get a copy of the call log (every written command, in order).
    pub fn get_call_log(&self) -> Vec<String> {
        self.lock().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_call_log(&self) {
        self.lock().call_log.clear();
    }

    /// Commands written that were not queries.
    pub fn writes(&self) -> Vec<String> {
        self.get_call_log()
            .into_iter()
            .filter(|c| !c.trim_end().ends_with('?'))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self) -> AppResult<()> {
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(DaqError::Transport("mock transport failure".into()));
        }
        Ok(())
    }

    fn respond(&self, state: &mut MockState, command: &str) -> Option<String> {
        if let Some(reply) = state.replies.get(command) {
            return Some(reply.clone());
        }
        if let Some(reply) = state.queued.pop_front() {
            return Some(reply);
        }
        if self.echo {
            if let Some(mnemonic) = command.trim_end().strip_suffix('?') {
                if let Some(token) = state.echoed.get(mnemonic.trim()) {
                    return Some(token.clone());
                }
            }
        }
        state.default_reply.clone()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockAdapter {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.check_failure()?;
        let countdown = self.writes_until_failure.load(Ordering::SeqCst);
        if countdown > 0 {
            self.writes_until_failure.store(countdown - 1, Ordering::SeqCst);
            if countdown == 1 {
                return Err(DaqError::Transport(format!("mock write of '{}' failed", command)));
            }
        }
        let mut state = self.lock();
        state.call_log.push(command.to_string());

        if self.echo && !command.trim_end().ends_with('?') {
            if let Some((mnemonic, token)) = command.split_once(' ') {
                state
                    .echoed
                    .insert(mnemonic.to_string(), token.trim().to_string());
            }
        }

        state.last_command = Some(command.to_string());
        Ok(())
    }

    async fn read_line(&self) -> AppResult<String> {
        self.check_failure()?;
        let mut state = self.lock();
        let command = state
            .last_command
            .take()
            .ok_or_else(|| DaqError::Transport("read without a preceding command".into()))?;
        self.respond(&mut state, &command)
            .ok_or_else(|| DaqError::Timeout(std::time::Duration::from_millis(0)))
    }

    fn info(&self) -> String {
        format!("MockAdapter(echo: {})", self.echo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_reply() {
        let mock = MockAdapter::new().with_reply("FREQ?", "1000000.000");
        assert_eq!(mock.query("FREQ?").await.unwrap(), "1000000.000");
        assert_eq!(mock.query("FREQ?").await.unwrap(), "1000000.000");
    }

    #[tokio::test]
    async fn test_echo_mode() {
        let mock = MockAdapter::echo();
        mock.write("FREQ 2500000.000").await.unwrap();
        assert_eq!(mock.query("FREQ?").await.unwrap(), "2500000.000");
        assert!(mock.query("PHAS?").await.is_err());
    }

    #[tokio::test]
    async fn test_queued_replies_are_fifo() {
        let mock = MockAdapter::new();
        mock.push_reply("1");
        mock.push_reply("2");
        assert_eq!(mock.query("A?").await.unwrap(), "1");
        assert_eq!(mock.query("B?").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_failure_is_one_shot() {
        let mock = MockAdapter::new().with_reply("X?", "1");
        mock.trigger_failure();
        assert!(mock.query("X?").await.is_err());
        assert_eq!(mock.query("X?").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_fail_after_writes() {
        let mock = MockAdapter::new();
        mock.fail_after_writes(2);
        assert!(mock.write("A 1").await.is_ok());
        assert!(mock.write("A 2").await.is_ok());
        assert!(mock.write("A 3").await.is_err());
        assert!(mock.write("A 4").await.is_ok());
        assert_eq!(mock.writes(), vec!["A 1", "A 2", "A 4"]);
    }

    #[tokio::test]
    async fn test_call_log() {
        let mock = MockAdapter::echo();
        mock.write("AMPL 1.00").await.unwrap();
        let _ = mock.query("AMPL?").await;
        assert_eq!(mock.get_call_log(), vec!["AMPL 1.00", "AMPL?"]);
        assert_eq!(mock.writes(), vec!["AMPL 1.00"]);

        mock.clear_call_log();
        assert!(mock.get_call_log().is_empty());
    }
}
