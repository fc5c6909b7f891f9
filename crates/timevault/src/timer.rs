//! One-shot timers that post events into the engine inbox.
//!
//! Each armed key owns a tokio task sleeping on the monotonic clock. When it
//! wakes it sends [`Input::Timer`] to the engine; the engine never blocks on
//! a timer and all state changes stay on the engine task.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::Input;
use crate::registry::SecretId;

/// What a timer is for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// The secret's duration has elapsed.
    Expired(SecretId),
    /// The `attempt`-th reveal round for the secret has run out of time.
    RevealDeadline(SecretId, u64),
}

/// Per-key one-shot timers.
pub struct TimerService {
    inbox: mpsc::Sender<Input>,
    tasks: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerService {
    /// Create a service posting into `inbox`.
    pub fn new(inbox: mpsc::Sender<Input>) -> Self {
        Self {
            inbox,
            tasks: HashMap::new(),
        }
    }

    /// Fire `key` once after `delay`. Returns `false` if `key` was armed before,
    /// in which case nothing changes.
    pub fn arm(&mut self, key: TimerKey, delay: Duration) -> bool {
        if self.tasks.contains_key(&key) {
            tracing::debug!(?key, "timer already armed");
            return false;
        }
        let inbox = self.inbox.clone();
        let event = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inbox.send(Input::Timer(event)).await.is_err() {
                tracing::debug!("engine gone before timer fired");
            }
        });
        self.tasks.insert(key, handle);
        true
    }

    /// Cancel `key` if it has not fired yet.
    pub fn disarm(&mut self, key: &TimerKey) {
        if let Some(handle) = self.tasks.remove(key) {
            handle.abort();
        }
    }

    /// Abort every pending timer.
    pub fn cancel_all(&mut self) {
        let count = self.tasks.len();
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
        tracing::debug!(count, "timers cancelled");
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
