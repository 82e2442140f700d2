//! Peer recovery policy and scheduled recovery tasks
//!
//! Each peer can have at most one pending task of each [`RecoveryKind`].
//! Scheduling a task cancels the previous one of the same kind, and every
//! task carries a token so a firing that raced with its cancellation is
//! recognised as stale.

use crate::config::RecoveryOptions;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Recovery policy for failed or disconnected peer links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Delay before a failed link is recreated (default: 1s)
    pub retry_delay: Duration,
    /// How long a disconnected link may take to recover (default: 30s)
    pub grace_period: Duration,
    /// Automatic retries per incident (default: 1)
    pub max_retries: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            grace_period: Duration::from_secs(30),
            max_retries: 1,
        }
    }
}

impl RecoveryPolicy {
    pub fn from_options(options: &RecoveryOptions) -> Self {
        Self {
            retry_delay: options.retry_delay(),
            grace_period: options.grace_period(),
            max_retries: options.max_peer_retries,
        }
    }

    /// Whether another automatic retry is allowed after `attempts` retries
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}

/// Named recovery task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryKind {
    /// Recreate a failed link as offerer
    Retry,
    /// Give up on a link that stayed disconnected
    Grace,
}

struct ScheduledTask {
    token: u64,
    handle: JoinHandle<()>,
}

/// Pending recovery tasks, keyed by peer and kind
#[derive(Default)]
pub struct RecoveryTasks {
    tasks: HashMap<(String, RecoveryKind), ScheduledTask>,
    next_token: u64,
}

impl RecoveryTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire(token)` after `delay`, replacing any pending task of the same kind
    pub fn schedule<F>(&mut self, peer_id: &str, kind: RecoveryKind, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel(peer_id, kind);

        self.next_token += 1;
        let token = self.next_token;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(token);
        });

        debug!(
            peer_id = %peer_id,
            ?kind,
            delay_ms = delay.as_millis() as u64,
            "Scheduled recovery task"
        );
        self.tasks
            .insert((peer_id.to_string(), kind), ScheduledTask { token, handle });
        token
    }

    /// Cancel a pending task; returns whether one existed
    pub fn cancel(&mut self, peer_id: &str, kind: RecoveryKind) -> bool {
        match self.tasks.remove(&(peer_id.to_string(), kind)) {
            Some(task) => {
                task.handle.abort();
                debug!(peer_id = %peer_id, ?kind, "Cancelled recovery task");
                true
            }
            None => false,
        }
    }

    /// Cancel every task for a peer
    pub fn cancel_peer(&mut self, peer_id: &str) -> usize {
        let keys: Vec<_> = self
            .tasks
            .keys()
            .filter(|(id, _)| id == peer_id)
            .cloned()
            .collect();
        for (id, kind) in &keys {
            self.cancel(id, *kind);
        }
        keys.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }

    /// Claim a firing; `false` if the task was cancelled or replaced since
    pub fn take_fired(&mut self, peer_id: &str, kind: RecoveryKind, token: u64) -> bool {
        let key = (peer_id.to_string(), kind);
        match self.tasks.get(&key) {
            Some(task) if task.token == token => {
                self.tasks.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, peer_id: &str, kind: RecoveryKind) -> bool {
        self.tasks.contains_key(&(peer_id.to_string(), kind))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for RecoveryTasks {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
