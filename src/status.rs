//! Backend server health tracking
//!
//! `StatusChannel` is the supervisor's view of the analysis server's health:
//! a single current value, broadcast to subscribers only when it changes,
//! with the current value replayed on subscribe. Completion is one-way and
//! marks the channel terminal (supervisor disposed or server crashed).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Health of the analysis server backing one project root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerStatus {
    /// No information yet (initial state)
    Unknown,
    /// No server is running for this root
    NotRunning,
    /// The server is starting up and not yet answering
    Initializing,
    /// The server is up but too busy to answer
    Busy,
    /// The server is answering queries
    Ready,
    /// The server crashed; terminal, no further restarts
    Failed,
    /// The backend executable could not be found
    NotInstalled,
}

impl ServerStatus {
    /// Whether a command failure observed at this status looks like
    /// "server not ready yet" and is worth retrying
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ServerStatus::NotRunning | ServerStatus::Initializing | ServerStatus::Busy
        )
    }
}

/// Event delivered to status subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The current status changed to this value (also replayed on subscribe)
    Changed(ServerStatus),
    /// The channel is terminal; no further events will follow
    Completed,
}

type Callback = Box<dyn Fn(StatusEvent) + Send + Sync>;

struct ChannelInner {
    current: ServerStatus,
    completed: bool,
    next_id: u64,
    subscribers: Vec<(u64, Callback)>,
}

/// Multicast broadcaster of the current server status.
///
/// Subscribers are notified under the channel lock, in `set_status` order.
/// Callbacks must not call back into the channel; hand off to a task instead.
pub struct StatusChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                current: ServerStatus::Unknown,
                completed: false,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// The current status value
    pub fn current(&self) -> ServerStatus {
        self.inner.lock().current
    }

    /// Whether `complete()` has been called
    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    /// Update the current status, notifying subscribers only on change.
    /// Ignored once the channel has completed.
    pub fn set_status(&self, status: ServerStatus) {
        let mut inner = self.inner.lock();
        if inner.completed || inner.current == status {
            return;
        }
        inner.current = status;
        for (_, callback) in &inner.subscribers {
            callback(StatusEvent::Changed(status));
        }
    }

    /// Mark the channel terminal. Idempotent; all subscribers receive
    /// `Completed`, and later subscribers receive it right after the replay.
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.completed {
            return;
        }
        inner.completed = true;
        for (_, callback) in &inner.subscribers {
            callback(StatusEvent::Completed);
        }
    }

    /// Register a subscriber. The current value is delivered immediately
    /// (followed by `Completed` if the channel is already terminal); the
    /// returned guard unsubscribes on drop.
    pub fn subscribe<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(StatusEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        callback(StatusEvent::Changed(inner.current));
        if inner.completed {
            callback(StatusEvent::Completed);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Box::new(callback)));
        StatusSubscription {
            channel: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription guard returned by [`StatusChannel::subscribe`];
/// removes the subscriber when dropped
pub struct StatusSubscription {
    channel: Weak<Mutex<ChannelInner>>,
    id: u64,
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.channel.upgrade() {
            let mut inner = inner.lock();
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}
