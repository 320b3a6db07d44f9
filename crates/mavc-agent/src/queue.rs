//! FIFO action queue shared by the listener, executor and geofence monitor.

use mavc_core::Action;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Ordered buffer of pending actions.
///
/// Every mutation takes the same lock, so an append, a pop and a clear never
/// interleave. An action already popped is owned by the executor and is not
/// affected by a later `clear`.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Mutex<VecDeque<Action>>,
    pushed: Notify,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: Action) {
        self.lock().push_back(action);
        self.pushed.notify_one();
    }

    /// Append a batch, keeping its order.
    pub fn extend(&self, actions: impl IntoIterator<Item = Action>) {
        let added = {
            let mut queue = self.lock();
            let before = queue.len();
            queue.extend(actions);
            queue.len() - before
        };
        if added > 0 {
            self.pushed.notify_one();
        }
    }

    pub fn pop(&self) -> Option<Action> {
        self.lock().pop_front()
    }

    /// Empty the queue, returning how many actions were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the pending actions, head first.
    pub fn snapshot(&self) -> Vec<Action> {
        self.lock().iter().cloned().collect()
    }

    /// Resolve on the next append or after `idle`, whichever comes first.
    pub async fn wait_for_push(&self, idle: Duration) {
        let _ = tokio::time::timeout(idle, self.pushed.notified()).await;
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Action>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
