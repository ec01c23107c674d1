//! Listener tasks owned by one screen or session lifetime.
//!
//! Every realtime listener (including nested ones opened later from inside
//! another listener) is spawned through a [`SubscriptionScope`]; closing the
//! scope aborts all of them together.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;

#[derive(Clone, Default)]
pub struct SubscriptionScope {
    inner: Arc<Mutex<ScopeState>>,
}

#[derive(Default)]
struct ScopeState {
    tasks: Vec<AbortHandle>,
    closed: bool,
}

impl SubscriptionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawning into a closed scope aborts the task right away.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task).abort_handle();
        let mut state = self.lock();
        if state.closed {
            handle.abort();
            return;
        }
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(handle);
    }

    /// Listener tasks that are still running.
    pub fn active(&self) -> usize {
        self.lock().tasks.iter().filter(|t| !t.is_finished()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn close(&self) {
        let tasks = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };
        tracing::debug!(tasks = tasks.len(), "closing subscription scope");
        for task in tasks {
            task.abort();
        }
    }

    /// Closes the scope when the returned guard drops.
    pub fn guard(&self) -> ScopeGuard {
        ScopeGuard(self.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScopeState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ScopeGuard(SubscriptionScope);

impl ScopeGuard {
    pub fn scope(&self) -> &SubscriptionScope {
        &self.0
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}
