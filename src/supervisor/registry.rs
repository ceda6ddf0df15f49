//! Cancellation tokens of running loops, keyed by entity id

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `id`, cancelling any loop already running
    /// under that id
    pub fn register(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(id.to_string(), token.clone()) {
            debug!(id, "replacing running loop");
            previous.cancel();
        }
        token
    }

    /// Cancel the loop registered under `id`; `false` if there was none
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.remove(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<_> = tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, token) in tasks.drain() {
            token.cancel();
        }
    }
}
