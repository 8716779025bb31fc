//! Per-target serialization
//!
//! One async mutex per target id, created on first use and dropped once no
//! caller holds or waits on it. Different targets never block each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

#[derive(Debug, Default)]
pub struct KeyedSlots {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str, slot: Arc<AsyncMutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map plus ours: nobody else is waiting
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }

    /// Run `task` once every earlier task for `key` has finished
    pub async fn run_exclusive<F, T>(&self, key: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = self.slot(key);
        let output = {
            let _guard = slot.lock().await;
            debug!("Acquired deployment slot {}", key);
            task.await
        };
        self.release(key, slot);
        output
    }

    /// Whether any task for `key` is running or waiting
    pub fn is_busy(&self, key: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.contains_key(key)
    }

    /// Number of keys with running or waiting tasks
    pub fn active(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.len()
    }
}
