// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Small synchronous key-value storage for credential-adjacent items.
//!
//! Reads never suspend. Contexts that share one storage instance behave like
//! browser tabs of the same origin: they see each other's writes.

use crate::error::{Result, SyncError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str);
}

/// Process-local session storage. Clones share state.
#[derive(Clone, Default)]
pub struct MemorySessionStorage {
    entries: Arc<DashMap<String, String>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (simulates a full or disabled store).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage(format!(
                "session storage rejected write of {}",
                key
            )));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}
