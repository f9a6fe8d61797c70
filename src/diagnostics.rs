// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pluggable sink for structured diagnostic events.
//!
//! The default sink forwards to `tracing`; tests swap in `MemorySink` to
//! assert on what the core reported.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Auth,
    Api,
    Cache,
    Sync,
    Component,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Auth => "auth",
            Category::Api => "api",
            Category::Cache => "cache",
            Category::Sync => "sync",
            Category::Component => "component",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub level: Level,
    pub category: Category,
    pub message: String,
    pub context: Value,
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Convenience wrapper so call sites read like log statements.
pub fn emit(
    sink: &dyn DiagnosticSink,
    level: Level,
    category: Category,
    message: &str,
    context: Value,
) {
    sink.emit(DiagnosticEvent {
        level,
        category,
        message: message.to_string(),
        context,
    });
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: DiagnosticEvent) {
        let category = event.category.as_str();
        let context = &event.context;
        match event.level {
            Level::Debug => tracing::debug!(category, %context, "{}", event.message),
            Level::Info => tracing::info!(category, %context, "{}", event.message),
            Level::Warn => tracing::warn!(category, %context, "{}", event.message),
            Level::Error => tracing::error!(category, %context, "{}", event.message),
        }
    }
}

/// Records every event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, category: Category, level: Level) -> usize {
        self.events()
            .iter()
            .filter(|e| e.category == category && e.level == level)
            .count()
    }

    pub fn contains(&self, category: Category, needle: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.category == category && e.message.contains(needle))
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
