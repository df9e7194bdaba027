//! Bounded rolling log of manager events, for diagnostics views.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub level: DiagnosticLevel,
    /// App identity, or empty for network-wide events.
    pub app: String,
    pub network: String,
    pub message: String,
}

/// Keeps the most recent `capacity` entries.
#[derive(Debug)]
pub struct DiagnosticLog {
    capacity: usize,
    entries: VecDeque<DiagnosticEntry>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(
        &mut self,
        level: DiagnosticLevel,
        app: &str,
        network: &str,
        message: impl Into<String>,
    ) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.entries.push_back(DiagnosticEntry {
            timestamp_ms,
            level,
            app: app.to_string(),
            network: network.to_string(),
            message: message.into(),
        });
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.entries.iter().cloned().collect()
    }
}
