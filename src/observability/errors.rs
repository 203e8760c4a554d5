//! Bounded in-memory error log.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Entries kept before the oldest is dropped.
pub const ERROR_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub name: String,
    pub path: Option<String>,
    pub error: String,
    /// Milliseconds since the Unix epoch.
    pub at: u64,
}

#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorEntry>>,
}

impl ErrorLog {
    /// Record an error raised by `name` (a route or registry) while serving `path`.
    pub fn report(&self, name: &str, path: Option<&str>, error: &dyn std::fmt::Display) {
        let error = error.to_string();
        tracing::error!(source = %name, path = ?path, error = %error, "Application error");

        let at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut entries = self.entries.lock().expect("error log lock poisoned");
        if entries.len() == ERROR_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(ErrorEntry {
            name: name.to_string(),
            path: path.map(str::to_string),
            error,
            at,
        });
    }

    /// Newest last.
    pub fn recent(&self) -> Vec<ErrorEntry> {
        self.entries
            .lock()
            .expect("error log lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("error log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
