//! Bounded record of recent function calls.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEntry {
    pub function: String,
    pub attempt: u32,
    /// HTTP status, when a response arrived at all.
    pub status: Option<u16>,
    pub ok: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub at_ms: u64,
}

/// Ring buffer of the last `capacity` calls; the oldest entry is dropped first.
///
/// Owned by whoever creates it and handed to a [`crate::Client`]; it lives exactly as long as its
/// owner.
pub struct DiagnosticsLog {
    capacity: usize,
    entries: Mutex<VecDeque<DiagnosticEntry>>,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

impl DiagnosticsLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, entry: DiagnosticEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DiagnosticEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn failures(&self) -> Vec<DiagnosticEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| !entry.ok)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
