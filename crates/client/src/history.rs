//! Operator-side history of recent broadcasts.

use pa_shared::Announcement;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::Storage;

pub const HISTORY_CAPACITY: usize = 5;
pub const HISTORY_KEY: &str = "pa_broadcast_history";

/// The last few announcements an operator sent, newest first.
///
/// Repeats are kept as separate entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryCache {
    entries: Vec<Announcement>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, announcement: Announcement) {
        self.entries.insert(0, announcement);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    pub fn entries(&self) -> &[Announcement] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the persisted history, or an empty one if none was saved.
    pub fn load(storage: &Storage) -> Result<Self, StorageError> {
        let mut history: Self = storage.load(HISTORY_KEY)?.unwrap_or_default();
        history.entries.truncate(HISTORY_CAPACITY);
        Ok(history)
    }

    pub fn save(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.save(HISTORY_KEY, self)
    }
}
