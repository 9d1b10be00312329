//! In-flight transfer bookkeeping

use std::collections::HashMap;

use super::TransferId;

/// Maps in-flight transfer ids to the content id they fetch
///
/// Lives only in memory; entries exist from request until finalize or
/// rollback.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    entries: HashMap<TransferId, String>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: TransferId, content_id: &str) {
        self.entries.insert(id, content_id.to_string());
    }

    /// Remove an entry, returning the content id it pointed at
    pub fn remove(&mut self, id: TransferId) -> Option<String> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.entries.contains_key(&id)
    }
}
