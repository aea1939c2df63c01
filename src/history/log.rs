//! Ordered, append-only list of committed sessions

use super::{CommittedSession, HistoryError, LogStore};
use std::sync::{Arc, RwLock};

/// Shared handle to the conversation log
///
/// Clones share the same entries. Appends go through the history committer;
/// readers only see entries that are already durable.
#[derive(Clone)]
pub struct ConversationLog {
    entries: Arc<RwLock<Vec<CommittedSession>>>,
    store: Arc<dyn LogStore>,
}

impl ConversationLog {
    /// Load the existing log from the store
    pub async fn open(store: Arc<dyn LogStore>) -> Result<Self, HistoryError> {
        let entries = store.load().await?;
        tracing::info!(entries = entries.len(), "Loaded conversation log");
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            store,
        })
    }

    /// Snapshot of all entries in commit order
    pub fn entries(&self) -> Vec<CommittedSession> {
        self.entries.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, durably and in memory
    pub async fn clear(&self) -> Result<(), HistoryError> {
        self.store.clear().await?;
        self.entries.write().unwrap().clear();
        tracing::info!("Cleared conversation log");
        Ok(())
    }

    /// Persist, then publish, one entry
    pub(crate) async fn append(&self, entry: CommittedSession) -> Result<(), HistoryError> {
        self.store.append(&entry).await?;
        self.entries.write().unwrap().push(entry);
        Ok(())
    }
}
