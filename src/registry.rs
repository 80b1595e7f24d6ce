//! Local knowledge-base registry.
//!
//! The registry is the local record of which remote files (and the
//! collections they belong to) exist. It is persisted as one JSON array
//! under [`STORAGE_KEY`] in a [`BlobStore`], and every mutation is announced
//! on an [`EventBus`].
//!
//! # Persistence
//!
//! ```text
//! openaiVectorizedFiles.json
//! [{"name":"a.txt","fileId":"file-1","vectorStoreId":"vs_1"}, ...]
//! ```
//!
//! An absent key and an unparsable blob both read as an empty registry; a
//! corrupt blob is deleted on the first read that sees it.
//!
//! # Writes
//!
//! Read-modify-write cycles are serialized by an internal mutex, so uploads
//! finishing concurrently on a multi-threaded runtime never drop each
//! other's appends. Remote calls made by [`KnowledgeBaseRegistry::clear_all`]
//! happen outside the lock; only the final rewrite holds it.

use futures::future::join_all;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::events::{EventBus, RegistryEvent};
use crate::index::DocumentIndex;
use crate::models::{KnowledgeBaseEntry, StoreDetail};
use crate::storage::{BlobStore, FileBlobStore};

/// Storage key holding the serialized registry.
pub const STORAGE_KEY: &str = "openaiVectorizedFiles";

/// The local list of uploaded files, shared by every surface in the process.
///
/// Construct one per process and hand out `Arc`s; views subscribe to
/// [`bus`](Self::bus) to follow its changes.
pub struct KnowledgeBaseRegistry {
    /// Holds the serialized list under [`STORAGE_KEY`].
    store: Arc<dyn BlobStore>,
    /// Every mutation is published here after it is persisted.
    bus: EventBus,
    /// Serializes read-modify-write cycles on the stored list.
    write_lock: Mutex<()>,
}

/// Result of removing one entry during [`KnowledgeBaseRegistry::clear_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClearOutcome {
    pub entry: KnowledgeBaseEntry,
    pub success: bool,
    pub error: Option<String>,
}

/// Per-entry outcomes of a bulk clear, in input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClearReport {
    pub outcomes: Vec<ClearOutcome>,
    /// The event that was broadcast, if any.
    pub event: Option<RegistryEvent>,
    /// Set when the local rewrite failed after the remote removals ran.
    /// The outcomes are still accurate; the persisted list may be stale.
    pub persist_error: Option<String>,
}

impl ClearReport {
    pub fn removed(&self) -> impl Iterator<Item = &ClearOutcome> {
        self.outcomes.iter().filter(|o| o.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ClearOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Human-readable summary for display after a clear.
    pub fn summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "No files to clear from Knowledge Base.".to_string();
        }
        let failures: Vec<String> = self
            .failed()
            .map(|o| {
                format!(
                    "{} ({})",
                    o.entry.name,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if let Some(err) = &self.persist_error {
            return format!(
                "{} of {} files cleared from Knowledge Base, but the local list could not be updated: {}",
                self.outcomes.len() - failures.len(),
                self.outcomes.len(),
                err
            );
        }
        if failures.is_empty() {
            format!(
                "All {} files successfully cleared from Knowledge Base and local list.",
                self.outcomes.len()
            )
        } else {
            format!(
                "{} file(s) could not be cleared: {}. Local list updated.",
                failures.len(),
                failures.join(", ")
            )
        }
    }
}

impl KnowledgeBaseRegistry {
    pub fn new(store: Arc<dyn BlobStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            write_lock: Mutex::new(()),
        }
    }

    /// Opens the registry stored under `[storage].dir` with a fresh bus.
    pub fn open(config: &Config) -> Self {
        Self::new(
            Arc::new(FileBlobStore::new(config.storage.dir.clone())),
            EventBus::new(),
        )
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Reads the persisted registry.
    ///
    /// Never fails: a missing key, a storage error or a corrupt blob all
    /// yield an empty list. A corrupt blob is removed.
    pub fn load_all(&self) -> Vec<KnowledgeBaseEntry> {
        let raw = match self.store.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read knowledge base registry");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<KnowledgeBaseEntry>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "discarding corrupt knowledge base registry");
                if let Err(e) = self.store.remove(STORAGE_KEY) {
                    tracing::warn!(error = %e, "failed to remove corrupt registry blob");
                }
                Vec::new()
            }
        }
    }

    /// Appends `entry` unless an entry with the same `file_id` exists.
    ///
    /// Returns the registry as it stands afterwards. A duplicate is a
    /// no-op: nothing is written and nothing is broadcast.
    pub fn add_entry(&self, entry: KnowledgeBaseEntry) -> anyhow::Result<Vec<KnowledgeBaseEntry>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("registry lock poisoned"))?;

        let mut entries = self.load_all();
        if entries.iter().any(|e| e.file_id == entry.file_id) {
            tracing::debug!(file_id = %entry.file_id, "entry already registered");
            return Ok(entries);
        }

        entries.push(entry.clone());
        self.persist(&entries)?;
        tracing::info!(
            file_id = %entry.file_id,
            collection_id = %entry.collection_id,
            name = %entry.name,
            "registered knowledge base entry"
        );
        self.bus.publish(RegistryEvent::Added(entry));
        Ok(entries)
    }

    /// Removes every entry in `entries` from the remote index, then
    /// rewrites the local registry.
    ///
    /// All removals run concurrently and are joined before anything is
    /// written. One entry failing never affects another; nothing is retried.
    ///
    /// - No failures and nothing left → the key is deleted, `ClearedAll`.
    /// - Otherwise → the registry keeps every entry that was not removed,
    ///   `Modified`.
    ///
    /// The report is always returned. If the local rewrite fails, the error
    /// lands in [`ClearReport::persist_error`] and `Modified` is broadcast so
    /// listeners reload whatever is actually stored.
    ///
    /// An empty `entries` makes no calls, writes nothing and broadcasts
    /// nothing.
    pub async fn clear_all(
        &self,
        entries: &[KnowledgeBaseEntry],
        index: &dyn DocumentIndex,
    ) -> ClearReport {
        if entries.is_empty() {
            return ClearReport::default();
        }

        tracing::info!(count = entries.len(), "clearing knowledge base");

        let results = join_all(entries.iter().map(|entry| index.remove_entry(entry))).await;

        let outcomes: Vec<ClearOutcome> = entries
            .iter()
            .zip(results)
            .map(|(entry, result)| match result {
                Ok(()) => ClearOutcome {
                    entry: entry.clone(),
                    success: true,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(file_id = %entry.file_id, error = %e, "failed to clear entry");
                    ClearOutcome {
                        entry: entry.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let (event, persist_error) = match self.rewrite_after_clear(&outcomes) {
            Ok(event) => (event, None),
            Err(e) => {
                tracing::error!(error = %e, "failed to update registry after clear");
                (RegistryEvent::Modified, Some(e.to_string()))
            }
        };

        self.bus.publish(event.clone());
        ClearReport {
            outcomes,
            event: Some(event),
            persist_error,
        }
    }

    /// Drops every successfully removed entry from the stored list, reloading
    /// under the write lock so entries added meanwhile survive.
    fn rewrite_after_clear(&self, outcomes: &[ClearOutcome]) -> anyhow::Result<RegistryEvent> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("registry lock poisoned"))?;

        let remaining: Vec<KnowledgeBaseEntry> = self
            .load_all()
            .into_iter()
            .filter(|e| {
                !outcomes
                    .iter()
                    .any(|o| o.success && o.entry.file_id == e.file_id)
            })
            .collect();

        let any_failed = outcomes.iter().any(|o| !o.success);
        if !any_failed && remaining.is_empty() {
            self.store.remove(STORAGE_KEY)?;
            Ok(RegistryEvent::ClearedAll)
        } else {
            self.persist(&remaining)?;
            Ok(RegistryEvent::Modified)
        }
    }

    /// One [`StoreDetail`] per entry, marking `selected` as active.
    pub fn store_details(&self, selected: Option<&str>) -> Vec<StoreDetail> {
        store_details(&self.load_all(), selected)
    }

    fn persist(&self, entries: &[KnowledgeBaseEntry]) -> anyhow::Result<()> {
        let json = serde_json::to_string(entries)?;
        self.store.set(STORAGE_KEY, &json)
    }
}

pub(crate) fn store_details(
    entries: &[KnowledgeBaseEntry],
    selected: Option<&str>,
) -> Vec<StoreDetail> {
    entries
        .iter()
        .map(|e| StoreDetail {
            id: e.collection_id.clone(),
            name: e.name.clone(),
            is_active: selected == Some(e.collection_id.as_str()),
        })
        .collect()
}
