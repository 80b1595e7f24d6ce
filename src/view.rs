//! Listener-side view of the registry.
//!
//! A [`KnowledgeBaseView`] is what one UI surface holds: a cached copy of the
//! registry plus the currently selected collection. The cache is never
//! authoritative. On every [`RegistryEvent`] the view reloads from the
//! registry first and only then uses the event as a hint:
//!
//! | Event | Selection |
//! |-------|-----------|
//! | `Added(entry)` | select `entry.collection_id` |
//! | `ClearedAll` | clear |
//! | `Modified` | clear if the selected collection is gone |
//!
//! Several views can listen on the same bus without coordinating.

use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::events::RegistryEvent;
use crate::models::{KnowledgeBaseEntry, StoreDetail};
use crate::registry::{self, KnowledgeBaseRegistry};

pub struct KnowledgeBaseView {
    /// Weak so a listener task never keeps the registry (and with it the
    /// bus sender) alive.
    registry: Weak<KnowledgeBaseRegistry>,
    entries: Vec<KnowledgeBaseEntry>,
    selection: Option<String>,
}

impl KnowledgeBaseView {
    /// Creates a view with a freshly loaded cache and no selection.
    pub fn new(registry: &Arc<KnowledgeBaseRegistry>) -> Self {
        let entries = registry.load_all();
        Self {
            registry: Arc::downgrade(registry),
            entries,
            selection: None,
        }
    }

    pub fn entries(&self) -> &[KnowledgeBaseEntry] {
        &self.entries
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Reloads the cache. Once the registry is gone the cache is kept.
    pub fn refresh(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            self.entries = registry.load_all();
        }
    }

    /// Reloads, then adjusts the selection according to `event`.
    pub fn apply(&mut self, event: &RegistryEvent) {
        self.refresh();
        match event {
            RegistryEvent::Added(entry) => {
                self.selection = Some(entry.collection_id.clone());
            }
            RegistryEvent::ClearedAll => {
                self.selection = None;
            }
            RegistryEvent::Modified => self.revalidate_selection(),
        }
    }

    /// Selects `collection_id`, or clears the selection if it is already
    /// the selected one.
    pub fn toggle(&mut self, collection_id: &str) {
        if self.selection.as_deref() == Some(collection_id) {
            self.selection = None;
        } else {
            self.selection = Some(collection_id.to_string());
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn store_details(&self) -> Vec<StoreDetail> {
        registry::store_details(&self.entries, self.selection.as_deref())
    }

    fn revalidate_selection(&mut self) {
        let still_present = self.selection.as_deref().is_some_and(|selected| {
            self.entries.iter().any(|e| e.collection_id == selected)
        });
        if !still_present {
            self.selection = None;
        }
    }
}

/// Drives `view` from `receiver` until the bus is dropped.
///
/// The view only holds a weak handle to the registry, so dropping the last
/// `Arc<KnowledgeBaseRegistry>` closes the bus and ends the task.
pub fn spawn_listener(
    view: Arc<Mutex<KnowledgeBaseView>>,
    mut receiver: broadcast::Receiver<RegistryEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut receiver).await {
            view.lock().await.apply(&event);
        }
        tracing::debug!("registry bus closed, view listener exiting");
    })
}

/// Waits for the next event, or `None` once the bus is closed.
///
/// A receiver that lagged behind has lost events of unknown kind; that gap
/// is reported as `Modified` so the view reloads and revalidates.
async fn next_event(receiver: &mut broadcast::Receiver<RegistryEvent>) -> Option<RegistryEvent> {
    match receiver.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "view lagged behind registry events");
            Some(RegistryEvent::Modified)
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::registry::STORAGE_KEY;
    use crate::storage::{BlobStore, MemoryBlobStore};
    use std::time::Duration;

    fn setup() -> (Arc<KnowledgeBaseRegistry>, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new());
        let reg = Arc::new(KnowledgeBaseRegistry::new(store.clone(), EventBus::new()));
        (reg, store)
    }

    #[test]
    fn added_selects_new_collection() {
        let (reg, _) = setup();
        let mut view = KnowledgeBaseView::new(&reg);
        let e = KnowledgeBaseEntry::new("a.txt", "f1", "c1");
        reg.add_entry(e.clone()).unwrap();

        view.apply(&RegistryEvent::Added(e));
        assert_eq!(view.selection(), Some("c1"));
        assert_eq!(view.entries().len(), 1);
    }

    #[test]
    fn cleared_all_drops_selection() {
        let (reg, store) = setup();
        reg.add_entry(KnowledgeBaseEntry::new("a", "f1", "c1")).unwrap();
        let mut view = KnowledgeBaseView::new(&reg);
        view.toggle("c1");

        store.remove(STORAGE_KEY).unwrap();
        view.apply(&RegistryEvent::ClearedAll);
        assert_eq!(view.selection(), None);
        assert!(view.entries().is_empty());
    }

    #[test]
    fn modified_keeps_selection_when_still_present() {
        let (reg, _) = setup();
        reg.add_entry(KnowledgeBaseEntry::new("a", "f1", "c1")).unwrap();
        let mut view = KnowledgeBaseView::new(&reg);
        view.toggle("c1");

        view.apply(&RegistryEvent::Modified);
        assert_eq!(view.selection(), Some("c1"));
    }

    #[test]
    fn modified_drops_selection_when_gone() {
        let (reg, store) = setup();
        reg.add_entry(KnowledgeBaseEntry::new("a", "f1", "c1")).unwrap();
        reg.add_entry(KnowledgeBaseEntry::new("b", "f2", "c2")).unwrap();
        let mut view = KnowledgeBaseView::new(&reg);
        view.toggle("c1");

        store
            .set(
                STORAGE_KEY,
                r#"[{"name":"b","fileId":"f2","vectorStoreId":"c2"}]"#,
            )
            .unwrap();
        view.apply(&RegistryEvent::Modified);
        assert_eq!(view.selection(), None);
        assert_eq!(view.entries().len(), 1);
    }

    #[test]
    fn view_ignores_payload_and_trusts_storage() {
        let (reg, _) = setup();
        let mut view = KnowledgeBaseView::new(&reg);
        // The payload names an entry that was never persisted.
        view.apply(&RegistryEvent::Added(KnowledgeBaseEntry::new(
            "ghost", "f9", "c9",
        )));
        assert!(view.entries().is_empty());
    }

    #[test]
    fn toggle_selects_then_clears() {
        let (reg, _) = setup();
        let mut view = KnowledgeBaseView::new(&reg);
        view.toggle("c1");
        assert_eq!(view.selection(), Some("c1"));
        view.toggle("c2");
        assert_eq!(view.selection(), Some("c2"));
        view.toggle("c2");
        assert_eq!(view.selection(), None);
    }

    #[tokio::test]
    async fn two_listeners_stay_in_sync() {
        let (reg, _) = setup();
        let a = Arc::new(Mutex::new(KnowledgeBaseView::new(&reg)));
        let b = Arc::new(Mutex::new(KnowledgeBaseView::new(&reg)));
        let ha = spawn_listener(a.clone(), reg.bus().subscribe());
        let hb = spawn_listener(b.clone(), reg.bus().subscribe());

        reg.add_entry(KnowledgeBaseEntry::new("a.txt", "f1", "c1"))
            .unwrap();

        for _ in 0..50 {
            if a.lock().await.selection().is_some() && b.lock().await.selection().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for view in [&a, &b] {
            let view = view.lock().await;
            assert_eq!(view.selection(), Some("c1"));
            assert_eq!(view.entries().len(), 1);
        }
        ha.abort();
        hb.abort();
    }

    #[tokio::test]
    async fn lagged_receiver_reads_as_modified() {
        let store = Arc::new(MemoryBlobStore::new());
        let reg = Arc::new(KnowledgeBaseRegistry::new(
            store.clone(),
            EventBus::with_capacity(1),
        ));
        reg.add_entry(KnowledgeBaseEntry::new("a", "f1", "c1")).unwrap();
        let mut view = KnowledgeBaseView::new(&reg);
        view.toggle("c1");
        let mut rx = reg.bus().subscribe();

        // c1 disappears from storage and c2 arrives; the receiver sees neither.
        store.remove(STORAGE_KEY).unwrap();
        reg.add_entry(KnowledgeBaseEntry::new("b", "f2", "c2")).unwrap();
        reg.add_entry(KnowledgeBaseEntry::new("c", "f3", "c3")).unwrap();

        let event = next_event(&mut rx).await.unwrap();
        assert_eq!(event, RegistryEvent::Modified);
        view.apply(&event);
        assert_eq!(view.selection(), None);
        let ids: Vec<&str> = view.entries().iter().map(|e| e.file_id.as_str()).collect();
        assert_eq!(ids, vec!["f2", "f3"]);

        let c3 = KnowledgeBaseEntry::new("c", "f3", "c3");
        assert_eq!(next_event(&mut rx).await, Some(RegistryEvent::Added(c3)));
    }

    #[tokio::test]
    async fn listener_revalidates_after_lagging() {
        let store = Arc::new(MemoryBlobStore::new());
        let reg = Arc::new(KnowledgeBaseRegistry::new(
            store.clone(),
            EventBus::with_capacity(1),
        ));
        reg.add_entry(KnowledgeBaseEntry::new("a", "f1", "c1")).unwrap();
        reg.add_entry(KnowledgeBaseEntry::new("b", "f2", "c2")).unwrap();
        let view = Arc::new(Mutex::new(KnowledgeBaseView::new(&reg)));
        view.lock().await.toggle("c1");
        let rx = reg.bus().subscribe();

        store
            .set(
                STORAGE_KEY,
                r#"[{"name":"b","fileId":"f2","vectorStoreId":"c2"}]"#,
            )
            .unwrap();
        reg.bus().publish(RegistryEvent::Modified);
        reg.bus().publish(RegistryEvent::Modified);

        let handle = spawn_listener(view.clone(), rx);
        for _ in 0..50 {
            if view.lock().await.selection().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        {
            let view = view.lock().await;
            assert_eq!(view.selection(), None);
            assert_eq!(view.entries().len(), 1);
        }
        handle.abort();
    }

    #[tokio::test]
    async fn listener_exits_when_registry_is_dropped() {
        let (reg, _) = setup();
        let view = Arc::new(Mutex::new(KnowledgeBaseView::new(&reg)));
        let handle = spawn_listener(view.clone(), reg.bus().subscribe());

        drop(reg);

        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok(), "listener kept running after the bus closed");
        view.lock().await.refresh();
        assert!(view.lock().await.entries().is_empty());
    }
}
