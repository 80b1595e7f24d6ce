//! Process-wide notifications about registry changes.
//!
//! Every mutation of the [`KnowledgeBaseRegistry`](crate::registry::KnowledgeBaseRegistry)
//! publishes one [`RegistryEvent`] on an [`EventBus`]. Delivery is
//! best-effort: publishing with no subscribers is fine, and a subscriber
//! that falls behind loses the oldest messages. Listeners therefore treat an
//! event only as a hint and always reload the persisted list themselves.
//!
//! On the wire an event has exactly one of three fields:
//!
//! ```json
//! { "newStore": { "name": "a.txt", "fileId": "f1", "vectorStoreId": "c1" } }
//! { "allStoresCleared": true }
//! { "storesModified": true }
//! ```

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::KnowledgeBaseEntry;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A new entry was appended.
    Added(KnowledgeBaseEntry),
    /// The registry is now empty.
    ClearedAll,
    /// Entries were removed but some remain.
    Modified,
}

impl Serialize for RegistryEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            RegistryEvent::Added(entry) => map.serialize_entry("newStore", entry)?,
            RegistryEvent::ClearedAll => map.serialize_entry("allStoresCleared", &true)?,
            RegistryEvent::Modified => map.serialize_entry("storesModified", &true)?,
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEvent {
    #[serde(rename = "newStore")]
    new_store: Option<KnowledgeBaseEntry>,
    #[serde(rename = "allStoresCleared")]
    all_stores_cleared: Option<bool>,
    #[serde(rename = "storesModified")]
    stores_modified: Option<bool>,
}

impl<'de> Deserialize<'de> for RegistryEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        match (raw.new_store, raw.all_stores_cleared, raw.stores_modified) {
            (Some(entry), None, None) => Ok(RegistryEvent::Added(entry)),
            (None, Some(true), None) => Ok(RegistryEvent::ClearedAll),
            (None, None, Some(true)) => Ok(RegistryEvent::Modified),
            _ => Err(de::Error::custom(
                "expected exactly one of newStore, allStoresCleared, storesModified",
            )),
        }
    }
}

/// Fire-and-forget publish/subscribe channel for [`RegistryEvent`]s.
///
/// Cloning the bus yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: RegistryEvent) -> usize {
        tracing::debug!(?event, "registry event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
