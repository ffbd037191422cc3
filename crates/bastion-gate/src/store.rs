use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bastion_crypto::ChainLinked;
use bastion_ledger::{JsonlAppender, JsonlReader};
use bastion_types::time::now_utc;
use bastion_types::{Sha256Digest, TypeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::GateError;
use crate::event::{envelope_hash, AdmittedEvent};
use crate::stage::EventIndex;

/// An admitted event as persisted by an [`EventStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: String,
    pub component_instance_id: String,
    pub sequence: u64,
    pub hash: Sha256Digest,
    pub prev_hash: Option<Sha256Digest>,
    #[serde(with = "bastion_types::time::rfc3339")]
    pub admitted_at: DateTime<Utc>,
    pub late_arrival: bool,
    /// Envelope exactly as received.
    pub envelope: Value,
}

impl StoredEvent {
    pub fn from_admitted(event: &AdmittedEvent) -> Self {
        Self {
            event_id: event.event_id().to_string(),
            component_instance_id: event.component_instance_id().to_string(),
            sequence: event.sequence(),
            hash: event.declared_hash(),
            prev_hash: event.prev_hash(),
            admitted_at: now_utc(),
            late_arrival: event.late_arrival,
            envelope: event.envelope.clone(),
        }
    }
}

impl ChainLinked for StoredEvent {
    fn link_hash(&self) -> Sha256Digest {
        self.hash
    }

    fn prev_link(&self) -> Option<Sha256Digest> {
        self.prev_hash
    }

    fn computed_hash(&self) -> Result<Sha256Digest, TypeError> {
        envelope_hash(&self.envelope)
    }
}

/// Durable record of admitted events, indexed for the gate's checks.
pub trait EventStore: EventIndex + Send {
    /// This store viewed as the read-only index the stages consult.
    fn as_index(&self) -> &dyn EventIndex;

    /// Persist an admitted event. Returns only once it is durable.
    fn insert(&mut self, event: StoredEvent) -> Result<(), GateError>;

    /// Undo the most recent insert, which must be `event_id`.
    fn rollback(&mut self, event_id: &str) -> Result<(), GateError>;

    fn get(&self, event_id: &str) -> Option<StoredEvent>;

    /// Events of one component instance in sequence order.
    fn events_for(&self, component_instance_id: &str) -> Vec<StoredEvent>;

    /// Every component instance with at least one event.
    fn instances(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Event store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    /// event_id -> (component_instance_id, sequence)
    ids: HashMap<String, (String, u64)>,
    streams: HashMap<String, BTreeMap<u64, StoredEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventIndex for InMemoryEventStore {
    fn contains(&self, event_id: &str) -> bool {
        self.ids.contains_key(event_id)
    }

    fn max_sequence(&self, component_instance_id: &str) -> Option<u64> {
        self.streams
            .get(component_instance_id)?
            .keys()
            .next_back()
            .copied()
    }

    fn hash_at(&self, component_instance_id: &str, sequence: u64) -> Option<Sha256Digest> {
        self.streams
            .get(component_instance_id)?
            .get(&sequence)
            .map(|e| e.hash)
    }
}

impl EventStore for InMemoryEventStore {
    fn as_index(&self) -> &dyn EventIndex {
        self
    }

    fn insert(&mut self, event: StoredEvent) -> Result<(), GateError> {
        self.ids.insert(
            event.event_id.clone(),
            (event.component_instance_id.clone(), event.sequence),
        );
        self.streams
            .entry(event.component_instance_id.clone())
            .or_default()
            .insert(event.sequence, event);
        Ok(())
    }

    fn rollback(&mut self, event_id: &str) -> Result<(), GateError> {
        let (instance, sequence) = self
            .ids
            .remove(event_id)
            .ok_or_else(|| GateError::Store(format!("no stored event {event_id} to roll back")))?;
        if let Some(stream) = self.streams.get_mut(&instance) {
            stream.remove(&sequence);
            if stream.is_empty() {
                self.streams.remove(&instance);
            }
        }
        Ok(())
    }

    fn get(&self, event_id: &str) -> Option<StoredEvent> {
        let (instance, sequence) = self.ids.get(event_id)?;
        self.streams.get(instance)?.get(sequence).cloned()
    }

    fn events_for(&self, component_instance_id: &str) -> Vec<StoredEvent> {
        self.streams
            .get(component_instance_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    fn instances(&self) -> Vec<String> {
        let mut out: Vec<String> = self.streams.keys().cloned().collect();
        out.sort();
        out
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// JSON-lines event store. The in-memory index is rebuilt on open.
///
/// The file is locked for the lifetime of the store; a second open fails.
pub struct FileEventStore {
    path: PathBuf,
    log: JsonlAppender,
    index: InMemoryEventStore,
    /// (event_id, file length before it) of the latest insert.
    last_insert: Option<(String, u64)>,
}

impl FileEventStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GateError> {
        let path = path.into();
        let log = JsonlAppender::open_exclusive(&path).map_err(|e| GateError::Store(e.to_string()))?;

        let mut index = InMemoryEventStore::new();
        let reader = JsonlReader::<StoredEvent>::open(&path)
            .map_err(|e| GateError::Store(e.to_string()))?;
        for event in reader {
            index.insert(event.map_err(|e| GateError::Store(e.to_string()))?)?;
        }

        info!(path = %path.display(), events = index.len(), "opened event store");
        Ok(Self {
            path,
            log,
            index,
            last_insert: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventIndex for FileEventStore {
    fn contains(&self, event_id: &str) -> bool {
        self.index.contains(event_id)
    }

    fn max_sequence(&self, component_instance_id: &str) -> Option<u64> {
        self.index.max_sequence(component_instance_id)
    }

    fn hash_at(&self, component_instance_id: &str, sequence: u64) -> Option<Sha256Digest> {
        self.index.hash_at(component_instance_id, sequence)
    }
}

impl EventStore for FileEventStore {
    fn as_index(&self) -> &dyn EventIndex {
        self
    }

    fn insert(&mut self, event: StoredEvent) -> Result<(), GateError> {
        let offset = self
            .log
            .append(&event)
            .map_err(|e| GateError::Store(e.to_string()))?;
        self.last_insert = Some((event.event_id.clone(), offset));
        self.index.insert(event)
    }

    fn rollback(&mut self, event_id: &str) -> Result<(), GateError> {
        match self.last_insert.take() {
            Some((last, offset)) if last == event_id => {
                self.log
                    .truncate(offset)
                    .map_err(|e| GateError::Store(e.to_string()))?;
                self.index.rollback(event_id)
            }
            other => {
                self.last_insert = other;
                Err(GateError::Store(format!(
                    "{event_id} is not the latest insert; cannot roll back"
                )))
            }
        }
    }

    fn get(&self, event_id: &str) -> Option<StoredEvent> {
        self.index.get(event_id)
    }

    fn events_for(&self, component_instance_id: &str) -> Vec<StoredEvent> {
        self.index.events_for(component_instance_id)
    }

    fn instances(&self) -> Vec<String> {
        self.index.instances()
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::candidate;

    #[test]
    fn memory_index_tracks_ids_and_sequences() {
        let mut store = InMemoryEventStore::new();
        let first = candidate(0, None);
        store.insert(StoredEvent::from_admitted(&first)).unwrap();
        let second = candidate(1, Some(first.declared_hash()));
        store.insert(StoredEvent::from_admitted(&second)).unwrap();

        assert!(store.contains("e-0"));
        assert_eq!(store.max_sequence("agent-1"), Some(1));
        assert_eq!(store.hash_at("agent-1", 0), Some(first.declared_hash()));
        assert_eq!(store.max_sequence("other"), None);
        assert_eq!(store.events_for("agent-1").len(), 2);
    }

    #[test]
    fn file_store_rebuilds_index_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let first = candidate(0, None);
        {
            let mut store = FileEventStore::open(&path).unwrap();
            store.insert(StoredEvent::from_admitted(&first)).unwrap();
        }

        let store = FileEventStore::open(&path).unwrap();
        assert!(store.contains("e-0"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.hash_at("agent-1", 0), Some(first.declared_hash()));
        assert_eq!(store.instances(), vec!["agent-1".to_string()]);
    }

    #[test]
    fn memory_rollback_forgets_the_event() {
        let mut store = InMemoryEventStore::new();
        let first = candidate(0, None);
        store.insert(StoredEvent::from_admitted(&first)).unwrap();
        assert!(store.get("e-0").is_some());

        store.rollback("e-0").unwrap();
        assert!(!store.contains("e-0"));
        assert!(store.get("e-0").is_none());
        assert_eq!(store.max_sequence("agent-1"), None);
        assert!(store.instances().is_empty());
        assert!(store.rollback("e-0").is_err());
    }

    #[test]
    fn file_rollback_truncates_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let first = candidate(0, None);
        let second = candidate(1, Some(first.declared_hash()));
        {
            let mut store = FileEventStore::open(&path).unwrap();
            store.insert(StoredEvent::from_admitted(&first)).unwrap();
            let before = std::fs::metadata(&path).unwrap().len();
            store.insert(StoredEvent::from_admitted(&second)).unwrap();

            assert!(store.rollback("e-0").is_err());
            store.rollback("e-1").unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), before);
            assert_eq!(store.max_sequence("agent-1"), Some(0));
        }

        let store = FileEventStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains("e-0"));
    }

    #[test]
    fn second_open_of_file_store_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let _held = FileEventStore::open(&path).unwrap();
        assert!(matches!(FileEventStore::open(&path), Err(GateError::Store(_))));
    }

    #[test]
    fn stored_event_rehashes_from_envelope() {
        let stored = StoredEvent::from_admitted(&candidate(0, None));
        assert_eq!(stored.computed_hash().unwrap(), stored.hash);
    }
}
