use cellar_schema::{AttributeValue, EntityName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Store-allocated identifier of a managed object. Never reused within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Persisted form of one object: its entity and attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub entity: EntityName,
    pub values: BTreeMap<String, AttributeValue>,
}

impl StoredRecord {
    pub fn new(entity: impl Into<EntityName>, values: BTreeMap<String, AttributeValue>) -> Self {
        Self {
            entity: entity.into(),
            values,
        }
    }
}

/// The pending work of one commit, applied all-or-nothing by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    inserted: BTreeMap<ObjectId, StoredRecord>,
    updated: BTreeMap<ObjectId, StoredRecord>,
    deleted: BTreeSet<ObjectId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ObjectId, record: StoredRecord) {
        self.inserted.insert(id, record);
    }

    pub fn update(&mut self, id: ObjectId, record: StoredRecord) {
        self.updated.insert(id, record);
    }

    pub fn delete(&mut self, id: ObjectId) {
        self.deleted.insert(id);
    }

    pub fn inserted(&self) -> &BTreeMap<ObjectId, StoredRecord> {
        &self.inserted
    }

    pub fn updated(&self) -> &BTreeMap<ObjectId, StoredRecord> {
        &self.updated
    }

    pub fn deleted(&self) -> &BTreeSet<ObjectId> {
        &self.deleted
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub generation: u64,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitReceipt {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_display() {
        assert_eq!(ObjectId::new(42).to_string(), "#42");
        assert_eq!(ObjectId::new(42).get(), 42);
    }

    #[test]
    fn object_id_serializes_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(ObjectId::new(5), "five");
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"5":"five"}"#);
        let back: BTreeMap<ObjectId, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[&ObjectId::new(5)], "five");
    }

    #[test]
    fn change_set_counts_all_kinds() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());
        changes.insert(ObjectId::new(1), StoredRecord::new("Task", BTreeMap::new()));
        changes.update(ObjectId::new(2), StoredRecord::new("Task", BTreeMap::new()));
        changes.delete(ObjectId::new(3));
        changes.delete(ObjectId::new(3));
        assert_eq!(changes.len(), 3);
        assert!(!changes.is_empty());
        assert!(changes.deleted().contains(&ObjectId::new(3)));
    }
}
