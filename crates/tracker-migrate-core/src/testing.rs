//! In-memory reader and store used by the core unit tests.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::source::{RawRecord, SourceReader};
use crate::store::{StoreError, TargetStore, UnitOfWork, WriteError};
use crate::{EntityRecord, EntityType, MigrateError, NaturalKey, RecordDefaults, Timestamp};

pub fn defaults() -> RecordDefaults {
    let started = Timestamp::parse("2024-06-01T12:00:00Z")
        .unwrap_or_else(|| panic!("fixture timestamp must parse"));
    RecordDefaults::new(started)
}

pub fn raw(value: Value) -> RawRecord {
    match value {
        Value::Object(record) => record,
        other => panic!("fixture must be a JSON object, got {other}"),
    }
}

#[derive(Debug, Default)]
pub struct MemorySource {
    collections: BTreeMap<EntityType, Vec<RawRecord>>,
    failing: BTreeSet<EntityType>,
}

impl MemorySource {
    pub fn set(&mut self, entity: EntityType, records: Vec<Value>) {
        self.collections.insert(entity, records.into_iter().map(raw).collect());
    }

    pub fn fail_on(&mut self, entity: EntityType) {
        self.failing.insert(entity);
    }
}

impl SourceReader for MemorySource {
    fn load(&self, entity: EntityType) -> Result<Vec<RawRecord>, MigrateError> {
        if self.failing.contains(&entity) {
            return Err(MigrateError::read(entity, "collection unavailable"));
        }
        Ok(self.collections.get(&entity).cloned().unwrap_or_default())
    }
}

/// Committed rows plus knobs for injecting store failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Vec<EntityRecord>,
    pub reject_ids: BTreeSet<String>,
    pub abort_on_id: Option<String>,
    pub fail_begin: bool,
    pub fail_commit_for: Option<EntityType>,
    pub begins: usize,
    pub inserts: usize,
    pub rollbacks: usize,
}

impl MemoryStore {
    pub fn seed(&mut self, entity: EntityType, value: &Value) {
        let record = EntityRecord::from_raw(entity, &raw(value.clone()), &defaults())
            .unwrap_or_else(|err| panic!("seed record failed to coerce: {err}"));
        self.rows.push(record);
    }

    pub fn row_count(&self, entity: EntityType) -> usize {
        self.rows.iter().filter(|record| record.entity() == entity).count()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }
}

impl TargetStore for MemoryStore {
    type Unit<'a> = MemoryUnit<'a>;

    fn begin(&mut self) -> Result<Self::Unit<'_>, StoreError> {
        if self.fail_begin {
            return Err(StoreError::new("connection refused"));
        }
        self.begins += 1;
        Ok(MemoryUnit { store: self, pending: Vec::new() })
    }
}

pub struct MemoryUnit<'a> {
    store: &'a mut MemoryStore,
    pending: Vec<EntityRecord>,
}

impl MemoryUnit<'_> {
    fn visible(&self) -> impl Iterator<Item = &EntityRecord> {
        self.store.rows.iter().chain(self.pending.iter())
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn row_exists(&self, entity: EntityType, id: &str) -> Result<bool, StoreError> {
        Ok(self.visible().any(|record| record.entity() == entity && record.id() == id))
    }

    fn natural_key_exists(&self, key: &NaturalKey) -> Result<bool, StoreError> {
        Ok(self
            .visible()
            .any(|record| record.entity() == key.entity() && record.natural_key() == *key))
    }

    fn insert(&mut self, record: &EntityRecord) -> Result<(), WriteError> {
        if self.store.abort_on_id.as_deref() == Some(record.id()) {
            return Err(WriteError::Aborted("disk I/O error".to_string()));
        }
        if self.store.reject_ids.contains(record.id()) {
            return Err(WriteError::Rejected("CHECK constraint failed".to_string()));
        }
        if self.row_exists(record.entity(), record.id()).unwrap_or(false) {
            return Err(WriteError::Rejected(format!(
                "UNIQUE constraint failed: {}.id",
                record.entity()
            )));
        }
        self.store.inserts += 1;
        self.pending.push(record.clone());
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        if let Some(entity) = self.store.fail_commit_for {
            if self.pending.iter().any(|record| record.entity() == entity) {
                return Err(StoreError::new("database or disk is full"));
            }
        }
        self.store.rows.extend(self.pending);
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        self.store.rollbacks += 1;
        Ok(())
    }
}
