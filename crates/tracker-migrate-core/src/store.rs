//! Target-store interface used by the pipeline.
//!
//! A store hands out one [`UnitOfWork`] per entity-type batch. Rows inserted through a
//! unit are visible to that unit's lookups immediately and become durable only on
//! [`UnitOfWork::commit`]. Dropping a unit without committing discards its writes.

use crate::{EntityRecord, EntityType, NaturalKey};

/// A failed lookup or transaction-control call against the target store.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A failed insert.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum WriteError {
    /// The store refused this record (constraint violation). The unit stays usable.
    #[error("rejected by store: {0}")]
    Rejected(String),
    /// The unit itself is no longer usable and must be rolled back.
    #[error("unit of work aborted: {0}")]
    Aborted(String),
}

pub trait TargetStore {
    type Unit<'a>: UnitOfWork
    where
        Self: 'a;

    /// Start a unit of work covering one entity-type batch.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the store cannot start a transaction.
    fn begin(&mut self) -> Result<Self::Unit<'_>, StoreError>;
}

pub trait UnitOfWork {
    /// Whether a row of `entity` with primary key `id` exists, counting rows inserted
    /// earlier in this unit.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the lookup fails.
    fn row_exists(&self, entity: EntityType, id: &str) -> Result<bool, StoreError>;

    /// Whether a row matching every part of `key` exists, counting rows inserted
    /// earlier in this unit.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the lookup fails.
    fn natural_key_exists(&self, key: &NaturalKey) -> Result<bool, StoreError>;

    /// # Errors
    /// Returns [`WriteError::Rejected`] for a record-level refusal and
    /// [`WriteError::Aborted`] when the unit can no longer be used.
    fn insert(&mut self, record: &EntityRecord) -> Result<(), WriteError>;

    /// # Errors
    /// Returns [`StoreError`] when the commit fails; nothing from the unit persists.
    fn commit(self) -> Result<(), StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the rollback call itself fails.
    fn rollback(self) -> Result<(), StoreError>;
}
