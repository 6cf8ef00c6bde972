use crate::store::{StoreError, UnitOfWork, WriteError};
use crate::EntityRecord;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteOutcome {
    Migrated,
    SkippedDuplicate,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum UpsertError {
    #[error("natural key lookup failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Insert `record` unless a row with the same natural key already exists.
///
/// Existing rows are never modified, so re-running a migration is a no-op for records
/// that already made it across.
///
/// # Errors
/// Returns [`UpsertError::Store`] when the natural-key lookup fails and
/// [`UpsertError::Write`] when the insert fails.
pub fn upsert<U: UnitOfWork + ?Sized>(
    unit: &mut U,
    record: &EntityRecord,
) -> Result<WriteOutcome, UpsertError> {
    if unit.natural_key_exists(&record.natural_key())? {
        return Ok(WriteOutcome::SkippedDuplicate);
    }
    unit.insert(record)?;
    Ok(WriteOutcome::Migrated)
}
