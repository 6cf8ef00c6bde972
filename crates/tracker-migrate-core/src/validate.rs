use crate::source::raw_record_id;
use crate::store::{StoreError, UnitOfWork};
use crate::{EntityRecord, EntityType, ForeignKey, RawRecord, RecordDefaults};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    Valid,
    /// Names the first unresolved reference, e.g. `missing reference: sender_id -> u-9`.
    Orphaned(String),
}

/// Check every foreign key of `record` against rows visible to `unit`.
///
/// Keys are checked in the order given and the first failure wins. An optional key is
/// satisfied when absent; once present it must resolve like a required one.
///
/// # Errors
/// Returns [`StoreError`] when a lookup fails.
pub fn check_references<U: UnitOfWork + ?Sized>(
    unit: &U,
    record: &EntityRecord,
    foreign_keys: &[ForeignKey],
) -> Result<Verdict, StoreError> {
    for fk in foreign_keys.iter().filter(|fk| fk.entity == record.entity()) {
        match record.reference(fk.field) {
            None if !fk.required => {}
            None => {
                return Ok(Verdict::Orphaned(format!("missing reference: {} -> <none>", fk.field)));
            }
            Some(id) => {
                if !unit.row_exists(fk.references, id)? {
                    return Ok(Verdict::Orphaned(format!(
                        "missing reference: {} -> {id}",
                        fk.field
                    )));
                }
            }
        }
    }
    Ok(Verdict::Valid)
}

/// Result of coercing and reference-checking one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Valid(EntityRecord),
    Orphaned { record_id: String, reason: String },
    Malformed { record_id: String, reason: String },
}

/// Coerce `raw` into a typed record of `entity` and check its references.
///
/// # Errors
/// Returns [`StoreError`] when a reference lookup fails.
pub fn classify<U: UnitOfWork + ?Sized>(
    unit: &U,
    entity: EntityType,
    raw: &RawRecord,
    foreign_keys: &[ForeignKey],
    defaults: &RecordDefaults,
) -> Result<Classification, StoreError> {
    let record = match EntityRecord::from_raw(entity, raw, defaults) {
        Ok(record) => record,
        Err(err) => {
            return Ok(Classification::Malformed {
                record_id: raw_record_id(raw),
                reason: err.to_string(),
            })
        }
    };

    match check_references(unit, &record, foreign_keys)? {
        Verdict::Valid => Ok(Classification::Valid(record)),
        Verdict::Orphaned(reason) => {
            Ok(Classification::Orphaned { record_id: record.id().to_string(), reason })
        }
    }
}
