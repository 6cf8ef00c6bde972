use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::report::{EntityReport, MigrationReport, RecordOutcome};
use crate::source::{raw_record_id, RawRecord, SourceReader};
use crate::store::{StoreError, TargetStore, UnitOfWork, WriteError};
use crate::validate::{classify, Classification};
use crate::writer::{upsert, UpsertError, WriteOutcome};
use crate::{DependencyGraph, EntityType, ForeignKey, MigrateError, RecordDefaults};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PipelineState {
    Idle,
    Reading(EntityType),
    Ordering,
    Processing(EntityType),
    Reporting,
    Done,
    Failed,
}

/// One migration run from a [`SourceReader`] into a [`TargetStore`].
///
/// Every collection is read before anything is written, so a read failure leaves the
/// target untouched. Each entity type is then processed inside its own unit of work.
pub struct Pipeline<'a, R: ?Sized, S> {
    reader: &'a R,
    store: &'a mut S,
    graph: DependencyGraph,
    defaults: RecordDefaults,
    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl<'a, R, S> Pipeline<'a, R, S>
where
    R: SourceReader + ?Sized,
    S: TargetStore,
{
    pub fn new(reader: &'a R, store: &'a mut S, defaults: RecordDefaults) -> Self {
        Self {
            reader,
            store,
            graph: DependencyGraph::standard(),
            defaults,
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
        }
    }

    #[must_use]
    pub fn with_graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = graph;
        self
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, starting with [`PipelineState::Idle`].
    #[must_use]
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    /// Run the migration to completion.
    ///
    /// # Errors
    /// Returns the fatal [`MigrateError`] that moved the run to
    /// [`PipelineState::Failed`]. Batches committed before the failure remain.
    pub fn run(&mut self) -> Result<MigrationReport, MigrateError> {
        match self.execute() {
            Ok(report) => {
                self.transition(PipelineState::Done);
                Ok(report)
            }
            Err(err) => {
                tracing::error!(state = ?self.state, error = %err, "migration failed");
                self.transition(PipelineState::Failed);
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> Result<MigrationReport, MigrateError> {
        let mut collections = BTreeMap::new();
        for entity in self.graph.entities().to_vec() {
            self.transition(PipelineState::Reading(entity));
            let records = self.reader.load(entity)?;
            info!(entity = %entity, records = records.len(), "read collection");
            collections.insert(entity, records);
        }

        self.transition(PipelineState::Ordering);
        let order = self.graph.processing_order()?;
        let rendered = order.iter().map(|entity| entity.as_str()).collect::<Vec<_>>();
        info!(order = %rendered.join(" -> "), "resolved processing order");

        let mut report = MigrationReport::default();
        for entity in order {
            self.transition(PipelineState::Processing(entity));
            let records = collections.remove(&entity).unwrap_or_default();
            let foreign_keys = self.graph.foreign_keys_of(entity);
            let entry =
                process_entity(&mut *self.store, entity, &records, &foreign_keys, &self.defaults)?;
            report.push(entry);
        }

        self.transition(PipelineState::Reporting);
        Ok(report)
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
        self.transitions.push(next);
    }
}

fn lookup_failed(entity: EntityType, err: &StoreError) -> MigrateError {
    MigrateError::connection(format!("lookup failed while processing {entity}: {err}"))
}

fn process_entity<S: TargetStore>(
    store: &mut S,
    entity: EntityType,
    records: &[RawRecord],
    foreign_keys: &[ForeignKey],
    defaults: &RecordDefaults,
) -> Result<EntityReport, MigrateError> {
    let mut entry = EntityReport::new(entity);
    let mut unit = store.begin().map_err(|err| {
        MigrateError::connection(format!("failed to begin unit of work for {entity}: {err}"))
    })?;
    let mut migrated_ids = Vec::new();

    for (index, raw) in records.iter().enumerate() {
        let classification = classify(&unit, entity, raw, foreign_keys, defaults)
            .map_err(|err| lookup_failed(entity, &err))?;
        let record = match classification {
            Classification::Valid(record) => record,
            Classification::Orphaned { record_id, reason } => {
                warn!(entity = %entity, record_id = %record_id, reason = %reason, "skipping orphaned record");
                entry.record(&record_id, RecordOutcome::SkippedMissingReference, Some(reason));
                continue;
            }
            Classification::Malformed { record_id, reason } => {
                warn!(entity = %entity, record_id = %record_id, reason = %reason, "skipping malformed record");
                entry.record(&record_id, RecordOutcome::Malformed, Some(reason));
                continue;
            }
        };

        match upsert(&mut unit, &record) {
            Ok(WriteOutcome::Migrated) => {
                entry.record(record.id(), RecordOutcome::Migrated, None);
                migrated_ids.push(record.id().to_string());
            }
            Ok(WriteOutcome::SkippedDuplicate) => {
                let reason = format!("duplicate natural key: {}", record.natural_key());
                debug!(entity = %entity, record_id = %record.id(), reason = %reason, "skipping duplicate");
                entry.record(record.id(), RecordOutcome::SkippedDuplicate, Some(reason));
            }
            Err(UpsertError::Store(err)) => return Err(lookup_failed(entity, &err)),
            Err(UpsertError::Write(WriteError::Rejected(reason))) => {
                warn!(entity = %entity, record_id = %record.id(), reason = %reason, "write rejected");
                entry.record(record.id(), RecordOutcome::Failed, Some(reason));
            }
            Err(UpsertError::Write(WriteError::Aborted(reason))) => {
                if let Err(err) = unit.rollback() {
                    warn!(entity = %entity, error = %err, "rollback after abort failed");
                }
                let unprocessed = records[index..].iter().map(raw_record_id).collect::<Vec<_>>();
                warn!(
                    entity = %entity,
                    rolled_back = migrated_ids.len(),
                    unprocessed = unprocessed.len(),
                    reason = %reason,
                    "batch aborted"
                );
                entry.abort_batch(&reason, &migrated_ids, &unprocessed);
                return Ok(entry);
            }
        }
    }

    if let Err(err) = unit.commit() {
        warn!(entity = %entity, rolled_back = migrated_ids.len(), error = %err, "commit failed; batch aborted");
        entry.abort_batch(err.message(), &migrated_ids, &[]);
        return Ok(entry);
    }

    let counts = entry.counts;
    info!(
        entity = %entity,
        attempted = counts.attempted,
        migrated = counts.migrated,
        skipped_duplicate = counts.skipped_duplicate,
        skipped_missing_reference = counts.skipped_missing_reference,
        malformed = counts.malformed,
        failed = counts.failed,
        "entity type processed"
    );
    Ok(entry)
}
