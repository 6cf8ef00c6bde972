use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::EntityType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Migrated,
    SkippedDuplicate,
    SkippedMissingReference,
    Malformed,
    Failed,
}

impl RecordOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::SkippedMissingReference => "skipped_missing_reference",
            Self::Malformed => "malformed",
            Self::Failed => "failed",
        }
    }
}

/// Per-outcome counters. `attempted` always equals the sum of the other five.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct OutcomeCounts {
    pub attempted: usize,
    pub migrated: usize,
    pub skipped_duplicate: usize,
    pub skipped_missing_reference: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: RecordOutcome) {
        self.attempted += 1;
        match outcome {
            RecordOutcome::Migrated => self.migrated += 1,
            RecordOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            RecordOutcome::SkippedMissingReference => self.skipped_missing_reference += 1,
            RecordOutcome::Malformed => self.malformed += 1,
            RecordOutcome::Failed => self.failed += 1,
        }
    }

    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.attempted
            == self.migrated
                + self.skipped_duplicate
                + self.skipped_missing_reference
                + self.malformed
                + self.failed
    }

    pub fn absorb(&mut self, other: &Self) {
        self.attempted += other.attempted;
        self.migrated += other.migrated;
        self.skipped_duplicate += other.skipped_duplicate;
        self.skipped_missing_reference += other.skipped_missing_reference;
        self.malformed += other.malformed;
        self.failed += other.failed;
    }

    fn rows(&self) -> [(&'static str, usize); 6] {
        [
            ("attempted", self.attempted),
            ("migrated", self.migrated),
            ("skipped_duplicate", self.skipped_duplicate),
            ("skipped_missing_reference", self.skipped_missing_reference),
            ("malformed", self.malformed),
            ("failed", self.failed),
        ]
    }
}

/// Why a record did not end up migrated.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SkipDetail {
    pub record_id: String,
    pub outcome: RecordOutcome,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EntityReport {
    pub entity: EntityType,
    pub counts: OutcomeCounts,
    /// Store message when this type's batch was rolled back.
    pub aborted: Option<String>,
    pub skips: Vec<SkipDetail>,
}

impl EntityReport {
    #[must_use]
    pub fn new(entity: EntityType) -> Self {
        Self { entity, counts: OutcomeCounts::default(), aborted: None, skips: Vec::new() }
    }

    pub fn record(&mut self, record_id: &str, outcome: RecordOutcome, reason: Option<String>) {
        self.counts.record(outcome);
        if let Some(reason) = reason {
            self.skips.push(SkipDetail { record_id: record_id.to_string(), outcome, reason });
        }
    }

    /// Reclassify a rolled-back batch: every record counted `migrated` so far and every
    /// record not yet processed becomes `failed`.
    pub fn abort_batch(&mut self, reason: &str, rolled_back_ids: &[String], unprocessed_ids: &[String]) {
        self.counts.failed += self.counts.migrated;
        self.counts.migrated = 0;
        for record_id in rolled_back_ids {
            self.skips.push(SkipDetail {
                record_id: record_id.clone(),
                outcome: RecordOutcome::Failed,
                reason: format!("rolled back: {reason}"),
            });
        }
        for record_id in unprocessed_ids {
            self.record(record_id, RecordOutcome::Failed, Some(format!("batch aborted: {reason}")));
        }
        self.aborted = Some(reason.to_string());
    }
}

/// Per-type results in processing order plus the grand total.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MigrationReport {
    pub entities: Vec<EntityReport>,
    pub total: OutcomeCounts,
}

impl MigrationReport {
    pub fn push(&mut self, entry: EntityReport) {
        self.total.absorb(&entry.counts);
        self.entities.push(entry);
    }

    #[must_use]
    pub fn entity(&self, entity: EntityType) -> Option<&EntityReport> {
        self.entities.iter().find(|entry| entry.entity == entity)
    }

    #[must_use]
    pub fn aborted_batches(&self) -> Vec<EntityType> {
        self.entities
            .iter()
            .filter(|entry| entry.aborted.is_some())
            .map(|entry| entry.entity)
            .collect()
    }
}

impl Display for MigrationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entities {
            writeln!(f, "{}", entry.entity)?;
            for (label, value) in entry.counts.rows() {
                writeln!(f, "  {label:<27}{value:>8}")?;
            }
            if let Some(reason) = &entry.aborted {
                writeln!(f, "  batch aborted: {reason}")?;
            }
        }

        writeln!(f, "total")?;
        for (label, value) in self.total.rows() {
            writeln!(f, "  {label:<27}{value:>8}")?;
        }

        write!(f, "status=done")?;
        for (label, value) in self.total.rows() {
            write!(f, " {label}={value}")?;
        }
        let aborted = self.aborted_batches();
        if !aborted.is_empty() {
            let names = aborted.iter().map(|entity| entity.as_str()).collect::<Vec<_>>();
            write!(f, " aborted_batches={}", names.join(","))?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn outcome() -> impl Strategy<Value = RecordOutcome> {
        prop_oneof![
            Just(RecordOutcome::Migrated),
            Just(RecordOutcome::SkippedDuplicate),
            Just(RecordOutcome::SkippedMissingReference),
            Just(RecordOutcome::Malformed),
            Just(RecordOutcome::Failed),
        ]
    }

    // Counters stay balanced through any sequence of outcomes and any abort point.
    proptest! {
        #[test]
        fn counters_balance_through_aborts(
            outcomes in proptest::collection::vec(outcome(), 0..40),
            abort_at in proptest::option::of(0_usize..40),
        ) {
            let mut entry = EntityReport::new(EntityType::Conversation);
            let mut migrated_ids = Vec::new();
            let cut = abort_at.map_or(outcomes.len(), |at| at.min(outcomes.len()));

            for (index, outcome) in outcomes[..cut].iter().enumerate() {
                let id = format!("cv-{index}");
                if *outcome == RecordOutcome::Migrated {
                    migrated_ids.push(id.clone());
                }
                entry.record(&id, *outcome, None);
            }
            if abort_at.is_some() {
                let unprocessed = (cut..outcomes.len()).map(|index| format!("cv-{index}")).collect::<Vec<_>>();
                entry.abort_batch("disk full", &migrated_ids, &unprocessed);
                prop_assert_eq!(entry.counts.migrated, 0);
            }

            prop_assert_eq!(entry.counts.attempted, outcomes.len());
            prop_assert!(entry.counts.is_balanced());

            let mut report = MigrationReport::default();
            report.push(entry.clone());
            report.push(entry);
            prop_assert!(report.total.is_balanced());
            prop_assert_eq!(report.total.attempted, outcomes.len() * 2);
        }
    }

    #[test]
    fn abort_moves_migrated_and_unprocessed_records_to_failed() {
        let mut entry = EntityReport::new(EntityType::Issue);
        entry.record("i-1", RecordOutcome::Migrated, None);
        entry.record("i-2", RecordOutcome::SkippedDuplicate, None);
        entry.record("i-3", RecordOutcome::Migrated, None);
        entry.record("i-4", RecordOutcome::Malformed, Some("missing required field `key`".to_string()));

        entry.abort_batch(
            "disk I/O error",
            &["i-1".to_string(), "i-3".to_string()],
            &["i-5".to_string(), "i-6".to_string()],
        );

        assert_eq!(
            entry.counts,
            OutcomeCounts {
                attempted: 6,
                migrated: 0,
                skipped_duplicate: 1,
                skipped_missing_reference: 0,
                malformed: 1,
                failed: 4,
            }
        );
        assert!(entry.counts.is_balanced());
        assert_eq!(entry.aborted.as_deref(), Some("disk I/O error"));
        assert_eq!(entry.skips.len(), 5);
    }

    #[test]
    fn totals_accumulate_across_types() {
        let mut report = MigrationReport::default();
        let mut organizations = EntityReport::new(EntityType::Organization);
        organizations.record("org-1", RecordOutcome::Migrated, None);
        organizations.record("org-2", RecordOutcome::Migrated, None);
        let mut channels = EntityReport::new(EntityType::Channel);
        channels.record(
            "c-1",
            RecordOutcome::SkippedMissingReference,
            Some("missing reference: organization_id -> org-x".to_string()),
        );
        report.push(organizations);
        report.push(channels);

        assert_eq!(report.total.attempted, 3);
        assert_eq!(report.total.migrated, 2);
        assert_eq!(report.total.skipped_missing_reference, 1);
        assert!(report.total.is_balanced());
        assert!(report.aborted_batches().is_empty());
    }

    #[test]
    fn console_rendering_lists_types_total_and_status_line() {
        let mut report = MigrationReport::default();
        let mut users = EntityReport::new(EntityType::User);
        users.record("u-1", RecordOutcome::Migrated, None);
        users.abort_batch("database is locked", &["u-1".to_string()], &[]);
        report.push(users);

        let rendered = report.to_string();
        let lines = rendered.lines().collect::<Vec<_>>();

        assert_eq!(lines.first().copied(), Some("users"));
        assert!(lines.contains(&"  batch aborted: database is locked"));
        assert!(lines.contains(&"total"));
        assert_eq!(
            lines.last().copied(),
            Some(
                "status=done attempted=1 migrated=0 skipped_duplicate=0 \
                 skipped_missing_reference=0 malformed=0 failed=1 aborted_batches=users"
            )
        );
    }

    #[test]
    fn report_serializes_with_collection_names() -> Result<(), serde_json::Error> {
        let mut report = MigrationReport::default();
        report.push(EntityReport::new(EntityType::ConversationMessage));

        let value = serde_json::to_value(&report)?;
        assert_eq!(value["entities"][0]["entity"], "conversation_messages");
        assert_eq!(value["total"]["attempted"], 0);
        Ok(())
    }
}
