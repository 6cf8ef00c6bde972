//! Migration engine for moving tracker collections from a JSON document store into a
//! relational store with enforced foreign keys.
//!
//! The engine is generic over a [`SourceReader`] and a [`TargetStore`]. Entity types are
//! processed in the order derived from [`DependencyGraph`]; every record is coerced into a
//! typed [`EntityRecord`], checked against the target store for unresolved references and
//! inserted only when its natural key is not already present.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub mod entity;
pub mod graph;
pub mod locator;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod store;
pub mod validate;
pub mod writer;

#[cfg(test)]
mod testing;

pub use entity::{
    Channel, ChannelMembership, Conversation, ConversationMessage, EntityRecord, Issue,
    IssueStatus, IssueType, Malformed, NaturalKey, Organization, Priority, RecordDefaults,
    Timestamp, User, UserRole,
};
pub use graph::{resolve_order, DependencyGraph, ForeignKey, FOREIGN_KEYS};
pub use locator::{redact_locator, StoreFamily, StoreLocator};
pub use pipeline::{Pipeline, PipelineState};
pub use report::{EntityReport, MigrationReport, OutcomeCounts, RecordOutcome, SkipDetail};
pub use source::{raw_record_id, JsonDirSource, RawRecord, SourceReader};
pub use store::{StoreError, TargetStore, UnitOfWork, WriteError};
pub use validate::{check_references, classify, Classification, Verdict};
pub use writer::{upsert, UpsertError, WriteOutcome};

/// Fatal errors. Any of these moves the pipeline to [`PipelineState::Failed`].
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MigrateError {
    #[error("read error for {entity}: {message}")]
    Read { entity: EntityType, message: String },
    #[error("cyclic dependency among entity types: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
    #[error("dependency graph references undeclared entity type `{0}`")]
    UnknownEntity(String),
    #[error("connection error: {0}")]
    Connection(String),
}

impl MigrateError {
    pub fn read(entity: EntityType, message: impl Into<String>) -> Self {
        Self::Read { entity, message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EntityType {
    #[serde(rename = "organizations")]
    Organization,
    #[serde(rename = "users")]
    User,
    #[serde(rename = "issues")]
    Issue,
    #[serde(rename = "channels")]
    Channel,
    #[serde(rename = "channel_memberships")]
    ChannelMembership,
    #[serde(rename = "conversations")]
    Conversation,
    #[serde(rename = "conversation_messages")]
    ConversationMessage,
}

impl EntityType {
    /// Every entity type in declaration order. Declaration order is the tie-breaker
    /// used by [`resolve_order`].
    pub const ALL: [Self; 7] = [
        Self::Organization,
        Self::User,
        Self::Issue,
        Self::Channel,
        Self::ChannelMembership,
        Self::Conversation,
        Self::ConversationMessage,
    ];

    /// Collection name, which is also the target table name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organizations",
            Self::User => "users",
            Self::Issue => "issues",
            Self::Channel => "channels",
            Self::ChannelMembership => "channel_memberships",
            Self::Conversation => "conversations",
            Self::ConversationMessage => "conversation_messages",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entity| entity.as_str() == value)
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
