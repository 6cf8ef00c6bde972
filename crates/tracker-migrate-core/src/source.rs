use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::{EntityType, MigrateError};

/// An untyped source record: a JSON object keyed by field name.
pub type RawRecord = Map<String, Value>;

/// Sequential read access to the collections of a source document store.
pub trait SourceReader {
    /// Load every record of `entity`. An empty collection is not an error.
    ///
    /// # Errors
    /// Returns [`MigrateError::Read`] when the collection cannot be read or decoded.
    fn load(&self, entity: EntityType) -> Result<Vec<RawRecord>, MigrateError>;
}

/// Reads a directory of JSON export files, one file per collection.
///
/// Each file holds a top-level object whose array under the collection key lists the
/// records. Channel memberships have no file of their own; they are derived from the
/// `members` array nested in each channel.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(entity: EntityType) -> (&'static str, &'static str) {
        match entity {
            EntityType::Organization => ("organizations.json", "organizations"),
            EntityType::User => ("users.json", "users"),
            EntityType::Issue => ("issues.json", "issues"),
            EntityType::Channel | EntityType::ChannelMembership => ("channels.json", "channels"),
            EntityType::Conversation => ("conversations.json", "conversations"),
            EntityType::ConversationMessage => ("conversation_messages.json", "messages"),
        }
    }

    fn load_collection(&self, entity: EntityType) -> Result<Vec<RawRecord>, MigrateError> {
        let (file_name, key) = Self::file_for(entity);
        let path = self.root.join(file_name);
        let text = fs::read_to_string(&path).map_err(|err| {
            MigrateError::read(entity, format!("failed to read {}: {err}", path.display()))
        })?;
        let document: Value = serde_json::from_str(&text).map_err(|err| {
            MigrateError::read(entity, format!("failed to parse {}: {err}", path.display()))
        })?;

        let Some(items) = document.get(key).and_then(Value::as_array) else {
            return Err(MigrateError::read(
                entity,
                format!("{} has no `{key}` array", path.display()),
            ));
        };

        items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(record) => Ok(record.clone()),
                _ => Err(MigrateError::read(
                    entity,
                    format!("{}: `{key}[{index}]` is not an object", path.display()),
                )),
            })
            .collect()
    }
}

impl SourceReader for JsonDirSource {
    fn load(&self, entity: EntityType) -> Result<Vec<RawRecord>, MigrateError> {
        let records = self.load_collection(entity)?;
        if entity == EntityType::ChannelMembership {
            derive_memberships(&records)
        } else {
            Ok(records)
        }
    }
}

/// Flattens `channels[].members` into membership records.
///
/// A member is either an object (its `channel_id` is set from the enclosing channel)
/// or a bare user id. Missing membership ids default to `{channel_id}-{user_id}`.
fn derive_memberships(channels: &[RawRecord]) -> Result<Vec<RawRecord>, MigrateError> {
    let entity = EntityType::ChannelMembership;
    let mut memberships = Vec::new();

    for channel in channels {
        let Some(channel_id) = channel.get("id").and_then(Value::as_str) else {
            continue;
        };
        let members = match channel.get("members") {
            None | Some(Value::Null) => continue,
            Some(Value::Array(members)) => members,
            Some(_) => {
                return Err(MigrateError::read(
                    entity,
                    format!("channel `{channel_id}` has a non-array `members` field"),
                ))
            }
        };

        for member in members {
            let mut record = match member {
                Value::Object(record) => record.clone(),
                Value::String(user_id) => {
                    let mut record = Map::new();
                    record.insert("user_id".to_string(), Value::String(user_id.clone()));
                    record
                }
                _ => {
                    return Err(MigrateError::read(
                        entity,
                        format!("channel `{channel_id}` has a member that is neither an object nor a user id"),
                    ))
                }
            };
            record.insert("channel_id".to_string(), Value::String(channel_id.to_string()));
            if record.get("id").filter(|id| !id.is_null()).is_none() {
                let user_id = record.get("user_id").and_then(Value::as_str).unwrap_or_default();
                record.insert("id".to_string(), Value::String(format!("{channel_id}-{user_id}")));
            }
            memberships.push(record);
        }
    }

    Ok(memberships)
}

/// The record's `id` for reporting, or `<unknown>` when it has none.
#[must_use]
pub fn raw_record_id(raw: &RawRecord) -> String {
    match raw.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => "<unknown>".to_string(),
    }
}
