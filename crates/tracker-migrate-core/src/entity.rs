//! Typed entity records and the coercion step that produces them from raw source records.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::source::RawRecord;
use crate::EntityType;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum Malformed {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },
    #[error("field `{field}` has unsupported value `{value}`")]
    InvalidValue { field: &'static str, value: String },
    #[error("field `{field}` is not a recognized timestamp: `{value}`")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// A timestamp kept as the exact text the source provided.
///
/// Construction validates the text; the stored value is never reformatted.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Accepts RFC 3339, ISO-8601 local date-times (with `T` or a space separator,
    /// optional fractional seconds) and bare dates.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if is_recognized_timestamp(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Current UTC time rendered as RFC 3339.
    ///
    /// # Errors
    /// Returns an error when the system clock value cannot be formatted.
    pub fn now_utc() -> Result<Self, time::error::Format> {
        Self::from_offset(OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns an error when the value cannot be formatted as RFC 3339.
    pub fn from_offset(value: OffsetDateTime) -> Result<Self, time::error::Format> {
        value.format(&Rfc3339).map(Self)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_recognized_timestamp(raw: &str) -> bool {
    if OffsetDateTime::parse(raw, &Rfc3339).is_ok() {
        return true;
    }

    let local = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ];
    if local.iter().any(|items| PrimitiveDateTime::parse(raw, items).is_ok()) {
        return true;
    }

    Date::parse(raw, format_description!("[year]-[month]-[day]")).is_ok()
}

/// Values substituted for absent optional fields during coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDefaults {
    /// Used for an absent `created_at` / `joined_at`. Captured once per run.
    pub run_started_at: Timestamp,
}

impl RecordDefaults {
    #[must_use]
    pub fn new(run_started_at: Timestamp) -> Self {
        Self { run_started_at }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    ScrumMaster,
    Developer,
    Tester,
    ProjectManager,
}

impl UserRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::ScrumMaster => "scrum_master",
            Self::Developer => "developer",
            Self::Tester => "tester",
            Self::ProjectManager => "project_manager",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            "scrum_master" => Some(Self::ScrumMaster),
            "developer" => Some(Self::Developer),
            "tester" => Some(Self::Tester),
            "project_manager" => Some(Self::ProjectManager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Story,
    Task,
    Bug,
    Epic,
}

impl IssueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Story => "STORY",
            Self::Task => "TASK",
            Self::Bug => "BUG",
            Self::Epic => "EPIC",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STORY" => Some(Self::Story),
            "TASK" => Some(Self::Task),
            "BUG" => Some(Self::Bug),
            "EPIC" => Some(Self::Epic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

impl IssueStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Review => "REVIEW",
            Self::Done => "DONE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TODO" => Some(Self::Todo),
            "IN_PROGRESS" => Some(Self::InProgress),
            "REVIEW" => Some(Self::Review),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lowest => "LOWEST",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Highest => "HIGHEST",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOWEST" => Some(Self::Lowest),
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "HIGHEST" => Some(Self::Highest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub settings: Value,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub organization_id: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub password_hash: String,
    pub created_at: Timestamp,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub issue_type: IssueType,
    pub status: IssueStatus,
    pub priority: Priority,
    pub story_points: Option<i64>,
    pub assignee_id: Option<String>,
    pub reporter_id: Option<String>,
    pub organization_id: Option<String>,
    pub labels: Vec<String>,
    pub visibility: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub due_date: Option<Timestamp>,
    pub epic_id: Option<String>,
    pub sprint_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub organization_id: Option<String>,
    pub is_private: bool,
    pub created_at: Timestamp,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMembership {
    pub id: String,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub joined_at: Timestamp,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub channel_id: Option<String>,
    pub organization_id: Option<String>,
    pub title: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub content: String,
    pub message_type: String,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
    pub is_edited: bool,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityRecord {
    Organization(Organization),
    User(User),
    Issue(Issue),
    Channel(Channel),
    ChannelMembership(ChannelMembership),
    Conversation(Conversation),
    ConversationMessage(ConversationMessage),
}

/// The attribute set that decides whether a record was already migrated.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NaturalKey {
    entity: EntityType,
    parts: Vec<(&'static str, String)>,
}

impl NaturalKey {
    fn single(entity: EntityType, column: &'static str, value: &str) -> Self {
        Self { entity, parts: vec![(column, value.to_string())] }
    }

    #[must_use]
    pub fn entity(&self) -> EntityType {
        self.entity
    }

    /// `(column, value)` pairs; a row matches when every pair matches.
    #[must_use]
    pub fn parts(&self) -> &[(&'static str, String)] {
        &self.parts
    }
}

impl Display for NaturalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, (column, value)) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

impl EntityRecord {
    /// Coerce one raw source record of `entity` into its typed form.
    ///
    /// # Errors
    /// Returns [`Malformed`] when a required scalar field is absent or empty, a field has
    /// the wrong JSON type, an enumerated field has an unknown value, or a timestamp is
    /// not recognized.
    pub fn from_raw(
        entity: EntityType,
        raw: &RawRecord,
        defaults: &RecordDefaults,
    ) -> Result<Self, Malformed> {
        let fields = Fields { raw };
        let record = match entity {
            EntityType::Organization => Self::Organization(Organization {
                id: fields.required_str("id")?,
                name: fields.required_str("name")?,
                domain: fields.optional_str("domain")?,
                settings: fields.opaque_json("settings"),
                created_at: fields.timestamp_or("created_at", &defaults.run_started_at)?,
            }),
            EntityType::User => Self::User(User {
                id: fields.required_str("id")?,
                email: fields.required_str("email")?,
                name: fields.required_str("name")?,
                role: fields.required_enum("role", UserRole::parse)?,
                organization_id: fields.reference("organization_id")?,
                avatar: fields.optional_str("avatar")?,
                is_active: fields.bool_or("is_active", true)?,
                password_hash: fields.required_str("password_hash")?,
                created_at: fields.timestamp_or("created_at", &defaults.run_started_at)?,
                profile_picture: fields.optional_str("profile_picture")?,
            }),
            EntityType::Issue => {
                let created_at = fields.timestamp_or("created_at", &defaults.run_started_at)?;
                Self::Issue(Issue {
                    id: fields.required_str("id")?,
                    key: fields.required_str("key")?,
                    title: fields.required_str("title")?,
                    description: fields.optional_str("description")?,
                    issue_type: fields.required_enum("issue_type", IssueType::parse)?,
                    status: fields.enum_or("status", IssueStatus::parse, IssueStatus::Todo)?,
                    priority: fields.enum_or("priority", Priority::parse, Priority::Medium)?,
                    story_points: fields.optional_integer("story_points")?,
                    assignee_id: fields.reference("assignee_id")?,
                    reporter_id: fields.reference("reporter_id")?,
                    organization_id: fields.reference("organization_id")?,
                    labels: fields.string_list("labels")?,
                    visibility: fields.optional_str("visibility")?.unwrap_or_else(|| "team".to_string()),
                    updated_at: fields.timestamp_or("updated_at", &created_at)?,
                    created_at,
                    due_date: fields.optional_timestamp("due_date")?,
                    epic_id: fields.optional_str("epic_id")?,
                    sprint_id: fields.optional_str("sprint_id")?,
                })
            }
            EntityType::Channel => Self::Channel(Channel {
                id: fields.required_str("id")?,
                name: fields.required_str("name")?,
                description: fields.optional_str("description")?,
                organization_id: fields.reference("organization_id")?,
                is_private: fields.bool_or("is_private", false)?,
                created_at: fields.timestamp_or("created_at", &defaults.run_started_at)?,
                created_by: fields.optional_str("created_by")?,
            }),
            EntityType::ChannelMembership => Self::ChannelMembership(ChannelMembership {
                id: fields.required_str("id")?,
                channel_id: fields.reference("channel_id")?,
                user_id: fields.reference("user_id")?,
                joined_at: fields.timestamp_or("joined_at", &defaults.run_started_at)?,
                role: fields.optional_str("role")?.unwrap_or_else(|| "member".to_string()),
            }),
            EntityType::Conversation => {
                let created_at = fields.timestamp_or("created_at", &defaults.run_started_at)?;
                Self::Conversation(Conversation {
                    id: fields.required_str("id")?,
                    channel_id: fields.reference("channel_id")?,
                    organization_id: fields.reference("organization_id")?,
                    title: fields.optional_str("title")?,
                    updated_at: fields.timestamp_or("updated_at", &created_at)?,
                    created_at,
                    is_active: fields.bool_or("is_active", true)?,
                })
            }
            EntityType::ConversationMessage => Self::ConversationMessage(ConversationMessage {
                id: fields.required_str("id")?,
                conversation_id: fields.reference("conversation_id")?,
                sender_id: fields.reference("sender_id")?,
                content: fields.required_str("content")?,
                message_type: fields
                    .optional_str("message_type")?
                    .unwrap_or_else(|| "text".to_string()),
                created_at: fields.timestamp_or("created_at", &defaults.run_started_at)?,
                edited_at: fields.optional_timestamp("edited_at")?,
                is_edited: fields.bool_or("is_edited", false)?,
                metadata: fields.opaque_json("metadata"),
            }),
        };
        Ok(record)
    }

    #[must_use]
    pub fn entity(&self) -> EntityType {
        match self {
            Self::Organization(_) => EntityType::Organization,
            Self::User(_) => EntityType::User,
            Self::Issue(_) => EntityType::Issue,
            Self::Channel(_) => EntityType::Channel,
            Self::ChannelMembership(_) => EntityType::ChannelMembership,
            Self::Conversation(_) => EntityType::Conversation,
            Self::ConversationMessage(_) => EntityType::ConversationMessage,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Organization(record) => &record.id,
            Self::User(record) => &record.id,
            Self::Issue(record) => &record.id,
            Self::Channel(record) => &record.id,
            Self::ChannelMembership(record) => &record.id,
            Self::Conversation(record) => &record.id,
            Self::ConversationMessage(record) => &record.id,
        }
    }

    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        let entity = self.entity();
        match self {
            Self::User(record) => NaturalKey::single(entity, "email", &record.email),
            Self::Issue(record) => NaturalKey::single(entity, "key", &record.key),
            Self::ChannelMembership(record) => NaturalKey {
                entity,
                parts: vec![
                    ("channel_id", record.channel_id.clone().unwrap_or_default()),
                    ("user_id", record.user_id.clone().unwrap_or_default()),
                ],
            },
            Self::Organization(_)
            | Self::Channel(_)
            | Self::Conversation(_)
            | Self::ConversationMessage(_) => NaturalKey::single(entity, "id", self.id()),
        }
    }

    /// Value of the foreign-key field `field`, or `None` when absent or not a
    /// foreign key of this entity.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<&str> {
        let value = match (self, field) {
            (Self::User(record), "organization_id") => &record.organization_id,
            (Self::Issue(record), "organization_id") => &record.organization_id,
            (Self::Issue(record), "assignee_id") => &record.assignee_id,
            (Self::Issue(record), "reporter_id") => &record.reporter_id,
            (Self::Channel(record), "organization_id") => &record.organization_id,
            (Self::ChannelMembership(record), "channel_id") => &record.channel_id,
            (Self::ChannelMembership(record), "user_id") => &record.user_id,
            (Self::Conversation(record), "channel_id") => &record.channel_id,
            (Self::Conversation(record), "organization_id") => &record.organization_id,
            (Self::ConversationMessage(record), "conversation_id") => &record.conversation_id,
            (Self::ConversationMessage(record), "sender_id") => &record.sender_id,
            _ => return None,
        };
        value.as_deref()
    }
}

struct Fields<'a> {
    raw: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// JSON `null` is treated the same as an absent field.
    fn value(&self, name: &str) -> Option<&'a Value> {
        self.raw.get(name).filter(|value| !value.is_null())
    }

    fn required_str(&self, name: &'static str) -> Result<String, Malformed> {
        match self.value(name) {
            Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
            Some(Value::String(_)) | None => Err(Malformed::MissingField(name)),
            Some(_) => Err(Malformed::WrongType { field: name, expected: "a string" }),
        }
    }

    fn optional_str(&self, name: &'static str) -> Result<Option<String>, Malformed> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(Malformed::WrongType { field: name, expected: "a string" }),
        }
    }

    /// Foreign-key values. An empty string carries no reference.
    fn reference(&self, name: &'static str) -> Result<Option<String>, Malformed> {
        Ok(self.optional_str(name)?.filter(|value| !value.trim().is_empty()))
    }

    fn bool_or(&self, name: &'static str, default: bool) -> Result<bool, Malformed> {
        match self.value(name) {
            None => Ok(default),
            Some(Value::Bool(value)) => Ok(*value),
            Some(_) => Err(Malformed::WrongType { field: name, expected: "a boolean" }),
        }
    }

    fn optional_integer(&self, name: &'static str) -> Result<Option<i64>, Malformed> {
        match self.value(name) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or(Malformed::WrongType { field: name, expected: "an integer" }),
        }
    }

    fn string_list(&self, name: &'static str) -> Result<Vec<String>, Malformed> {
        let Some(value) = self.value(name) else {
            return Ok(Vec::new());
        };
        let wrong_type = Malformed::WrongType { field: name, expected: "an array of strings" };
        let Value::Array(items) = value else {
            return Err(wrong_type);
        };
        items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| wrong_type.clone()))
            .collect()
    }

    fn opaque_json(&self, name: &str) -> Value {
        self.value(name).cloned().unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn required_enum<T>(
        &self,
        name: &'static str,
        parse: fn(&str) -> Option<T>,
    ) -> Result<T, Malformed> {
        let value = self.required_str(name)?;
        parse(&value).ok_or(Malformed::InvalidValue { field: name, value })
    }

    fn enum_or<T>(
        &self,
        name: &'static str,
        parse: fn(&str) -> Option<T>,
        default: T,
    ) -> Result<T, Malformed> {
        match self.optional_str(name)? {
            None => Ok(default),
            Some(value) => parse(&value).ok_or(Malformed::InvalidValue { field: name, value }),
        }
    }

    fn optional_timestamp(&self, name: &'static str) -> Result<Option<Timestamp>, Malformed> {
        match self.optional_str(name)? {
            None => Ok(None),
            Some(value) => match Timestamp::parse(&value) {
                Some(timestamp) => Ok(Some(timestamp)),
                None => Err(Malformed::InvalidTimestamp { field: name, value }),
            },
        }
    }

    fn timestamp_or(&self, name: &'static str, default: &Timestamp) -> Result<Timestamp, Malformed> {
        Ok(self.optional_timestamp(name)?.unwrap_or_else(|| default.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{defaults, raw};

    fn coerce(entity: EntityType, value: Value) -> Result<EntityRecord, Malformed> {
        EntityRecord::from_raw(entity, &raw(value), &defaults())
    }

    #[test]
    fn timestamps_accept_source_formats_and_keep_text_verbatim() {
        for value in [
            "2024-01-15T10:30:00Z",
            "2024-01-15T10:30:00.123456+00:00",
            "2024-01-15T10:30:00.123456",
            "2024-01-15T10:30:00",
            "2024-01-15 10:30:00.5",
            "2024-01-15 10:30:00",
            "2024-01-15",
        ] {
            let parsed = Timestamp::parse(value);
            assert_eq!(parsed.as_ref().map(Timestamp::as_str), Some(value), "format {value}");
        }

        for value in ["", "yesterday", "2024-13-40T99:00:00", "15/01/2024"] {
            assert!(Timestamp::parse(value).is_none(), "accepted {value}");
        }
    }

    #[test]
    fn user_coercion_applies_documented_defaults() {
        let record = coerce(
            EntityType::User,
            json!({
                "id": "u-1",
                "email": "ana@example.com",
                "name": "Ana",
                "role": "developer",
                "organization_id": "org-1",
                "password_hash": "hash"
            }),
        );
        let Ok(EntityRecord::User(user)) = record else {
            panic!("expected a user record, got {record:?}");
        };

        assert!(user.is_active);
        assert_eq!(user.avatar, None);
        assert_eq!(user.created_at, defaults().run_started_at);
        assert_eq!(user.organization_id.as_deref(), Some("org-1"));
    }

    #[test]
    fn issue_coercion_defaults_status_priority_and_updated_at() {
        let record = coerce(
            EntityType::Issue,
            json!({
                "id": "i-1",
                "key": "MT-1",
                "title": "Login",
                "issue_type": "STORY",
                "reporter_id": "u-1",
                "organization_id": "org-1",
                "created_at": "2024-02-01T09:00:00",
                "labels": ["auth", "web"]
            }),
        );
        let Ok(EntityRecord::Issue(issue)) = record else {
            panic!("expected an issue record, got {record:?}");
        };

        assert_eq!(issue.status, IssueStatus::Todo);
        assert_eq!(issue.priority, Priority::Medium);
        assert_eq!(issue.visibility, "team");
        assert_eq!(issue.updated_at.as_str(), "2024-02-01T09:00:00");
        assert_eq!(issue.labels, vec!["auth".to_string(), "web".to_string()]);
        assert_eq!(issue.assignee_id, None);
    }

    #[test]
    fn missing_or_empty_required_scalars_are_malformed() {
        let missing_key = coerce(
            EntityType::Issue,
            json!({"id": "i-1", "title": "t", "issue_type": "BUG", "reporter_id": "u"}),
        );
        assert_eq!(missing_key, Err(Malformed::MissingField("key")));

        let empty_email = coerce(
            EntityType::User,
            json!({"id": "u-1", "email": "  ", "name": "n", "role": "admin", "password_hash": "h"}),
        );
        assert_eq!(empty_email, Err(Malformed::MissingField("email")));

        let no_id = coerce(EntityType::Organization, json!({"name": "Acme"}));
        assert_eq!(no_id, Err(Malformed::MissingField("id")));
    }

    #[test]
    fn unknown_enum_values_and_bad_types_are_malformed() {
        let bad_role = coerce(
            EntityType::User,
            json!({"id": "u", "email": "e", "name": "n", "role": "owner", "password_hash": "h"}),
        );
        assert_eq!(
            bad_role,
            Err(Malformed::InvalidValue { field: "role", value: "owner".to_string() })
        );

        let bad_points = coerce(
            EntityType::Issue,
            json!({"id": "i", "key": "K-1", "title": "t", "issue_type": "TASK", "story_points": "five"}),
        );
        assert_eq!(
            bad_points,
            Err(Malformed::WrongType { field: "story_points", expected: "an integer" })
        );

        let bad_timestamp =
            coerce(EntityType::Channel, json!({"id": "c", "name": "general", "created_at": "soon"}));
        assert_eq!(
            bad_timestamp,
            Err(Malformed::InvalidTimestamp { field: "created_at", value: "soon".to_string() })
        );
    }

    #[test]
    fn absent_or_empty_references_coerce_to_none() {
        let record = coerce(
            EntityType::Conversation,
            json!({"id": "cv-1", "channel_id": "", "organization_id": null}),
        );
        let Ok(record) = record else {
            panic!("expected conversation to coerce: {record:?}");
        };

        assert_eq!(record.reference("channel_id"), None);
        assert_eq!(record.reference("organization_id"), None);
        assert_eq!(record.reference("not_a_field"), None);
    }

    #[test]
    fn natural_keys_follow_entity_identity_rules() {
        let user = coerce(
            EntityType::User,
            json!({"id": "u-9", "email": "x@example.com", "name": "X", "role": "tester", "password_hash": "h"}),
        );
        let membership = coerce(
            EntityType::ChannelMembership,
            json!({"id": "m-1", "channel_id": "c-1", "user_id": "u-9"}),
        );
        let message = coerce(
            EntityType::ConversationMessage,
            json!({"id": "msg-1", "conversation_id": "cv", "sender_id": "u", "content": "hi"}),
        );

        let keys = [user, membership, message]
            .into_iter()
            .map(|record| match record {
                Ok(record) => record.natural_key().to_string(),
                Err(err) => panic!("fixture failed to coerce: {err}"),
            })
            .collect::<Vec<_>>();

        assert_eq!(keys, vec!["email=x@example.com", "channel_id=c-1, user_id=u-9", "id=msg-1"]);
    }

    #[test]
    fn opaque_blobs_are_preserved_and_default_to_empty_object() {
        let record = coerce(
            EntityType::ConversationMessage,
            json!({
                "id": "msg-1",
                "conversation_id": "cv",
                "sender_id": "u",
                "content": "hi",
                "metadata": {"reactions": [{"emoji": "+1", "count": 2}]}
            }),
        );
        let Ok(EntityRecord::ConversationMessage(message)) = record else {
            panic!("expected a message record, got {record:?}");
        };
        assert_eq!(message.metadata, json!({"reactions": [{"emoji": "+1", "count": 2}]}));
        assert_eq!(message.message_type, "text");

        let record = coerce(EntityType::Organization, json!({"id": "org", "name": "Acme"}));
        let Ok(EntityRecord::Organization(organization)) = record else {
            panic!("expected an organization record, got {record:?}");
        };
        assert_eq!(organization.settings, json!({}));
    }
}
