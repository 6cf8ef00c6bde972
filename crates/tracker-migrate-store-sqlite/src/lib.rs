use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracker_migrate_core::{
    EntityRecord, EntityType, NaturalKey, RawRecord, RecordDefaults, StoreError, StoreLocator,
    TargetStore, Timestamp, UnitOfWork, WriteError,
};

/// Tracker tables, created only when missing. Existing tables are never altered.
const TARGET_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS organizations (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  domain TEXT,
  settings TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  email TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('super_admin','admin','scrum_master','developer','tester','project_manager')),
  organization_id TEXT NOT NULL,
  avatar TEXT,
  is_active INTEGER NOT NULL DEFAULT 1,
  password_hash TEXT NOT NULL,
  created_at TEXT NOT NULL,
  profile_picture TEXT,
  FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE TABLE IF NOT EXISTS issues (
  id TEXT PRIMARY KEY,
  key TEXT NOT NULL UNIQUE,
  title TEXT NOT NULL,
  description TEXT,
  issue_type TEXT NOT NULL CHECK (issue_type IN ('STORY','TASK','BUG','EPIC')),
  status TEXT NOT NULL DEFAULT 'TODO' CHECK (status IN ('TODO','IN_PROGRESS','REVIEW','DONE')),
  priority TEXT NOT NULL DEFAULT 'MEDIUM' CHECK (priority IN ('LOWEST','LOW','MEDIUM','HIGH','HIGHEST')),
  story_points INTEGER,
  assignee_id TEXT,
  reporter_id TEXT NOT NULL,
  organization_id TEXT NOT NULL,
  labels TEXT NOT NULL DEFAULT '[]',
  visibility TEXT NOT NULL DEFAULT 'team',
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  due_date TEXT,
  epic_id TEXT,
  sprint_id TEXT,
  FOREIGN KEY (assignee_id) REFERENCES users(id),
  FOREIGN KEY (reporter_id) REFERENCES users(id),
  FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE TABLE IF NOT EXISTS channels (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT,
  organization_id TEXT NOT NULL,
  is_private INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  created_by TEXT,
  FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE TABLE IF NOT EXISTS channel_memberships (
  id TEXT PRIMARY KEY,
  channel_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  joined_at TEXT NOT NULL,
  role TEXT NOT NULL DEFAULT 'member',
  UNIQUE (channel_id, user_id),
  FOREIGN KEY (channel_id) REFERENCES channels(id),
  FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS conversations (
  id TEXT PRIMARY KEY,
  channel_id TEXT NOT NULL,
  organization_id TEXT NOT NULL,
  title TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  is_active INTEGER NOT NULL DEFAULT 1,
  FOREIGN KEY (channel_id) REFERENCES channels(id),
  FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE TABLE IF NOT EXISTS conversation_messages (
  id TEXT PRIMARY KEY,
  conversation_id TEXT NOT NULL,
  sender_id TEXT NOT NULL,
  content TEXT NOT NULL,
  message_type TEXT NOT NULL DEFAULT 'text',
  created_at TEXT NOT NULL,
  edited_at TEXT,
  is_edited INTEGER NOT NULL DEFAULT 0,
  metadata TEXT NOT NULL DEFAULT '{}',
  FOREIGN KEY (conversation_id) REFERENCES conversations(id),
  FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_users_organization ON users(organization_id);
CREATE INDEX IF NOT EXISTS idx_issues_organization ON issues(organization_id);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON conversation_messages(conversation_id);
";

const BOOLEAN_COLUMNS: [&str; 3] = ["is_active", "is_private", "is_edited"];
const JSON_COLUMNS: [&str; 3] = ["settings", "labels", "metadata"];

/// SQLite-backed target store for migrated tracker rows.
pub struct SqliteStore {
    conn: Connection,
}

/// A row whose foreign key points at a missing parent row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    /// The referencing column, e.g. `sender_id`.
    pub column: String,
    pub parent: String,
}

/// Post-run health of the target store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub clean: bool,
    /// Messages from `PRAGMA quick_check`; a single `ok` when the file is sound.
    pub quick_check: Vec<String>,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub row_counts: BTreeMap<EntityType, usize>,
}

impl SqliteStore {
    /// Open a SQLite database file and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        Self::configure(conn)
    }

    /// # Errors
    /// Returns an error when the in-memory database cannot be created or configured.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::configure(conn)
    }

    /// # Errors
    /// Returns an error when the located database cannot be opened.
    pub fn open_locator(locator: &StoreLocator) -> Result<Self> {
        match locator {
            StoreLocator::SqliteFile(path) => Self::open(path),
            StoreLocator::SqliteMemory => Self::open_in_memory(),
            StoreLocator::Server { family, .. } => Err(anyhow!(
                "unsupported store family `{family}`; only sqlite targets can be opened"
            )),
        }
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Create every target table that does not exist yet. Safe to call on every run.
    ///
    /// # Errors
    /// Returns an error when the table definitions cannot be applied.
    pub fn initialize_schema(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start schema transaction")?;
        tx.execute_batch(TARGET_SCHEMA_SQL).context("failed to create tracker tables")?;
        tx.commit().context("failed to commit schema transaction")?;

        tracing::debug!(tables = EntityType::ALL.len(), "target schema ready");
        Ok(())
    }

    /// Names of the tables present in the database, sorted.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .context("failed to read sqlite catalog")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<rusqlite::Result<Vec<_>>>().context("failed to read table name")
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_rows(&self, entity: EntityType) -> Result<usize> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", entity.as_str()), [], |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count rows in {entity}"))?;
        usize::try_from(count).context("row count out of range")
    }

    /// Read a migrated row back as a typed record.
    ///
    /// # Errors
    /// Returns an error when the query fails or the stored row cannot be decoded.
    pub fn load_record(&self, entity: EntityType, id: &str) -> Result<Option<EntityRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} WHERE id = ?1", entity.as_str()))
            .with_context(|| format!("failed to prepare lookup on {entity}"))?;
        let columns = stmt.column_names().into_iter().map(str::to_string).collect::<Vec<_>>();
        let mut rows = stmt.query(params![id])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let raw = row_to_raw(entity, row, &columns)?;

        // Every timestamp column is NOT NULL, so coercion defaults are never used here.
        let defaults = RecordDefaults::new(
            Timestamp::from_offset(OffsetDateTime::UNIX_EPOCH)
                .context("failed to format epoch timestamp")?,
        );
        EntityRecord::from_raw(entity, &raw, &defaults)
            .map(Some)
            .map_err(|err| anyhow!("stored {entity} row `{id}` does not decode: {err}"))
    }

    /// Check the file with `PRAGMA quick_check`, list every row whose foreign key does
    /// not resolve, and count the rows of each tracker table.
    ///
    /// # Errors
    /// Returns an error when one of the check queries fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut quick =
            self.conn.prepare("PRAGMA quick_check").context("failed to prepare quick_check")?;
        let quick_check = quick
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to run PRAGMA quick_check")?;

        let mut column_of = self
            .conn
            .prepare(r#"SELECT "from" FROM pragma_foreign_key_list(?1) WHERE id = ?2"#)
            .context("failed to prepare foreign key lookup")?;
        let mut check = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare foreign_key_check")?;
        let mut rows = check.query([])?;
        let mut foreign_key_violations = Vec::new();
        while let Some(row) = rows.next()? {
            let table: String = row.get(0)?;
            let key_id: i64 = row.get(3)?;
            let column = column_of
                .query_row(params![table, key_id], |found| found.get::<_, String>(0))
                .with_context(|| format!("failed to resolve foreign key {key_id} of {table}"))?;
            foreign_key_violations.push(ForeignKeyViolation {
                rowid: row.get(1)?,
                column,
                parent: row.get(2)?,
                table,
            });
        }

        let row_counts = EntityType::ALL
            .into_iter()
            .map(|entity| Ok((entity, self.count_rows(entity)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(IntegrityReport {
            clean: quick_check == ["ok"] && foreign_key_violations.is_empty(),
            quick_check,
            foreign_key_violations,
            row_counts,
        })
    }
}

impl TargetStore for SqliteStore {
    type Unit<'a> = SqliteUnit<'a>;

    fn begin(&mut self) -> Result<Self::Unit<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| StoreError::new(format!("failed to start transaction: {err}")))?;
        Ok(SqliteUnit { tx })
    }
}

/// One entity-type batch inside an immediate transaction.
pub struct SqliteUnit<'conn> {
    tx: Transaction<'conn>,
}

impl SqliteUnit<'_> {
    fn exists(&self, sql: &str, values: &[&str]) -> Result<bool, StoreError> {
        let exists = self
            .tx
            .query_row(sql, params_from_iter(values.iter()), |row| row.get::<_, i64>(0))
            .map_err(|err| StoreError::new(format!("lookup failed: {err}")))?;
        Ok(exists == 1)
    }

    fn classify_write_error(&self, err: &rusqlite::Error) -> WriteError {
        let unit_lost = match err {
            rusqlite::Error::SqliteFailure(failure, _) => matches!(
                failure.code,
                ErrorCode::DiskFull
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::ReadOnly
            ),
            _ => false,
        };

        // SQLite may roll the transaction back on its own after some failures.
        if unit_lost || self.tx.is_autocommit() {
            WriteError::Aborted(err.to_string())
        } else {
            WriteError::Rejected(err.to_string())
        }
    }

    fn execute_insert(&self, record: &EntityRecord) -> rusqlite::Result<usize> {
        match record {
            EntityRecord::Organization(org) => self.tx.execute(
                "INSERT INTO organizations(id, name, domain, settings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![org.id, org.name, org.domain, org.settings.to_string(), org.created_at.as_str()],
            ),
            EntityRecord::User(user) => self.tx.execute(
                "INSERT INTO users(
                    id, email, name, role, organization_id, avatar, is_active,
                    password_hash, created_at, profile_picture
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user.id,
                    user.email,
                    user.name,
                    user.role.as_str(),
                    user.organization_id,
                    user.avatar,
                    user.is_active,
                    user.password_hash,
                    user.created_at.as_str(),
                    user.profile_picture,
                ],
            ),
            EntityRecord::Issue(issue) => self.tx.execute(
                "INSERT INTO issues(
                    id, key, title, description, issue_type, status, priority, story_points,
                    assignee_id, reporter_id, organization_id, labels, visibility,
                    created_at, updated_at, due_date, epic_id, sprint_id
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                    ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18
                 )",
                params![
                    issue.id,
                    issue.key,
                    issue.title,
                    issue.description,
                    issue.issue_type.as_str(),
                    issue.status.as_str(),
                    issue.priority.as_str(),
                    issue.story_points,
                    issue.assignee_id,
                    issue.reporter_id,
                    issue.organization_id,
                    Value::from(issue.labels.clone()).to_string(),
                    issue.visibility,
                    issue.created_at.as_str(),
                    issue.updated_at.as_str(),
                    issue.due_date.as_ref().map(Timestamp::as_str),
                    issue.epic_id,
                    issue.sprint_id,
                ],
            ),
            EntityRecord::Channel(channel) => self.tx.execute(
                "INSERT INTO channels(
                    id, name, description, organization_id, is_private, created_at, created_by
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    channel.id,
                    channel.name,
                    channel.description,
                    channel.organization_id,
                    channel.is_private,
                    channel.created_at.as_str(),
                    channel.created_by,
                ],
            ),
            EntityRecord::ChannelMembership(membership) => self.tx.execute(
                "INSERT INTO channel_memberships(id, channel_id, user_id, joined_at, role)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    membership.id,
                    membership.channel_id,
                    membership.user_id,
                    membership.joined_at.as_str(),
                    membership.role,
                ],
            ),
            EntityRecord::Conversation(conversation) => self.tx.execute(
                "INSERT INTO conversations(
                    id, channel_id, organization_id, title, created_at, updated_at, is_active
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation.id,
                    conversation.channel_id,
                    conversation.organization_id,
                    conversation.title,
                    conversation.created_at.as_str(),
                    conversation.updated_at.as_str(),
                    conversation.is_active,
                ],
            ),
            EntityRecord::ConversationMessage(message) => self.tx.execute(
                "INSERT INTO conversation_messages(
                    id, conversation_id, sender_id, content, message_type,
                    created_at, edited_at, is_edited, metadata
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.content,
                    message.message_type,
                    message.created_at.as_str(),
                    message.edited_at.as_ref().map(Timestamp::as_str),
                    message.is_edited,
                    message.metadata.to_string(),
                ],
            ),
        }
    }
}

impl UnitOfWork for SqliteUnit<'_> {
    fn row_exists(&self, entity: EntityType, id: &str) -> Result<bool, StoreError> {
        self.exists(&format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", entity.as_str()), &[id])
    }

    fn natural_key_exists(&self, key: &NaturalKey) -> Result<bool, StoreError> {
        let predicate = key
            .parts()
            .iter()
            .enumerate()
            .map(|(index, (column, _))| format!("{column} = ?{}", index + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let values = key.parts().iter().map(|(_, value)| value.as_str()).collect::<Vec<_>>();
        self.exists(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE {predicate})", key.entity().as_str()),
            &values,
        )
    }

    fn insert(&mut self, record: &EntityRecord) -> Result<(), WriteError> {
        self.execute_insert(record).map(|_| ()).map_err(|err| self.classify_write_error(&err))
    }

    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(|err| StoreError::new(format!("commit failed: {err}")))
    }

    fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().map_err(|err| StoreError::new(format!("rollback failed: {err}")))
    }
}

fn row_to_raw(entity: EntityType, row: &rusqlite::Row<'_>, columns: &[String]) -> Result<RawRecord> {
    let mut raw = RawRecord::new();
    for (index, column) in columns.iter().enumerate() {
        let value = match row.get_ref(index)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(value) if BOOLEAN_COLUMNS.contains(&column.as_str()) => {
                Value::Bool(value != 0)
            }
            ValueRef::Integer(value) => Value::from(value),
            ValueRef::Real(value) => Value::from(value),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .with_context(|| format!("{entity}.{column} is not valid UTF-8"))?;
                if JSON_COLUMNS.contains(&column.as_str()) {
                    serde_json::from_str(text)
                        .with_context(|| format!("{entity}.{column} holds invalid JSON"))?
                } else {
                    Value::String(text.to_string())
                }
            }
            ValueRef::Blob(_) => return Err(anyhow!("unexpected blob in {entity}.{column}")),
        };
        raw.insert(column.clone(), value);
    }
    Ok(raw)
}
