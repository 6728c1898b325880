//! SQLite-based mail mirror storage with zstd-compressed message bodies

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::MailStore;
use crate::models::{
    Attachment, EmailAddress, Integration, IntegrationId, IntegrationStatus, Message, MessageFlags,
    MessageId, ThreadId, WorkspaceId,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One integration per (workspace, provider, account)
            CREATE TABLE integrations (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                account_email TEXT NOT NULL,
                credential_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                last_checkpoint TEXT,
                last_sync_at TEXT,
                total_synced INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                resume_page_token TEXT,
                run_started_at TEXT,
                UNIQUE (workspace_id, provider, account_email)
            );

            -- Mirrored messages, keyed by (workspace, provider message id)
            CREATE TABLE messages (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                integration_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                from_name TEXT,
                from_email TEXT NOT NULL,
                to_json TEXT NOT NULL DEFAULT '[]',
                cc_json TEXT NOT NULL DEFAULT '[]',
                bcc_json TEXT NOT NULL DEFAULT '[]',
                subject TEXT NOT NULL,
                snippet TEXT NOT NULL,
                attachments_json TEXT NOT NULL DEFAULT '[]',
                labels_json TEXT NOT NULL DEFAULT '[]',
                sent_at TEXT NOT NULL,
                received_at TEXT NOT NULL,
                internal_date INTEGER NOT NULL,
                deleted_at TEXT,
                has_body_text INTEGER NOT NULL DEFAULT 0,
                has_body_html INTEGER NOT NULL DEFAULT 0,
                body_text BLOB,  -- zstd compressed
                body_html BLOB,  -- zstd compressed
                PRIMARY KEY (workspace_id, id)
            );

            CREATE INDEX idx_messages_workspace_received
                ON messages(workspace_id, received_at DESC);

            -- Durable hand-off queue for the enrichment worker
            CREATE TABLE enrichment_queue (
                workspace_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                queued_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (workspace_id, message_id)
            );
            "#,
        ),
    ])
}

/// SQLite-based mail mirror storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Create a new SQLite mail store at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers and crash recovery; NORMAL sync is
        // safe under WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessageRow> {
        Ok(RawMessageRow {
            workspace_id: row.get(0)?,
            id: row.get(1)?,
            integration_id: row.get(2)?,
            thread_id: row.get(3)?,
            from_name: row.get(4)?,
            from_email: row.get(5)?,
            to_json: row.get(6)?,
            cc_json: row.get(7)?,
            bcc_json: row.get(8)?,
            subject: row.get(9)?,
            snippet: row.get(10)?,
            attachments_json: row.get(11)?,
            labels_json: row.get(12)?,
            sent_at: row.get(13)?,
            received_at: row.get(14)?,
            internal_date: row.get(15)?,
            deleted_at: row.get(16)?,
            body_text: row.get(17)?,
            body_html: row.get(18)?,
        })
    }

    fn load_integration_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawIntegrationRow> {
        Ok(RawIntegrationRow {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            provider: row.get(2)?,
            account_email: row.get(3)?,
            credential_ref: row.get(4)?,
            status: row.get(5)?,
            last_checkpoint: row.get(6)?,
            last_sync_at: row.get(7)?,
            total_synced: row.get(8)?,
            last_error: row.get(9)?,
            resume_page_token: row.get(10)?,
            run_started_at: row.get(11)?,
        })
    }
}

const MESSAGE_COLUMNS: &str = "workspace_id, id, integration_id, thread_id, from_name, from_email,
    to_json, cc_json, bcc_json, subject, snippet, attachments_json, labels_json,
    sent_at, received_at, internal_date, deleted_at, body_text, body_html";

const INTEGRATION_COLUMNS: &str = "id, workspace_id, provider, account_email, credential_ref,
    status, last_checkpoint, last_sync_at, total_synced, last_error,
    resume_page_token, run_started_at";

/// Raw message row before JSON/zstd decoding
struct RawMessageRow {
    workspace_id: String,
    id: String,
    integration_id: String,
    thread_id: String,
    from_name: Option<String>,
    from_email: String,
    to_json: String,
    cc_json: String,
    bcc_json: String,
    subject: String,
    snippet: String,
    attachments_json: String,
    labels_json: String,
    sent_at: String,
    received_at: String,
    internal_date: i64,
    deleted_at: Option<String>,
    body_text: Option<Vec<u8>>,
    body_html: Option<Vec<u8>>,
}

impl RawMessageRow {
    fn into_message(self) -> Result<Message> {
        let to: Vec<EmailAddress> =
            serde_json::from_str(&self.to_json).context("Failed to parse to_json")?;
        let cc: Vec<EmailAddress> =
            serde_json::from_str(&self.cc_json).context("Failed to parse cc_json")?;
        let bcc: Vec<EmailAddress> =
            serde_json::from_str(&self.bcc_json).context("Failed to parse bcc_json")?;
        let attachments: Vec<Attachment> =
            serde_json::from_str(&self.attachments_json).context("Failed to parse attachments")?;
        let labels: Vec<String> =
            serde_json::from_str(&self.labels_json).context("Failed to parse labels")?;

        let body_text = self
            .body_text
            .map(|data| decompress_text(&data))
            .transpose()?;
        let body_html = self
            .body_html
            .map(|data| decompress_text(&data))
            .transpose()?;

        let flags = MessageFlags::from_labels(&labels);

        Ok(Message {
            id: MessageId::new(self.id),
            workspace_id: WorkspaceId::new(self.workspace_id),
            integration_id: self.integration_id,
            thread_id: ThreadId::new(self.thread_id),
            from: EmailAddress {
                name: self.from_name,
                email: self.from_email,
            },
            to,
            cc,
            bcc,
            subject: self.subject,
            snippet: self.snippet,
            body_text,
            body_html,
            attachments,
            labels,
            flags,
            sent_at: parse_timestamp(&self.sent_at),
            received_at: parse_timestamp(&self.received_at),
            internal_date: self.internal_date,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp_str),
        })
    }
}

/// Raw integration row before enum/timestamp decoding
struct RawIntegrationRow {
    id: String,
    workspace_id: String,
    provider: String,
    account_email: String,
    credential_ref: String,
    status: String,
    last_checkpoint: Option<String>,
    last_sync_at: Option<String>,
    total_synced: i64,
    last_error: Option<String>,
    resume_page_token: Option<String>,
    run_started_at: Option<String>,
}

impl RawIntegrationRow {
    fn into_integration(self) -> Result<Integration> {
        let status = IntegrationStatus::parse(&self.status)
            .with_context(|| format!("Unknown integration status {:?}", self.status))?;

        Ok(Integration {
            id: IntegrationId::new(self.id),
            workspace_id: WorkspaceId::new(self.workspace_id),
            provider: self.provider,
            account_email: self.account_email,
            credential_ref: self.credential_ref,
            status,
            last_checkpoint: self.last_checkpoint.map(crate::models::Checkpoint::new),
            last_sync_at: self.last_sync_at.as_deref().map(parse_timestamp_str),
            total_synced: self.total_synced as u64,
            last_error: self.last_error,
            resume_page_token: self.resume_page_token,
            run_started_at: self.run_started_at.as_deref().map(parse_timestamp_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    parse_timestamp_str(s)
}

fn parse_timestamp_str(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn decompress_text(data: &[u8]) -> Result<String> {
    let bytes = zstd::decode_all(data).context("Failed to decompress message body")?;
    String::from_utf8(bytes).context("Decompressed body is not UTF-8")
}

impl MailStore for SqliteMailStore {
    fn upsert_message(&self, message: Message) -> Result<()> {
        // Compress bodies with zstd (level 3 = good balance of speed vs compression)
        let body_text_compressed = message
            .body_text
            .as_ref()
            .map(|text| zstd::encode_all(text.as_bytes(), 3))
            .transpose()
            .context("Failed to compress body_text")?;

        let body_html_compressed = message
            .body_html
            .as_ref()
            .map(|html| zstd::encode_all(html.as_bytes(), 3))
            .transpose()
            .context("Failed to compress body_html")?;

        let has_body_text = body_text_compressed.is_some();
        let has_body_html = body_html_compressed.is_some();

        let to_json = serde_json::to_string(&message.to)?;
        let cc_json = serde_json::to_string(&message.cc)?;
        let bcc_json = serde_json::to_string(&message.bcc)?;
        let attachments_json = serde_json::to_string(&message.attachments)?;
        let labels_json = serde_json::to_string(&message.labels)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages
             (workspace_id, id, integration_id, thread_id, from_name, from_email,
              to_json, cc_json, bcc_json, subject, snippet, attachments_json,
              labels_json, sent_at, received_at, internal_date, deleted_at,
              has_body_text, has_body_html, body_text, body_html)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(workspace_id, id) DO UPDATE SET
                integration_id = excluded.integration_id,
                thread_id = excluded.thread_id,
                from_name = excluded.from_name,
                from_email = excluded.from_email,
                to_json = excluded.to_json,
                cc_json = excluded.cc_json,
                bcc_json = excluded.bcc_json,
                subject = excluded.subject,
                snippet = excluded.snippet,
                attachments_json = excluded.attachments_json,
                labels_json = excluded.labels_json,
                sent_at = excluded.sent_at,
                received_at = excluded.received_at,
                internal_date = excluded.internal_date,
                deleted_at = excluded.deleted_at,
                has_body_text = excluded.has_body_text,
                has_body_html = excluded.has_body_html,
                body_text = excluded.body_text,
                body_html = excluded.body_html",
            params![
                message.workspace_id.as_str(),
                message.id.as_str(),
                message.integration_id,
                message.thread_id.as_str(),
                message.from.name,
                message.from.email,
                to_json,
                cc_json,
                bcc_json,
                message.subject,
                message.snippet,
                attachments_json,
                labels_json,
                message.sent_at.to_rfc3339(),
                message.received_at.to_rfc3339(),
                message.internal_date,
                message.deleted_at.map(|d| d.to_rfc3339()),
                has_body_text,
                has_body_html,
                body_text_compressed,
                body_html_compressed,
            ],
        )?;

        Ok(())
    }

    fn get_message(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE workspace_id = ? AND id = ?",
                    MESSAGE_COLUMNS
                ),
                params![workspace_id.as_str(), id.as_str()],
                Self::load_message_row,
            )
            .optional()?;

        row.map(RawMessageRow::into_message).transpose()
    }

    fn has_message(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE workspace_id = ? AND id = ?",
            params![workspace_id.as_str(), id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn soft_delete_message(
        &self,
        workspace_id: &WorkspaceId,
        id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        // The guarded UPDATE keeps the original tombstone on replay; a
        // second query distinguishes "already tombstoned" from "never
        // mirrored".
        let updated = conn.execute(
            "UPDATE messages SET deleted_at = ?
             WHERE workspace_id = ? AND id = ? AND deleted_at IS NULL",
            params![at.to_rfc3339(), workspace_id.as_str(), id.as_str()],
        )?;
        if updated > 0 {
            return Ok(true);
        }

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE workspace_id = ? AND id = ?",
            params![workspace_id.as_str(), id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists > 0)
    }

    fn update_message_labels(
        &self,
        workspace_id: &WorkspaceId,
        id: &MessageId,
        labels: Vec<String>,
    ) -> Result<bool> {
        let labels_json = serde_json::to_string(&labels)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE messages SET labels_json = ? WHERE workspace_id = ? AND id = ?",
            params![labels_json, workspace_id.as_str(), id.as_str()],
        )?;
        Ok(updated > 0)
    }

    fn list_messages(
        &self,
        workspace_id: &WorkspaceId,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let filter = if include_deleted {
            ""
        } else {
            "AND deleted_at IS NULL"
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE workspace_id = ? {}
             ORDER BY received_at DESC LIMIT ?",
            MESSAGE_COLUMNS, filter
        ))?;

        let rows = stmt
            .query_map(params![workspace_id.as_str(), limit as i64], Self::load_message_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawMessageRow::into_message).collect()
    }

    fn count_messages(&self, workspace_id: &WorkspaceId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE workspace_id = ?",
            [workspace_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn create_integration(&self, integration: Integration) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO integrations
             (id, workspace_id, provider, account_email, credential_ref, status,
              last_checkpoint, last_sync_at, total_synced, last_error,
              resume_page_token, run_started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                integration.id.as_str(),
                integration.workspace_id.as_str(),
                integration.provider,
                integration.account_email,
                integration.credential_ref,
                integration.status.as_str(),
                integration.last_checkpoint.as_ref().map(|c| c.as_str()),
                integration.last_sync_at.map(|t| t.to_rfc3339()),
                integration.total_synced as i64,
                integration.last_error,
                integration.resume_page_token,
                integration.run_started_at.map(|t| t.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!(
                    "integration already exists for {}/{}/{}",
                    integration.workspace_id.as_str(),
                    integration.provider,
                    integration.account_email
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_integration(&self, id: &IntegrationId) -> Result<Option<Integration>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM integrations WHERE id = ?", INTEGRATION_COLUMNS),
                [id.as_str()],
                Self::load_integration_row,
            )
            .optional()?;

        row.map(RawIntegrationRow::into_integration).transpose()
    }

    fn find_integration(
        &self,
        workspace_id: &WorkspaceId,
        provider: &str,
        account_email: &str,
    ) -> Result<Option<Integration>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM integrations
                     WHERE workspace_id = ? AND provider = ? AND account_email = ?",
                    INTEGRATION_COLUMNS
                ),
                params![workspace_id.as_str(), provider, account_email],
                Self::load_integration_row,
            )
            .optional()?;

        row.map(RawIntegrationRow::into_integration).transpose()
    }

    fn save_integration(&self, integration: &Integration) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE integrations SET
                workspace_id = ?, provider = ?, account_email = ?, credential_ref = ?,
                status = ?, last_checkpoint = ?, last_sync_at = ?, total_synced = ?,
                last_error = ?, resume_page_token = ?
             WHERE id = ?",
            params![
                integration.workspace_id.as_str(),
                integration.provider,
                integration.account_email,
                integration.credential_ref,
                integration.status.as_str(),
                integration.last_checkpoint.as_ref().map(|c| c.as_str()),
                integration.last_sync_at.map(|t| t.to_rfc3339()),
                integration.total_synced as i64,
                integration.last_error,
                integration.resume_page_token,
                integration.id.as_str(),
            ],
        )?;
        if updated == 0 {
            bail!("integration {} does not exist", integration.id.as_str());
        }
        Ok(())
    }

    fn transition_status(
        &self,
        id: &IntegrationId,
        allowed_from: &[IntegrationStatus],
        to: IntegrationStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        // Only froms that are also legal state-machine edges participate
        // in the compare-and-swap.
        let froms: Vec<&'static str> = allowed_from
            .iter()
            .filter(|from| from.can_transition(to))
            .map(|from| from.as_str())
            .collect();
        if froms.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; froms.len()].join(", ");
        let sql = format!(
            "UPDATE integrations
             SET status = ?, last_error = COALESCE(?, last_error)
             WHERE id = ? AND status IN ({})",
            placeholders
        );

        let conn = self.conn.lock().unwrap();
        let to_str = to.as_str();
        let id_str = id.as_str();
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&to_str, &error, &id_str];
        for from in &froms {
            sql_params.push(from);
        }

        let updated = conn.execute(&sql, sql_params.as_slice())?;
        Ok(updated > 0)
    }

    fn claim_run(&self, id: &IntegrationId, stale_after: Duration) -> Result<bool> {
        let now = Utc::now();
        let stale_before = now - stale_after;

        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE integrations SET run_started_at = ?
             WHERE id = ? AND (run_started_at IS NULL OR run_started_at < ?)",
            params![now.to_rfc3339(), id.as_str(), stale_before.to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    fn release_run(&self, id: &IntegrationId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE integrations SET run_started_at = NULL WHERE id = ?",
            [id.as_str()],
        )?;
        Ok(())
    }

    fn enqueue_enrichment(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO enrichment_queue (workspace_id, message_id, queued_at)
             VALUES (?, ?, ?)",
            params![workspace_id.as_str(), id.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn dequeue_enrichment(&self, limit: usize) -> Result<Vec<(WorkspaceId, MessageId)>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let entries: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT workspace_id, message_id FROM enrichment_queue
                 ORDER BY rowid LIMIT ?",
            )?;
            stmt.query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };

        for (workspace_id, message_id) in &entries {
            tx.execute(
                "DELETE FROM enrichment_queue WHERE workspace_id = ? AND message_id = ?",
                params![workspace_id, message_id],
            )?;
        }
        tx.commit()?;

        Ok(entries
            .into_iter()
            .map(|(ws, id)| (WorkspaceId::new(ws), MessageId::new(id)))
            .collect())
    }

    fn enrichment_queue_len(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM enrichment_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM integrations;
             DELETE FROM enrichment_queue;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_store() -> (SqliteMailStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mirror.test.sqlite");
        let store = SqliteMailStore::new(&db_path).unwrap();
        (store, temp_dir)
    }

    fn make_integration(id: &str) -> Integration {
        Integration::new(
            IntegrationId::new(id),
            WorkspaceId::new("w1"),
            "gmail",
            format!("{}@example.com", id),
            "cred",
        )
    }

    fn make_message(id: &str) -> Message {
        Message::builder(
            MessageId::new(id),
            WorkspaceId::new("w1"),
            ThreadId::new("t1"),
        )
        .integration_id("i1")
        .from(EmailAddress::with_name("Test User", "test@example.com"))
        .to(vec![EmailAddress::new("recipient@example.com")])
        .subject(format!("Subject {}", id))
        .snippet("preview")
        .body_text(Some("plain body".to_string()))
        .body_html(Some("<p>html body</p>".to_string()))
        .labels(vec!["INBOX".to_string(), "UNREAD".to_string()])
        .internal_date(1_700_000_000_000)
        .build()
    }

    #[test]
    fn test_message_round_trip() {
        let (store, _dir) = create_store();
        let msg = make_message("m1");
        store.upsert_message(msg.clone()).unwrap();

        let loaded = store
            .get_message(&WorkspaceId::new("w1"), &MessageId::new("m1"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.subject, msg.subject);
        assert_eq!(loaded.body_text, msg.body_text);
        assert_eq!(loaded.body_html, msg.body_html);
        assert_eq!(loaded.labels, msg.labels);
        assert_eq!(loaded.to, msg.to);
        assert!(!loaded.flags.is_read);
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let (store, _dir) = create_store();
        store.upsert_message(make_message("m1")).unwrap();

        let mut updated = make_message("m1");
        updated.subject = "New subject".to_string();
        store.upsert_message(updated).unwrap();

        assert_eq!(store.count_messages(&WorkspaceId::new("w1")).unwrap(), 1);
        let loaded = store
            .get_message(&WorkspaceId::new("w1"), &MessageId::new("m1"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.subject, "New subject");
    }

    #[test]
    fn test_soft_delete_tombstones() {
        let (store, _dir) = create_store();
        let ws = WorkspaceId::new("w1");
        store.upsert_message(make_message("m1")).unwrap();

        assert!(store
            .soft_delete_message(&ws, &MessageId::new("m1"), Utc::now())
            .unwrap());
        assert!(!store
            .soft_delete_message(&ws, &MessageId::new("ghost"), Utc::now())
            .unwrap());

        // Tombstoned rows are retained and filtered from listings
        assert!(store.has_message(&ws, &MessageId::new("m1")).unwrap());
        assert!(store.list_messages(&ws, false, 10).unwrap().is_empty());
        assert_eq!(store.list_messages(&ws, true, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_update_labels_changes_derived_flags() {
        let (store, _dir) = create_store();
        let ws = WorkspaceId::new("w1");
        store.upsert_message(make_message("m1")).unwrap();

        assert!(store
            .update_message_labels(
                &ws,
                &MessageId::new("m1"),
                vec!["INBOX".to_string(), "STARRED".to_string()],
            )
            .unwrap());

        let loaded = store.get_message(&ws, &MessageId::new("m1")).unwrap().unwrap();
        assert!(loaded.flags.is_read);
        assert!(loaded.flags.is_starred);
    }

    #[test]
    fn test_integration_unique_triple() {
        let (store, _dir) = create_store();
        store.create_integration(make_integration("i1")).unwrap();

        let mut duplicate = make_integration("i2");
        duplicate.account_email = "i1@example.com".to_string();
        assert!(store.create_integration(duplicate).is_err());
    }

    #[test]
    fn test_integration_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mirror.test.sqlite");

        {
            let store = SqliteMailStore::new(&db_path).unwrap();
            let mut integration = make_integration("i1");
            integration.status = IntegrationStatus::FullSyncing;
            integration.resume_page_token = Some("page_7".to_string());
            integration.total_synced = 640;
            integration.last_error = Some("timeout".to_string());
            store.create_integration(integration).unwrap();
        } // store dropped here, connection closed

        {
            let store = SqliteMailStore::new(&db_path).unwrap();
            let loaded = store
                .get_integration(&IntegrationId::new("i1"))
                .unwrap()
                .unwrap();
            assert_eq!(loaded.status, IntegrationStatus::FullSyncing);
            assert_eq!(loaded.resume_page_token, Some("page_7".to_string()));
            assert_eq!(loaded.total_synced, 640);
            assert_eq!(loaded.last_error, Some("timeout".to_string()));
        }
    }

    #[test]
    fn test_transition_status_cas() {
        let (store, _dir) = create_store();
        store.create_integration(make_integration("i1")).unwrap();
        let id = IntegrationId::new("i1");

        assert!(store
            .transition_status(
                &id,
                &[IntegrationStatus::Disconnected],
                IntegrationStatus::Authorizing,
                None,
            )
            .unwrap());
        assert!(!store
            .transition_status(
                &id,
                &[IntegrationStatus::Disconnected],
                IntegrationStatus::Authorizing,
                None,
            )
            .unwrap());

        let loaded = store.get_integration(&id).unwrap().unwrap();
        assert_eq!(loaded.status, IntegrationStatus::Authorizing);
    }

    #[test]
    fn test_transition_records_error() {
        let (store, _dir) = create_store();
        let mut integration = make_integration("i1");
        integration.status = IntegrationStatus::SteadyState;
        store.create_integration(integration).unwrap();
        let id = IntegrationId::new("i1");

        assert!(store
            .transition_status(
                &id,
                &[IntegrationStatus::SteadyState],
                IntegrationStatus::Error,
                Some("credential rejected"),
            )
            .unwrap());

        let loaded = store.get_integration(&id).unwrap().unwrap();
        assert_eq!(loaded.status, IntegrationStatus::Error);
        assert_eq!(loaded.last_error, Some("credential rejected".to_string()));
    }

    #[test]
    fn test_run_lease_with_staleness() {
        let (store, _dir) = create_store();
        store.create_integration(make_integration("i1")).unwrap();
        let id = IntegrationId::new("i1");

        assert!(store.claim_run(&id, Duration::minutes(15)).unwrap());
        assert!(!store.claim_run(&id, Duration::minutes(15)).unwrap());
        // Zero staleness window reclaims any held lease
        assert!(store.claim_run(&id, Duration::zero()).unwrap());

        store.release_run(&id).unwrap();
        assert!(store.claim_run(&id, Duration::minutes(15)).unwrap());
    }

    #[test]
    fn test_enrichment_queue_fifo_and_dedupe() {
        let (store, _dir) = create_store();
        let ws = WorkspaceId::new("w1");

        store.enqueue_enrichment(&ws, &MessageId::new("m1")).unwrap();
        store.enqueue_enrichment(&ws, &MessageId::new("m2")).unwrap();
        store.enqueue_enrichment(&ws, &MessageId::new("m1")).unwrap();
        assert_eq!(store.enrichment_queue_len().unwrap(), 2);

        let drained = store.dequeue_enrichment(1).unwrap();
        assert_eq!(drained[0].1.as_str(), "m1");
        assert_eq!(store.enrichment_queue_len().unwrap(), 1);
    }
}
