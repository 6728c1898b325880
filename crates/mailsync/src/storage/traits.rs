//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::models::{Integration, IntegrationId, IntegrationStatus, Message, MessageId, WorkspaceId};

/// Trait for mail mirror storage operations
///
/// Messages are keyed by (workspace, provider message id), which makes
/// every upsert idempotent: an existing message is updated in place, never
/// duplicated. Integration records carry the durable sync state and the
/// run lease that serializes sync runs per integration.
pub trait MailStore: Send + Sync {
    // === Messages ===

    /// Insert or update a message (idempotent on its natural key)
    fn upsert_message(&self, message: Message) -> Result<()>;

    /// Get a message by its natural key
    fn get_message(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<Option<Message>>;

    /// Check if a message exists (tombstoned messages count as existing)
    fn has_message(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<bool>;

    /// Tombstone a message: set `deleted_at` if it is not already set,
    /// leaving every other field intact. Returns false if the message was
    /// never mirrored.
    fn soft_delete_message(
        &self,
        workspace_id: &WorkspaceId,
        id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Replace a message's label set and recompute its derived flags.
    /// Returns false if the message was never mirrored.
    fn update_message_labels(
        &self,
        workspace_id: &WorkspaceId,
        id: &MessageId,
        labels: Vec<String>,
    ) -> Result<bool>;

    /// List messages for a workspace, newest first
    fn list_messages(
        &self,
        workspace_id: &WorkspaceId,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Count all messages for a workspace, tombstones included
    fn count_messages(&self, workspace_id: &WorkspaceId) -> Result<usize>;

    // === Integrations ===

    /// Create a new integration. Fails if one already exists for the same
    /// (workspace, provider, account email) triple.
    fn create_integration(&self, integration: Integration) -> Result<()>;

    /// Get an integration by ID
    fn get_integration(&self, id: &IntegrationId) -> Result<Option<Integration>>;

    /// Find an integration by its unique (workspace, provider, email) triple
    fn find_integration(
        &self,
        workspace_id: &WorkspaceId,
        provider: &str,
        account_email: &str,
    ) -> Result<Option<Integration>>;

    /// Persist the integration record (status and lease are stored as-is;
    /// prefer `transition_status`/`claim_run` for those fields)
    fn save_integration(&self, integration: &Integration) -> Result<()>;

    /// Atomically move an integration's status to `to`, provided the
    /// current status is in `allowed_from` and the edge is legal.
    /// `error`, when given, is recorded as `last_error`. Returns whether
    /// the transition was applied (compare-and-swap semantics).
    fn transition_status(
        &self,
        id: &IntegrationId,
        allowed_from: &[IntegrationStatus],
        to: IntegrationStatus,
        error: Option<&str>,
    ) -> Result<bool>;

    /// Atomically claim the run lease for an integration. Succeeds when no
    /// lease is held, or when the held lease is older than `stale_after`
    /// (a crashed run). Returns false if another run is active.
    fn claim_run(&self, id: &IntegrationId, stale_after: Duration) -> Result<bool>;

    /// Release the run lease
    fn release_run(&self, id: &IntegrationId) -> Result<()>;

    // === Enrichment queue ===

    /// Append a message to the durable enrichment queue. Idempotent: a
    /// message with a pending entry is not queued twice.
    fn enqueue_enrichment(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<()>;

    /// Pop up to `limit` queued entries, oldest first
    fn dequeue_enrichment(&self, limit: usize) -> Result<Vec<(WorkspaceId, MessageId)>>;

    /// Number of pending enrichment entries
    fn enrichment_queue_len(&self) -> Result<usize>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
