//! Remote mail provider boundary
//!
//! This module provides:
//! - The [`MailProvider`] trait the sync engines run against
//! - A typed error taxonomy for provider calls
//! - Fixed variant types for change-feed events, so engine logic stays
//!   statically typed instead of inspecting raw payloads
//! - The credential session wrapping per-integration bearer tokens
//! - A concrete Gmail-shaped HTTP implementation and its normalizer

mod gmail;
mod normalize;
mod session;

pub use gmail::GmailProvider;
pub use normalize::normalize_message;
pub use session::{Credential, CredentialAuthority, CredentialError, CredentialSession};

use crate::models::{Checkpoint, MessageId};

/// Error from a provider call
///
/// `Unauthorized` and `CheckpointExpired` are decision points for the
/// engines; everything else is either transient (retried by the next
/// external trigger) or a malformed-response defect.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credential rejected (401/invalid-grant). Never silently refreshed;
    /// the integration must be re-authorized.
    #[error("provider rejected the credential; re-authorization required")]
    Unauthorized,

    /// The change-feed checkpoint is past the provider's retention window
    #[error("change-feed checkpoint expired or unknown")]
    CheckpointExpired,

    /// Non-2xx response other than 401
    #[error("provider returned HTTP status {0}")]
    Status(u16),

    /// Connection/timeout failure before a status was received
    #[error("transport error: {0}")]
    Transport(#[from] ureq::Error),

    /// Response body did not parse as the expected shape
    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether a retry on the next scheduled trigger could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Status(429) => true,
            ProviderError::Status(code) => (500..=599).contains(code),
            ProviderError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Scope filter for full-sync message listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Union of inbox, sent and drafts; the snapshot scope of a full sync
    Snapshot,
}

impl ListScope {
    /// Provider search query for this scope
    pub fn query(self) -> &'static str {
        match self {
            ListScope::Snapshot => "in:inbox OR in:sent OR in:draft",
        }
    }
}

/// One page of remote message identifiers
#[derive(Debug, Clone, Default)]
pub struct MessageIdPage {
    pub ids: Vec<MessageId>,
    /// Token for the next page; None on the last page
    pub next_page_token: Option<String>,
}

/// A single remote change, in provider order
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A message appeared in the mailbox
    Added(MessageId),
    /// A message was removed from the mailbox
    Deleted(MessageId),
    /// The message's label set changed
    LabelsChanged {
        id: MessageId,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl ChangeEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            ChangeEvent::Added(id) | ChangeEvent::Deleted(id) => id,
            ChangeEvent::LabelsChanged { id, .. } => id,
        }
    }
}

/// All changes since a checkpoint, plus the checkpoint to persist once
/// every event has been applied
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    pub events: Vec<ChangeEvent>,
    pub new_checkpoint: Checkpoint,
}

/// The remote account's identity
#[derive(Debug, Clone)]
pub struct Profile {
    pub email_address: String,
}

/// Abstract remote mail provider
///
/// The sync engines only speak this trait; [`GmailProvider`] is the
/// shipping implementation and tests script their own.
pub trait MailProvider: Send + Sync {
    /// Fetch the authenticated account's identity
    fn profile(&self) -> Result<Profile, ProviderError>;

    /// List one page of message IDs in the given scope
    fn list_message_ids(
        &self,
        scope: ListScope,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessageIdPage, ProviderError>;

    /// Fetch one full raw message
    fn get_message(&self, id: &MessageId) -> Result<api::RawMessage, ProviderError>;

    /// Fetch all changes since `checkpoint`, in provider order
    fn changes_since(&self, checkpoint: &Checkpoint) -> Result<ChangeFeed, ProviderError>;

    /// Fetch the provider's current change-feed position, used as the
    /// baseline after a full sync
    fn current_checkpoint(&self) -> Result<Checkpoint, ProviderError>;
}

/// Provider wire types (Gmail-shaped REST API)
pub mod api {
    use serde::Deserialize;

    /// Response from the profile endpoint
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub history_id: Option<String>,
    }

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Full raw message from the provider
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RawMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        /// Milliseconds since epoch, as a string
        #[serde(default)]
        pub internal_date: String,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers and the MIME part tree
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body: inline base64url data, or an attachment reference
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// One node of the MIME multipart tree (nests arbitrarily)
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from the history (change feed) endpoint
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub history_id: Option<String>,
        pub next_page_token: Option<String>,
    }

    /// One history record; each list preserves provider ordering
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub messages_added: Option<Vec<HistoryMessageChange>>,
        pub messages_deleted: Option<Vec<HistoryMessageChange>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
        pub labels_removed: Option<Vec<HistoryLabelChange>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryMessageChange {
        pub message: MessageRef,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: MessageRef,
        pub label_ids: Option<Vec<String>>,
    }
}
