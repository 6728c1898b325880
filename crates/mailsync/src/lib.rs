//! Mailsync crate - Mailbox mirroring engine
//!
//! This crate mirrors remote mailbox accounts into a local queryable
//! store, platform-independently:
//! - Domain models (Message, EmailAddress, Integration lifecycle)
//! - Provider boundary with a Gmail-shaped HTTP implementation
//! - Storage trait abstractions (in-memory and SQLite)
//! - Full-snapshot and incremental (change feed) sync engines
//! - Chunked concurrent batch fetcher with per-item failure isolation
//!
//! This crate has zero UI dependencies; the courier CLI is one consumer.

pub mod config;
pub mod models;
pub mod provider;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use models::{
    Attachment, Checkpoint, EmailAddress, Integration, IntegrationId, IntegrationStatus, LabelId,
    Message, MessageFlags, MessageId, ThreadId, WorkspaceId, apply_label_delta,
};
pub use provider::{
    ChangeEvent, ChangeFeed, Credential, CredentialAuthority, CredentialError, CredentialSession,
    GmailProvider, ListScope, MailProvider, MessageIdPage, Profile, ProviderError,
    normalize_message,
};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{
    // Sync execution
    CancelToken, Fetcher, RunOutcome, SyncRunner, SyncStats, full_sync, incremental_sync,
    // Sync timing (for trigger cooldown management)
    cooldown_elapsed,
};
