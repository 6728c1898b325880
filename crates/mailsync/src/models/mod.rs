//! Domain models for the mailbox mirror

mod integration;
mod label;
mod message;

pub use integration::{Checkpoint, Integration, IntegrationId, IntegrationStatus, WorkspaceId};
pub use label::{LabelId, MessageFlags, apply_label_delta};
pub use message::{Attachment, EmailAddress, Message, MessageId, ThreadId};
