//! Message model mirroring one remote message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageFlags, WorkspaceId};

/// Unique identifier for a message (the provider's own message ID)
///
/// This is the natural key for idempotent upserts: the pair
/// (workspace, message id) is unique in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a conversation thread (provider thread ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        // Try to parse "Name <email>" format
        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        // Otherwise, treat the whole string as an email
        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Parse a comma-separated recipient header into a list of addresses
    pub fn parse_list(s: &str) -> Vec<EmailAddress> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(EmailAddress::parse)
            .collect()
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Attachment metadata for a message part
///
/// Only metadata is mirrored; the content is fetched lazily by
/// `provider_attachment_id` when a consumer actually needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Provider-issued attachment ID, used for lazy content fetch
    pub provider_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Size in bytes as reported by the provider
    pub size: u64,
}

/// A mirrored email message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Provider message ID (immutable natural key)
    pub id: MessageId,
    /// Workspace the owning integration belongs to
    pub workspace_id: WorkspaceId,
    /// Integration that mirrored this message
    pub integration_id: String,
    /// ID of the thread this message belongs to
    pub thread_id: ThreadId,
    /// Sender's email address
    pub from: EmailAddress,
    /// Recipients (To field)
    pub to: Vec<EmailAddress>,
    /// CC recipients
    pub cc: Vec<EmailAddress>,
    /// BCC recipients (present on sent/draft messages)
    pub bcc: Vec<EmailAddress>,
    /// Subject line
    pub subject: String,
    /// Short plain-text preview
    pub snippet: String,
    /// Full plain text body, if the message had one
    pub body_text: Option<String>,
    /// Full HTML body, if the message had one
    pub body_html: Option<String>,
    /// Attachment metadata (content not mirrored)
    pub attachments: Vec<Attachment>,
    /// Provider label IDs currently on the message
    pub labels: Vec<String>,
    /// Boolean flags derived from the label set
    pub flags: MessageFlags,
    /// When the message was sent (Date header, falls back to internal date)
    pub sent_at: DateTime<Utc>,
    /// When the message was received
    pub received_at: DateTime<Utc>,
    /// Provider's internal timestamp (milliseconds since epoch)
    pub internal_date: i64,
    /// Tombstone: set when the remote message was deleted, never cleared
    /// by the sync engine. The row itself is retained.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, workspace_id: WorkspaceId, thread_id: ThreadId) -> MessageBuilder {
        MessageBuilder::new(id, workspace_id, thread_id)
    }

    /// Replace the label set and recompute the derived flags
    pub fn set_labels(&mut self, labels: Vec<String>) {
        self.flags = MessageFlags::from_labels(&labels);
        self.labels = labels;
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    workspace_id: WorkspaceId,
    integration_id: String,
    thread_id: ThreadId,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
    subject: String,
    snippet: String,
    body_text: Option<String>,
    body_html: Option<String>,
    attachments: Vec<Attachment>,
    labels: Vec<String>,
    sent_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    internal_date: i64,
}

impl MessageBuilder {
    fn new(id: MessageId, workspace_id: WorkspaceId, thread_id: ThreadId) -> Self {
        Self {
            id,
            workspace_id,
            integration_id: String::new(),
            thread_id,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            snippet: String::new(),
            body_text: None,
            body_html: None,
            attachments: Vec::new(),
            labels: Vec::new(),
            sent_at: None,
            received_at: None,
            internal_date: 0,
        }
    }

    pub fn integration_id(mut self, integration_id: impl Into<String>) -> Self {
        self.integration_id = integration_id.into();
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn bcc(mut self, bcc: Vec<EmailAddress>) -> Self {
        self.bcc = bcc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn body_text(mut self, body_text: Option<String>) -> Self {
        self.body_text = body_text;
        self
    }

    pub fn body_html(mut self, body_html: Option<String>) -> Self {
        self.body_html = body_html;
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = internal_date;
        self
    }

    pub fn build(self) -> Message {
        let received_at = self.received_at.unwrap_or_else(Utc::now);
        let flags = MessageFlags::from_labels(&self.labels);
        Message {
            id: self.id,
            workspace_id: self.workspace_id,
            integration_id: self.integration_id,
            thread_id: self.thread_id,
            from: self
                .from
                .unwrap_or_else(|| EmailAddress::new("unknown@unknown.com")),
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            snippet: self.snippet,
            body_text: self.body_text,
            body_html: self.body_html,
            attachments: self.attachments,
            labels: self.labels,
            flags,
            sent_at: self.sent_at.unwrap_or(received_at),
            received_at,
            internal_date: self.internal_date,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email_with_name() {
        let addr = EmailAddress::parse("John Doe <john@example.com>");
        assert_eq!(addr.name, Some("John Doe".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_without_name() {
        let addr = EmailAddress::parse("john@example.com");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_with_angle_brackets_no_name() {
        let addr = EmailAddress::parse("<john@example.com>");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_list() {
        let addrs = EmailAddress::parse_list("alice@example.com, Bob <bob@example.com>");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].email, "alice@example.com");
        assert_eq!(addrs[1].email, "bob@example.com");
        assert_eq!(addrs[1].name, Some("Bob".to_string()));
    }

    #[test]
    fn test_parse_list_skips_empty_tokens() {
        let addrs = EmailAddress::parse_list("alice@example.com, , bob@example.com,");
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn test_display_with_name() {
        let addr = EmailAddress::with_name("John Doe", "john@example.com");
        assert_eq!(addr.display(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_builder_derives_flags_from_labels() {
        let msg = Message::builder(
            MessageId::new("m1"),
            WorkspaceId::new("w1"),
            ThreadId::new("t1"),
        )
        .labels(vec!["STARRED".to_string()])
        .build();

        assert!(msg.flags.is_read); // no UNREAD label
        assert!(msg.flags.is_starred);
        assert!(msg.deleted_at.is_none());
    }

    #[test]
    fn test_set_labels_recomputes_flags() {
        let mut msg = Message::builder(
            MessageId::new("m1"),
            WorkspaceId::new("w1"),
            ThreadId::new("t1"),
        )
        .labels(vec!["UNREAD".to_string()])
        .build();
        assert!(!msg.flags.is_read);

        msg.set_labels(vec!["IMPORTANT".to_string()]);
        assert!(msg.flags.is_read);
        assert!(msg.flags.is_important);
    }
}
