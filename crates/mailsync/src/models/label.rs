//! Provider label IDs and the flags derived from them

use serde::{Deserialize, Serialize};

/// Unique identifier for a label (provider label ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Well-known system labels
    pub const INBOX: &'static str = "INBOX";
    pub const SENT: &'static str = "SENT";
    pub const DRAFTS: &'static str = "DRAFT";
    pub const TRASH: &'static str = "TRASH";
    pub const SPAM: &'static str = "SPAM";
    pub const STARRED: &'static str = "STARRED";
    pub const IMPORTANT: &'static str = "IMPORTANT";
    pub const UNREAD: &'static str = "UNREAD";
}

impl From<String> for LabelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Boolean flags derived from a message's label set
///
/// These are denormalized for querying; the label set remains the source
/// of truth and the flags are recomputed whenever labels change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub is_read: bool,
    pub is_starred: bool,
    pub is_important: bool,
    pub is_draft: bool,
    pub is_spam: bool,
    pub is_trashed: bool,
}

impl MessageFlags {
    /// Derive flags from a provider label set
    ///
    /// Read state is inverted: the provider marks unread messages with
    /// an UNREAD label, so its absence means read.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let has = |id: &str| labels.iter().any(|l| l.as_ref() == id);
        Self {
            is_read: !has(LabelId::UNREAD),
            is_starred: has(LabelId::STARRED),
            is_important: has(LabelId::IMPORTANT),
            is_draft: has(LabelId::DRAFTS),
            is_spam: has(LabelId::SPAM),
            is_trashed: has(LabelId::TRASH),
        }
    }
}

/// Apply a label-change event's delta to an existing label set.
///
/// Removed labels are dropped, added labels are appended once; existing
/// order is preserved so replaying the same event is a no-op.
pub fn apply_label_delta(labels: &[String], added: &[String], removed: &[String]) -> Vec<String> {
    let mut next: Vec<String> = labels
        .iter()
        .filter(|l| !removed.contains(l))
        .cloned()
        .collect();
    for label in added {
        if !next.contains(label) {
            next.push(label.clone());
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_from_empty_labels() {
        let flags = MessageFlags::from_labels::<String>(&[]);
        assert!(flags.is_read);
        assert!(!flags.is_starred);
        assert!(!flags.is_trashed);
    }

    #[test]
    fn test_flags_unread_inversion() {
        let flags = MessageFlags::from_labels(&labels(&["UNREAD", "INBOX"]));
        assert!(!flags.is_read);
    }

    #[test]
    fn test_label_change_derivation() {
        // [UNREAD, STARRED] - UNREAD + IMPORTANT
        let start = labels(&["UNREAD", "STARRED"]);
        let next = apply_label_delta(&start, &labels(&["IMPORTANT"]), &labels(&["UNREAD"]));
        let flags = MessageFlags::from_labels(&next);
        assert!(flags.is_read);
        assert!(flags.is_starred);
        assert!(flags.is_important);
    }

    #[test]
    fn test_apply_label_delta_is_idempotent() {
        let start = labels(&["INBOX"]);
        let once = apply_label_delta(&start, &labels(&["STARRED"]), &labels(&["UNREAD"]));
        let twice = apply_label_delta(&once, &labels(&["STARRED"]), &labels(&["UNREAD"]));
        assert_eq!(once, twice);
        assert_eq!(once, labels(&["INBOX", "STARRED"]));
    }
}
