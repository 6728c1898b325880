//! In-memory storage implementation
//!
//! Used by tests and as a reference implementation of the store
//! semantics; production deployments use [`super::SqliteMailStore`].

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use super::MailStore;
use crate::models::{
    Integration, IntegrationId, IntegrationStatus, Message, MessageId, WorkspaceId,
};

type MessageKey = (String, String);

/// In-memory implementation of MailStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access. The status
/// CAS and the run lease take the write lock for the whole
/// check-and-update, which gives the same atomicity the SQLite
/// implementation gets from single UPDATE statements.
pub struct InMemoryMailStore {
    /// Messages keyed by (workspace, provider message id)
    messages: RwLock<HashMap<MessageKey, Message>>,
    integrations: RwLock<HashMap<String, Integration>>,
    /// FIFO enrichment queue plus a pending-set for dedupe
    queue: RwLock<QueueState>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<(WorkspaceId, MessageId)>,
    pending: HashSet<MessageKey>,
}

fn message_key(workspace_id: &WorkspaceId, id: &MessageId) -> MessageKey {
    (workspace_id.0.clone(), id.0.clone())
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            integrations: RwLock::new(HashMap::new()),
            queue: RwLock::new(QueueState::default()),
        }
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_message(&self, message: Message) -> Result<()> {
        let key = message_key(&message.workspace_id, &message.id);
        let mut messages = self.messages.write().unwrap();
        messages.insert(key, message);
        Ok(())
    }

    fn get_message(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<Option<Message>> {
        let messages = self.messages.read().unwrap();
        Ok(messages.get(&message_key(workspace_id, id)).cloned())
    }

    fn has_message(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<bool> {
        let messages = self.messages.read().unwrap();
        Ok(messages.contains_key(&message_key(workspace_id, id)))
    }

    fn soft_delete_message(
        &self,
        workspace_id: &WorkspaceId,
        id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut messages = self.messages.write().unwrap();
        match messages.get_mut(&message_key(workspace_id, id)) {
            Some(message) => {
                // Replaying a delete keeps the original tombstone timestamp
                if message.deleted_at.is_none() {
                    message.deleted_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_message_labels(
        &self,
        workspace_id: &WorkspaceId,
        id: &MessageId,
        labels: Vec<String>,
    ) -> Result<bool> {
        let mut messages = self.messages.write().unwrap();
        match messages.get_mut(&message_key(workspace_id, id)) {
            Some(message) => {
                message.set_labels(labels);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_messages(
        &self,
        workspace_id: &WorkspaceId,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.read().unwrap();
        let mut result: Vec<Message> = messages
            .values()
            .filter(|m| m.workspace_id == *workspace_id)
            .filter(|m| include_deleted || m.deleted_at.is_none())
            .cloned()
            .collect();
        result.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        result.truncate(limit);
        Ok(result)
    }

    fn count_messages(&self, workspace_id: &WorkspaceId) -> Result<usize> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .values()
            .filter(|m| m.workspace_id == *workspace_id)
            .count())
    }

    fn create_integration(&self, integration: Integration) -> Result<()> {
        let mut integrations = self.integrations.write().unwrap();
        let duplicate = integrations.values().any(|existing| {
            existing.workspace_id == integration.workspace_id
                && existing.provider == integration.provider
                && existing.account_email == integration.account_email
        });
        if duplicate {
            bail!(
                "integration already exists for {}/{}/{}",
                integration.workspace_id.as_str(),
                integration.provider,
                integration.account_email
            );
        }
        if integrations.contains_key(integration.id.as_str()) {
            bail!("integration id {} already exists", integration.id.as_str());
        }
        integrations.insert(integration.id.0.clone(), integration);
        Ok(())
    }

    fn get_integration(&self, id: &IntegrationId) -> Result<Option<Integration>> {
        let integrations = self.integrations.read().unwrap();
        Ok(integrations.get(id.as_str()).cloned())
    }

    fn find_integration(
        &self,
        workspace_id: &WorkspaceId,
        provider: &str,
        account_email: &str,
    ) -> Result<Option<Integration>> {
        let integrations = self.integrations.read().unwrap();
        Ok(integrations
            .values()
            .find(|i| {
                i.workspace_id == *workspace_id
                    && i.provider == provider
                    && i.account_email == account_email
            })
            .cloned())
    }

    fn save_integration(&self, integration: &Integration) -> Result<()> {
        let mut integrations = self.integrations.write().unwrap();
        if !integrations.contains_key(integration.id.as_str()) {
            bail!("integration {} does not exist", integration.id.as_str());
        }
        integrations.insert(integration.id.0.clone(), integration.clone());
        Ok(())
    }

    fn transition_status(
        &self,
        id: &IntegrationId,
        allowed_from: &[IntegrationStatus],
        to: IntegrationStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let mut integrations = self.integrations.write().unwrap();
        let Some(integration) = integrations.get_mut(id.as_str()) else {
            bail!("integration {} does not exist", id.as_str());
        };

        let current = integration.status;
        if !allowed_from.contains(&current) || !current.can_transition(to) {
            return Ok(false);
        }

        integration.status = to;
        if let Some(error) = error {
            integration.last_error = Some(error.to_string());
        }
        Ok(true)
    }

    fn claim_run(&self, id: &IntegrationId, stale_after: Duration) -> Result<bool> {
        let mut integrations = self.integrations.write().unwrap();
        let Some(integration) = integrations.get_mut(id.as_str()) else {
            bail!("integration {} does not exist", id.as_str());
        };

        let now = Utc::now();
        match integration.run_started_at {
            Some(started) if now - started < stale_after => Ok(false),
            _ => {
                integration.run_started_at = Some(now);
                Ok(true)
            }
        }
    }

    fn release_run(&self, id: &IntegrationId) -> Result<()> {
        let mut integrations = self.integrations.write().unwrap();
        if let Some(integration) = integrations.get_mut(id.as_str()) {
            integration.run_started_at = None;
        }
        Ok(())
    }

    fn enqueue_enrichment(&self, workspace_id: &WorkspaceId, id: &MessageId) -> Result<()> {
        let mut queue = self.queue.write().unwrap();
        let key = message_key(workspace_id, id);
        if queue.pending.insert(key) {
            queue
                .entries
                .push_back((workspace_id.clone(), id.clone()));
        }
        Ok(())
    }

    fn dequeue_enrichment(&self, limit: usize) -> Result<Vec<(WorkspaceId, MessageId)>> {
        let mut queue = self.queue.write().unwrap();
        let mut result = Vec::new();
        while result.len() < limit {
            let Some((workspace_id, id)) = queue.entries.pop_front() else {
                break;
            };
            queue.pending.remove(&message_key(&workspace_id, &id));
            result.push((workspace_id, id));
        }
        Ok(result)
    }

    fn enrichment_queue_len(&self) -> Result<usize> {
        let queue = self.queue.read().unwrap();
        Ok(queue.entries.len())
    }

    fn clear(&self) -> Result<()> {
        self.messages.write().unwrap().clear();
        self.integrations.write().unwrap().clear();
        let mut queue = self.queue.write().unwrap();
        queue.entries.clear();
        queue.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreadId;

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
        .subject(format!("Subject {}", id))
        .build()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = InMemoryMailStore::new();
        let msg = make_message("m1");
        store.upsert_message(msg.clone()).unwrap();
        store.upsert_message(msg.clone()).unwrap();

        assert_eq!(store.count_messages(&WorkspaceId::new("w1")).unwrap(), 1);
        let stored = store
            .get_message(&WorkspaceId::new("w1"), &MessageId::new("m1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored, msg);
    }

    #[test]
    fn test_soft_delete_keeps_row_and_first_timestamp() {
        let store = InMemoryMailStore::new();
        let ws = WorkspaceId::new("w1");
        store.upsert_message(make_message("m1")).unwrap();

        let first = Utc::now();
        assert!(store
            .soft_delete_message(&ws, &MessageId::new("m1"), first)
            .unwrap());

        // Replay keeps the original tombstone
        let later = first + Duration::hours(1);
        assert!(store
            .soft_delete_message(&ws, &MessageId::new("m1"), later)
            .unwrap());

        let stored = store.get_message(&ws, &MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(stored.deleted_at, Some(first));
        assert_eq!(stored.subject, "Subject m1");
        assert!(store.has_message(&ws, &MessageId::new("m1")).unwrap());
    }

    #[test]
    fn test_soft_delete_missing_message_is_noop() {
        let store = InMemoryMailStore::new();
        let ws = WorkspaceId::new("w1");
        assert!(!store
            .soft_delete_message(&ws, &MessageId::new("never"), Utc::now())
            .unwrap());
    }

    #[test]
    fn test_unique_integration_triple() {
        let store = InMemoryMailStore::new();
        store.create_integration(make_integration("i1")).unwrap();

        let mut duplicate = make_integration("i2");
        duplicate.account_email = "i1@example.com".to_string();
        assert!(store.create_integration(duplicate).is_err());
    }

    #[test]
    fn test_transition_status_cas() {
        let store = InMemoryMailStore::new();
        store.create_integration(make_integration("i1")).unwrap();
        let id = IntegrationId::new("i1");

        assert!(store
            .transition_status(&id, &[IntegrationStatus::Disconnected], IntegrationStatus::Authorizing, None)
            .unwrap());
        // Now Authorizing, so the same CAS fails
        assert!(!store
            .transition_status(&id, &[IntegrationStatus::Disconnected], IntegrationStatus::Authorizing, None)
            .unwrap());

        // Illegal edge is refused even when allowed_from matches
        assert!(!store
            .transition_status(&id, &[IntegrationStatus::Authorizing], IntegrationStatus::SteadyState, None)
            .unwrap());
    }

    #[test]
    fn test_run_lease() {
        let store = InMemoryMailStore::new();
        store.create_integration(make_integration("i1")).unwrap();
        let id = IntegrationId::new("i1");

        assert!(store.claim_run(&id, Duration::minutes(15)).unwrap());
        assert!(!store.claim_run(&id, Duration::minutes(15)).unwrap());

        store.release_run(&id).unwrap();
        assert!(store.claim_run(&id, Duration::minutes(15)).unwrap());
    }

    #[test]
    fn test_stale_lease_is_reclaimable() {
        let store = InMemoryMailStore::new();
        store.create_integration(make_integration("i1")).unwrap();
        let id = IntegrationId::new("i1");

        assert!(store.claim_run(&id, Duration::minutes(15)).unwrap());
        // A zero staleness window treats any held lease as crashed
        assert!(store.claim_run(&id, Duration::zero()).unwrap());
    }

    #[test]
    fn test_enrichment_queue_dedupes_pending() {
        let store = InMemoryMailStore::new();
        let ws = WorkspaceId::new("w1");
        let id = MessageId::new("m1");

        store.enqueue_enrichment(&ws, &id).unwrap();
        store.enqueue_enrichment(&ws, &id).unwrap();
        assert_eq!(store.enrichment_queue_len().unwrap(), 1);

        let drained = store.dequeue_enrichment(10).unwrap();
        assert_eq!(drained, vec![(ws.clone(), id.clone())]);

        // Once drained, the same message can be queued again
        store.enqueue_enrichment(&ws, &id).unwrap();
        assert_eq!(store.enrichment_queue_len().unwrap(), 1);
    }
}
