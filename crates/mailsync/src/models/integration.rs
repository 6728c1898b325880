//! Integration record and its lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the workspace that owns an integration and its messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for one mailbox integration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegrationId(pub String);

impl IntegrationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque provider-issued change-feed position
///
/// Checkpoints are monotonic per integration and can only be interpreted
/// by the provider. An expired checkpoint cannot be repaired locally; the
/// only recovery is a fresh full sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint(pub String);

impl Checkpoint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of one mailbox integration
///
/// Exactly one sync engine may hold an active run for an integration at a
/// time; the status is the phase, the run lease on [`Integration`] is the
/// mutex (see `MailStore::claim_run`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Disconnected,
    Authorizing,
    FullSyncing,
    SteadyState,
    IncrementalSyncing,
    Error,
}

impl IntegrationStatus {
    /// Whether a transition from `self` to `to` is a legal state-machine edge
    pub fn can_transition(self, to: IntegrationStatus) -> bool {
        use IntegrationStatus::*;
        match (self, to) {
            // Credential issued; also the only exit from Error
            (Disconnected | Error, Authorizing) => true,
            // Credential session authenticated and identity confirmed
            (Authorizing, FullSyncing) => true,
            // Re-snapshot of an established mirror
            (SteadyState, FullSyncing) => true,
            // Checkpoint invalidation self-heals into a fresh full sync
            (IncrementalSyncing, FullSyncing) => true,
            // Full sync complete with baseline checkpoint captured
            (FullSyncing, SteadyState) => true,
            (SteadyState, IncrementalSyncing) => true,
            (IncrementalSyncing, SteadyState) => true,
            // Unauthorized credential from any active state
            (Authorizing | FullSyncing | SteadyState | IncrementalSyncing, Error) => true,
            // External disable
            (_, Disconnected) => true,
            _ => false,
        }
    }

    /// Whether a sync run may be active in this state
    pub fn is_active(self) -> bool {
        matches!(
            self,
            IntegrationStatus::FullSyncing
                | IntegrationStatus::SteadyState
                | IntegrationStatus::IncrementalSyncing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationStatus::Disconnected => "disconnected",
            IntegrationStatus::Authorizing => "authorizing",
            IntegrationStatus::FullSyncing => "full_syncing",
            IntegrationStatus::SteadyState => "steady_state",
            IntegrationStatus::IncrementalSyncing => "incremental_syncing",
            IntegrationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(IntegrationStatus::Disconnected),
            "authorizing" => Some(IntegrationStatus::Authorizing),
            "full_syncing" => Some(IntegrationStatus::FullSyncing),
            "steady_state" => Some(IntegrationStatus::SteadyState),
            "incremental_syncing" => Some(IntegrationStatus::IncrementalSyncing),
            "error" => Some(IntegrationStatus::Error),
            _ => None,
        }
    }
}

/// One mailbox integration: a (workspace, provider, account) binding
///
/// At most one integration exists per (workspace, provider, account email)
/// triple; the store enforces uniqueness on create. The record is never
/// hard-deleted, only disabled via `status = Disconnected`. Every field is
/// durable across process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: IntegrationId,
    pub workspace_id: WorkspaceId,
    /// Provider identifier (e.g., "gmail")
    pub provider: String,
    pub account_email: String,
    /// Opaque handle into the credential authority; the engine never
    /// persists tokens itself.
    pub credential_ref: String,
    pub status: IntegrationStatus,
    /// Baseline/advancing change-feed position; None until the first full
    /// sync completes.
    pub last_checkpoint: Option<Checkpoint>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Running count of messages mirrored by full syncs and "added" events
    pub total_synced: u64,
    pub last_error: Option<String>,
    /// Full-sync resume cursor; always a completed-page boundary
    pub resume_page_token: Option<String>,
    /// Run lease: set while a sync run holds the integration. A stale
    /// lease (crashed process) is reclaimable after `run_lease_secs`.
    pub run_started_at: Option<DateTime<Utc>>,
}

impl Integration {
    /// Create a freshly connected integration (no credential yet)
    pub fn new(
        id: IntegrationId,
        workspace_id: WorkspaceId,
        provider: impl Into<String>,
        account_email: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        Self {
            id,
            workspace_id,
            provider: provider.into(),
            account_email: account_email.into(),
            credential_ref: credential_ref.into(),
            status: IntegrationStatus::Disconnected,
            last_checkpoint: None,
            last_sync_at: None,
            total_synced: 0,
            last_error: None,
            resume_page_token: None,
            run_started_at: None,
        }
    }

    /// Advisory freshness check for the stored checkpoint.
    ///
    /// Provider change feeds have a retention window (about a week for
    /// Gmail history IDs); a checkpoint older than that will likely be
    /// rejected. The authoritative signal remains the provider's expiry
    /// error, which forces a full resync either way.
    pub fn checkpoint_is_fresh(&self, max_age_days: i64) -> bool {
        match self.last_sync_at {
            Some(last) => (Utc::now() - last).num_days() < max_age_days,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IntegrationStatus::*;

    #[test]
    fn test_lifecycle_edges() {
        assert!(Disconnected.can_transition(Authorizing));
        assert!(Authorizing.can_transition(FullSyncing));
        assert!(FullSyncing.can_transition(SteadyState));
        assert!(SteadyState.can_transition(IncrementalSyncing));
        assert!(IncrementalSyncing.can_transition(SteadyState));
    }

    #[test]
    fn test_error_exits_only_via_reauthorization() {
        assert!(Error.can_transition(Authorizing));
        assert!(!Error.can_transition(FullSyncing));
        assert!(!Error.can_transition(SteadyState));
        assert!(!Error.can_transition(IncrementalSyncing));
    }

    #[test]
    fn test_checkpoint_invalidation_self_heals() {
        assert!(IncrementalSyncing.can_transition(FullSyncing));
    }

    #[test]
    fn test_active_states_can_fail() {
        for state in [Authorizing, FullSyncing, SteadyState, IncrementalSyncing] {
            assert!(state.can_transition(Error), "{:?} -> Error", state);
        }
        assert!(!Disconnected.can_transition(Error));
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!Disconnected.can_transition(FullSyncing));
        assert!(!FullSyncing.can_transition(IncrementalSyncing));
        assert!(!Authorizing.can_transition(SteadyState));
    }

    #[test]
    fn test_status_round_trip() {
        for state in [
            Disconnected,
            Authorizing,
            FullSyncing,
            SteadyState,
            IncrementalSyncing,
            Error,
        ] {
            assert_eq!(IntegrationStatus::parse(state.as_str()), Some(state));
        }
        assert_eq!(IntegrationStatus::parse("bogus"), None);
    }

    #[test]
    fn test_checkpoint_freshness() {
        let mut integration = Integration::new(
            IntegrationId::new("i1"),
            WorkspaceId::new("w1"),
            "gmail",
            "user@example.com",
            "cred-1",
        );
        assert!(!integration.checkpoint_is_fresh(7));

        integration.last_sync_at = Some(Utc::now() - chrono::Duration::days(2));
        assert!(integration.checkpoint_is_fresh(7));

        integration.last_sync_at = Some(Utc::now() - chrono::Duration::days(9));
        assert!(!integration.checkpoint_is_fresh(7));
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&FullSyncing).unwrap();
        assert_eq!(json, "\"full_syncing\"");
    }
}
