//! Run orchestration: lease claiming, status transitions, error mapping
//!
//! Engines (`full_sync`, `incremental_sync`) assume they already hold the
//! run lease and that the integration is in the right phase; the runner is
//! the only place that claims leases and enters phases, so every external
//! trigger goes through it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use log::{info, warn};

use super::fetch::Fetcher;
use super::{full_sync, incremental_sync};
use crate::config::SyncConfig;
use crate::models::{IntegrationId, IntegrationStatus};
use crate::provider::{MailProvider, ProviderError};
use crate::storage::MailStore;

/// Cooperative cancellation flag, checked at chunk and page boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Counters accumulated over one sync run
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub pages: usize,
    pub messages_fetched: usize,
    pub messages_upserted: usize,
    pub messages_deleted: usize,
    pub label_updates: usize,
    /// Per-item fetch failures that were skipped, not aborted on
    pub errors: usize,
    /// True when a full sync stopped at the safety cap
    pub capped: bool,
    pub duration_ms: u64,
}

/// Outcome of a triggered run
#[derive(Debug)]
pub enum RunOutcome {
    Completed(SyncStats),
    /// Another run holds the lease; the trigger was a no-op
    AlreadyRunning,
}

/// Releases the run lease when the run ends, panics included
struct RunGuard<'a> {
    store: &'a dyn MailStore,
    id: &'a IntegrationId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_run(self.id) {
            warn!("failed to release run lease for {}: {}", self.id.as_str(), e);
        }
    }
}

/// Orchestrates sync runs for integrations against one provider
pub struct SyncRunner {
    provider: Box<dyn MailProvider>,
    store: Arc<dyn MailStore>,
    config: SyncConfig,
    fetcher: Fetcher,
}

impl SyncRunner {
    pub fn new(
        provider: Box<dyn MailProvider>,
        store: Arc<dyn MailStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(config.fetch_chunk_size)?;
        Ok(Self {
            provider,
            store,
            config,
            fetcher,
        })
    }

    pub fn store(&self) -> &dyn MailStore {
        self.store.as_ref()
    }

    /// Validate the credential session and confirm the account identity.
    ///
    /// Moves Disconnected or Error into Authorizing, probes the provider
    /// profile, and on success enters FullSyncing. A profile whose address
    /// does not match the integration's account email is treated as a
    /// credential for the wrong account.
    pub fn authorize(&self, id: &IntegrationId) -> Result<()> {
        let integration = self
            .store
            .get_integration(id)?
            .with_context(|| format!("Unknown integration: {}", id.as_str()))?;

        let entered = self.store.transition_status(
            id,
            &[IntegrationStatus::Disconnected, IntegrationStatus::Error],
            IntegrationStatus::Authorizing,
            None,
        )?;
        if !entered {
            bail!(
                "integration {} cannot authorize from {}",
                id.as_str(),
                integration.status.as_str()
            );
        }

        match self.provider.profile() {
            Ok(profile) => {
                if !profile
                    .email_address
                    .eq_ignore_ascii_case(&integration.account_email)
                {
                    let detail = format!(
                        "credential is for {}, integration expects {}",
                        profile.email_address, integration.account_email
                    );
                    self.store.transition_status(
                        id,
                        &[IntegrationStatus::Authorizing],
                        IntegrationStatus::Error,
                        Some(&detail),
                    )?;
                    bail!("account mismatch for {}: {}", id.as_str(), detail);
                }
                self.store.transition_status(
                    id,
                    &[IntegrationStatus::Authorizing],
                    IntegrationStatus::FullSyncing,
                    None,
                )?;
                info!(
                    "authorized {} as {}",
                    id.as_str(),
                    integration.account_email
                );
                Ok(())
            }
            Err(e) => {
                self.store.transition_status(
                    id,
                    &[IntegrationStatus::Authorizing],
                    IntegrationStatus::Error,
                    Some(&e.to_string()),
                )?;
                Err(anyhow::Error::from(e)
                    .context(format!("Authorization failed for {}", id.as_str())))
            }
        }
    }

    /// Run a full snapshot sync (initial mirror, or re-snapshot from
    /// SteadyState). Resumes from the persisted page cursor if one exists.
    pub fn run_full_sync(&self, id: &IntegrationId, cancel: &CancelToken) -> Result<RunOutcome> {
        if !self.store.claim_run(id, self.config.run_lease())? {
            info!("full sync skipped for {}: run already active", id.as_str());
            return Ok(RunOutcome::AlreadyRunning);
        }
        let _guard = RunGuard {
            store: self.store.as_ref(),
            id,
        };

        let integration = self
            .store
            .get_integration(id)?
            .with_context(|| format!("Unknown integration: {}", id.as_str()))?;
        match integration.status {
            IntegrationStatus::FullSyncing => {}
            IntegrationStatus::SteadyState => {
                if !self.store.transition_status(
                    id,
                    &[IntegrationStatus::SteadyState],
                    IntegrationStatus::FullSyncing,
                    None,
                )? {
                    bail!("integration {} left steady_state mid-trigger", id.as_str());
                }
            }
            other => {
                bail!(
                    "integration {} cannot full-sync from {}",
                    id.as_str(),
                    other.as_str()
                );
            }
        }

        let result = full_sync(
            self.provider.as_ref(),
            self.store.as_ref(),
            &self.fetcher,
            id,
            &self.config,
            cancel,
        );
        self.finish(id, result, false)
    }

    /// Run an incremental sync from the stored checkpoint.
    ///
    /// If an interrupted full sync is still in progress, the trigger
    /// resumes it instead; incremental catch-up happens on the next run.
    pub fn run_incremental_sync(
        &self,
        id: &IntegrationId,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        if !self.store.claim_run(id, self.config.run_lease())? {
            info!(
                "incremental sync skipped for {}: run already active",
                id.as_str()
            );
            return Ok(RunOutcome::AlreadyRunning);
        }
        let _guard = RunGuard {
            store: self.store.as_ref(),
            id,
        };

        let integration = self
            .store
            .get_integration(id)?
            .with_context(|| format!("Unknown integration: {}", id.as_str()))?;
        match integration.status {
            IntegrationStatus::SteadyState => {
                if !self.store.transition_status(
                    id,
                    &[IntegrationStatus::SteadyState],
                    IntegrationStatus::IncrementalSyncing,
                    None,
                )? {
                    bail!("integration {} left steady_state mid-trigger", id.as_str());
                }
                let result = incremental_sync(
                    self.provider.as_ref(),
                    self.store.as_ref(),
                    &self.fetcher,
                    id,
                    &self.config,
                    cancel,
                );
                self.finish(id, result, true)
            }
            IntegrationStatus::FullSyncing => {
                info!(
                    "incremental trigger for {} resuming interrupted full sync",
                    id.as_str()
                );
                let result = full_sync(
                    self.provider.as_ref(),
                    self.store.as_ref(),
                    &self.fetcher,
                    id,
                    &self.config,
                    cancel,
                );
                self.finish(id, result, false)
            }
            other => {
                bail!(
                    "integration {} cannot incremental-sync from {}",
                    id.as_str(),
                    other.as_str()
                );
            }
        }
    }

    /// Map an engine result onto the integration's durable state.
    ///
    /// An unauthorized credential parks the integration in Error until it
    /// is re-authorized. Transient failures only record `last_error`: a
    /// full sync stays in FullSyncing so the next trigger resumes from the
    /// page cursor, while an incremental run falls back to SteadyState
    /// with its checkpoint untouched.
    fn finish(
        &self,
        id: &IntegrationId,
        result: Result<SyncStats>,
        incremental: bool,
    ) -> Result<RunOutcome> {
        match result {
            Ok(stats) => Ok(RunOutcome::Completed(stats)),
            Err(e) => {
                let detail = format!("{:#}", e);
                if let Some(ProviderError::Unauthorized) = e.downcast_ref::<ProviderError>() {
                    self.store.transition_status(
                        id,
                        &[
                            IntegrationStatus::Authorizing,
                            IntegrationStatus::FullSyncing,
                            IntegrationStatus::SteadyState,
                            IntegrationStatus::IncrementalSyncing,
                        ],
                        IntegrationStatus::Error,
                        Some(&detail),
                    )?;
                    warn!("integration {} unauthorized: {}", id.as_str(), detail);
                } else if incremental {
                    let moved = self.store.transition_status(
                        id,
                        &[IntegrationStatus::IncrementalSyncing],
                        IntegrationStatus::SteadyState,
                        Some(&detail),
                    )?;
                    if !moved {
                        // run already left incremental (e.g. a delegated
                        // full sync); still record the failure
                        if let Some(mut integration) = self.store.get_integration(id)? {
                            integration.last_error = Some(detail.clone());
                            self.store.save_integration(&integration)?;
                        }
                    }
                    warn!(
                        "incremental sync failed for {}: {}",
                        id.as_str(),
                        detail
                    );
                } else {
                    // FullSyncing persists so the page cursor stays resumable
                    if let Some(mut integration) = self.store.get_integration(id)? {
                        integration.last_error = Some(detail.clone());
                        self.store.save_integration(&integration)?;
                    }
                    warn!("full sync failed for {}: {}", id.as_str(), detail);
                }
                Err(e)
            }
        }
    }
}
