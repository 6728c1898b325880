//! Incremental sync: apply the provider change feed from the checkpoint

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};

use super::fetch::Fetcher;
use super::full::full_sync;
use super::runner::{CancelToken, SyncStats};
use crate::config::SyncConfig;
use crate::models::{Integration, IntegrationId, IntegrationStatus, apply_label_delta};
use crate::provider::{ChangeEvent, MailProvider, ProviderError};
use crate::storage::MailStore;

/// Catch the mirror up from the stored checkpoint.
///
/// Events are applied strictly in feed order, and the new checkpoint is
/// persisted only after every event has been applied. A failure partway
/// through leaves the old checkpoint in place; re-applying the same feed
/// later is safe because adds are idempotent upserts, deletes keep their
/// first tombstone timestamp, and label deltas converge.
///
/// Two conditions fall back to a full sync: a missing checkpoint (mirror
/// never baselined) and a checkpoint the provider no longer honors. The
/// expired case clears the stored checkpoint first so a crash between the
/// fallback and its completion cannot resurrect the bad value.
pub fn incremental_sync(
    provider: &dyn MailProvider,
    store: &dyn MailStore,
    fetcher: &Fetcher,
    id: &IntegrationId,
    config: &SyncConfig,
    cancel: &CancelToken,
) -> Result<SyncStats> {
    let start = Instant::now();
    let mut integration = store
        .get_integration(id)?
        .with_context(|| format!("Unknown integration: {}", id.as_str()))?;

    let Some(checkpoint) = integration.last_checkpoint.clone() else {
        info!(
            "no checkpoint for {}; bootstrapping with a full sync",
            id.as_str()
        );
        fall_back_to_full(store, id)?;
        return full_sync(provider, store, fetcher, id, config, cancel);
    };

    if !integration.checkpoint_is_fresh(config.checkpoint_max_age_days) {
        debug!(
            "checkpoint for {} is older than {} days; provider may reject it",
            id.as_str(),
            config.checkpoint_max_age_days
        );
    }

    let feed = match provider.changes_since(&checkpoint) {
        Ok(feed) => feed,
        Err(ProviderError::CheckpointExpired) => {
            warn!(
                "checkpoint {} expired for {}; falling back to full sync",
                checkpoint.as_str(),
                id.as_str()
            );
            integration.last_checkpoint = None;
            integration.resume_page_token = None;
            store.save_integration(&integration)?;
            fall_back_to_full(store, id)?;
            return full_sync(provider, store, fetcher, id, config, cancel);
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        "incremental sync for {}: {} events since {}",
        id.as_str(),
        feed.events.len(),
        checkpoint.as_str()
    );

    let mut stats = SyncStats::default();
    for event in &feed.events {
        if cancel.is_cancelled() {
            // checkpoint untouched; the whole feed replays next run
            info!("incremental sync cancelled for {}", id.as_str());
            stats.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(stats);
        }
        apply_event(provider, store, fetcher, &integration, event, cancel, &mut stats)?;
    }

    integration.total_synced += stats.messages_upserted as u64;
    integration.last_checkpoint = Some(feed.new_checkpoint);
    integration.last_sync_at = Some(Utc::now());
    integration.last_error = None;
    store.save_integration(&integration)?;

    if !store.transition_status(
        id,
        &[IntegrationStatus::IncrementalSyncing],
        IntegrationStatus::SteadyState,
        None,
    )? {
        warn!(
            "incremental sync for {} finished but the integration left incremental_syncing",
            id.as_str()
        );
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "incremental sync complete for {}: +{} -{} ~{} ({} errors)",
        id.as_str(),
        stats.messages_upserted,
        stats.messages_deleted,
        stats.label_updates,
        stats.errors
    );
    Ok(stats)
}

fn fall_back_to_full(store: &dyn MailStore, id: &IntegrationId) -> Result<()> {
    if !store.transition_status(
        id,
        &[IntegrationStatus::IncrementalSyncing],
        IntegrationStatus::FullSyncing,
        None,
    )? {
        anyhow::bail!(
            "integration {} left incremental_syncing before full-sync fallback",
            id.as_str()
        );
    }
    Ok(())
}

fn apply_event(
    provider: &dyn MailProvider,
    store: &dyn MailStore,
    fetcher: &Fetcher,
    integration: &Integration,
    event: &ChangeEvent,
    cancel: &CancelToken,
    stats: &mut SyncStats,
) -> Result<()> {
    match event {
        ChangeEvent::Added(id) => {
            // same isolation as the full-sync path: a failed fetch is
            // logged and skipped, not fatal to the feed
            fetcher.fetch_and_store(
                provider,
                store,
                integration,
                std::slice::from_ref(id),
                cancel,
                stats,
            )?;
        }
        ChangeEvent::Deleted(id) => {
            if store.soft_delete_message(&integration.workspace_id, id, Utc::now())? {
                stats.messages_deleted += 1;
            } else {
                debug!("delete event for unmirrored message {}", id.as_str());
            }
        }
        ChangeEvent::LabelsChanged { id, added, removed } => {
            match store.get_message(&integration.workspace_id, id)? {
                Some(message) => {
                    let labels = apply_label_delta(&message.labels, added, removed);
                    store.update_message_labels(&integration.workspace_id, id, labels)?;
                    stats.label_updates += 1;
                }
                None => {
                    debug!("label event for unmirrored message {}", id.as_str());
                }
            }
        }
    }
    Ok(())
}
