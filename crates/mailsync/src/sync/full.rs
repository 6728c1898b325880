//! Full snapshot sync: page through the mailbox and mirror every message

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use super::fetch::Fetcher;
use super::runner::{CancelToken, SyncStats};
use crate::config::SyncConfig;
use crate::models::{IntegrationId, IntegrationStatus};
use crate::provider::{ListScope, MailProvider};
use crate::storage::MailStore;

/// Mirror the snapshot scope of the mailbox into the store.
///
/// Pages through message IDs and hands each page to the batch fetcher.
/// After a page is fully upserted, the integration's `resume_page_token`
/// advances to the next page and progress counters are persisted, so a
/// crashed or cancelled run restarts from the last completed page and
/// idempotent upserts absorb any overlap.
///
/// The run ends in one of three ways:
/// - the last page is reached, or the safety cap is hit: a baseline
///   checkpoint is captured, the cursor is cleared, and the integration
///   moves to SteadyState. A capped mirror is deliberately incomplete;
///   older history is a known gap and changes still flow in incrementally.
/// - cancellation: the cursor stays where it is and the integration stays
///   in FullSyncing for the next trigger to resume.
pub fn full_sync(
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

    let mut stats = SyncStats::default();
    let mut page_token = integration.resume_page_token.clone();
    if page_token.is_some() {
        info!(
            "resuming full sync for {} at {} messages",
            id.as_str(),
            integration.total_synced
        );
    } else {
        info!("starting full sync for {}", id.as_str());
    }

    let mut complete = false;
    loop {
        if cancel.is_cancelled() {
            info!(
                "full sync cancelled for {} after {} pages",
                id.as_str(),
                stats.pages
            );
            break;
        }

        let page = provider.list_message_ids(
            ListScope::Snapshot,
            page_token.as_deref(),
            config.page_size,
        )?;
        stats.pages += 1;

        let outcome =
            fetcher.fetch_and_store(provider, store, &integration, &page.ids, cancel, &mut stats)?;
        integration.total_synced += outcome.upserted as u64;
        integration.last_sync_at = Some(Utc::now());

        if !outcome.completed {
            // cursor stays on this page; the next run re-lists it
            store.save_integration(&integration)?;
            break;
        }

        integration.resume_page_token = page.next_page_token.clone();
        store.save_integration(&integration)?;

        match page.next_page_token {
            None => {
                complete = true;
                break;
            }
            Some(token) => {
                if integration.total_synced >= config.full_sync_cap {
                    info!(
                        "full sync cap of {} reached for {}; older history left to incremental",
                        config.full_sync_cap,
                        id.as_str()
                    );
                    stats.capped = true;
                    complete = true;
                    break;
                }
                page_token = Some(token);
            }
        }
    }

    if complete {
        // Baseline taken after the pages, so anything that changed while
        // the snapshot ran is replayed by the first incremental sync.
        let checkpoint = provider.current_checkpoint()?;
        integration.last_checkpoint = Some(checkpoint);
        integration.resume_page_token = None;
        integration.last_error = None;
        integration.last_sync_at = Some(Utc::now());
        store.save_integration(&integration)?;

        if !store.transition_status(
            id,
            &[IntegrationStatus::FullSyncing],
            IntegrationStatus::SteadyState,
            None,
        )? {
            warn!(
                "full sync for {} finished but the integration left full_syncing",
                id.as_str()
            );
        }
        info!(
            "full sync complete for {}: {} messages over {} pages ({} errors)",
            id.as_str(),
            integration.total_synced,
            stats.pages,
            stats.errors
        );
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}
