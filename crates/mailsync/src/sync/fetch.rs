//! Batch fetcher: chunked concurrent message fetch with per-item isolation

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;

use super::runner::{CancelToken, SyncStats};
use crate::models::{Integration, MessageId};
use crate::provider::{MailProvider, ProviderError, normalize_message};
use crate::storage::MailStore;

/// Result of one batch: how many messages landed in the store, and whether
/// the whole id list was processed (false when cancelled between chunks)
#[derive(Debug, Clone, Copy)]
pub struct FetchOutcome {
    pub upserted: usize,
    pub completed: bool,
}

/// Fetches full message bodies for lists of remote IDs.
///
/// IDs are processed in fixed-size chunks: within a chunk every fetch runs
/// concurrently on a dedicated thread pool, and the next chunk starts only
/// after the whole chunk has joined. Chunking bounds peak concurrency to
/// respect upstream rate limits while keeping throughput per window.
pub struct Fetcher {
    pool: rayon::ThreadPool,
    chunk_size: usize,
}

impl Fetcher {
    /// Create a fetcher whose pool is sized to the chunk
    pub fn new(chunk_size: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(chunk_size.max(1))
            .build()
            .context("Failed to build fetch thread pool")?;
        Ok(Self {
            pool,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Fetch, normalize and store every message in `ids`.
    ///
    /// Each chunk's successes are upserted (and queued for enrichment)
    /// before the next chunk is dispatched, so a crash loses at most the
    /// in-flight chunk. A failed fetch or parse of one ID is logged and
    /// skipped; it never aborts the chunk or the batch. The one exception
    /// is a rejected credential: every remaining item would fail the same
    /// way, so the batch stops once the current chunk has joined.
    pub fn fetch_and_store(
        &self,
        provider: &dyn MailProvider,
        store: &dyn MailStore,
        integration: &Integration,
        ids: &[MessageId],
        cancel: &CancelToken,
        stats: &mut SyncStats,
    ) -> Result<FetchOutcome> {
        let mut upserted = 0;

        for chunk in ids.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                info!(
                    "fetch cancelled for {} with {} of {} ids processed",
                    integration.id.as_str(),
                    upserted,
                    ids.len()
                );
                return Ok(FetchOutcome {
                    upserted,
                    completed: false,
                });
            }

            let results: Vec<Result<_, ProviderError>> = self
                .pool
                .install(|| chunk.par_iter().map(|id| provider.get_message(id)).collect());

            let mut unauthorized = false;
            for (id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(raw) => {
                        let message = normalize_message(
                            raw,
                            &integration.workspace_id,
                            integration.id.as_str(),
                        );
                        let message_id = message.id.clone();
                        store.upsert_message(message)?;
                        store.enqueue_enrichment(&integration.workspace_id, &message_id)?;
                        stats.messages_fetched += 1;
                        stats.messages_upserted += 1;
                        upserted += 1;
                    }
                    Err(ProviderError::Unauthorized) => {
                        unauthorized = true;
                    }
                    Err(e) => {
                        warn!("failed to fetch message {}: {}", id.as_str(), e);
                        stats.errors += 1;
                    }
                }
            }

            if unauthorized {
                return Err(ProviderError::Unauthorized.into());
            }
        }

        Ok(FetchOutcome {
            upserted,
            completed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Checkpoint, Integration, IntegrationId, WorkspaceId};
    use crate::provider::api::RawMessage;
    use crate::provider::{ChangeFeed, ListScope, MessageIdPage, Profile};
    use crate::storage::InMemoryMailStore;
    use std::collections::HashSet;

    /// Provider that serves synthetic messages, failing a chosen set of ids
    struct FlakyProvider {
        failing: HashSet<String>,
    }

    impl MailProvider for FlakyProvider {
        fn profile(&self) -> Result<Profile, ProviderError> {
            Ok(Profile {
                email_address: "user@example.com".to_string(),
            })
        }

        fn list_message_ids(
            &self,
            _scope: ListScope,
            _page_token: Option<&str>,
            _page_size: usize,
        ) -> Result<MessageIdPage, ProviderError> {
            Ok(MessageIdPage::default())
        }

        fn get_message(&self, id: &MessageId) -> Result<RawMessage, ProviderError> {
            if self.failing.contains(id.as_str()) {
                return Err(ProviderError::Status(500));
            }
            Ok(RawMessage {
                id: id.as_str().to_string(),
                thread_id: format!("t-{}", id.as_str()),
                label_ids: Some(vec!["INBOX".to_string()]),
                snippet: String::new(),
                internal_date: "1700000000000".to_string(),
                payload: None,
            })
        }

        fn changes_since(&self, _checkpoint: &Checkpoint) -> Result<ChangeFeed, ProviderError> {
            unimplemented!("not used by fetch tests")
        }

        fn current_checkpoint(&self) -> Result<Checkpoint, ProviderError> {
            Ok(Checkpoint::new("1"))
        }
    }

    fn make_integration() -> Integration {
        Integration::new(
            IntegrationId::new("i1"),
            WorkspaceId::new("w1"),
            "gmail",
            "user@example.com",
            "cred",
        )
    }

    #[test]
    fn test_failed_item_is_skipped_not_fatal() {
        // 25 ids, chunk size 10, one failure in the second chunk
        let provider = FlakyProvider {
            failing: HashSet::from(["m13".to_string()]),
        };
        let store = InMemoryMailStore::new();
        let integration = make_integration();
        let fetcher = Fetcher::new(10).unwrap();
        let ids: Vec<MessageId> = (1..=25).map(|i| MessageId::new(format!("m{}", i))).collect();

        let mut stats = SyncStats::default();
        let outcome = fetcher
            .fetch_and_store(
                &provider,
                &store,
                &integration,
                &ids,
                &CancelToken::new(),
                &mut stats,
            )
            .unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.upserted, 24);
        assert_eq!(stats.errors, 1);
        assert_eq!(store.count_messages(&WorkspaceId::new("w1")).unwrap(), 24);
        assert!(!store
            .has_message(&WorkspaceId::new("w1"), &MessageId::new("m13"))
            .unwrap());
    }

    #[test]
    fn test_successes_are_queued_for_enrichment() {
        let provider = FlakyProvider {
            failing: HashSet::new(),
        };
        let store = InMemoryMailStore::new();
        let fetcher = Fetcher::new(2).unwrap();
        let ids = vec![MessageId::new("m1"), MessageId::new("m2")];

        let mut stats = SyncStats::default();
        fetcher
            .fetch_and_store(
                &provider,
                &store,
                &make_integration(),
                &ids,
                &CancelToken::new(),
                &mut stats,
            )
            .unwrap();

        assert_eq!(store.enrichment_queue_len().unwrap(), 2);
    }

    #[test]
    fn test_cancelled_batch_reports_incomplete() {
        let provider = FlakyProvider {
            failing: HashSet::new(),
        };
        let store = InMemoryMailStore::new();
        let fetcher = Fetcher::new(10).unwrap();
        let ids: Vec<MessageId> = (1..=5).map(|i| MessageId::new(format!("m{}", i))).collect();

        let cancel = CancelToken::new();
        cancel.cancel();

        let mut stats = SyncStats::default();
        let outcome = fetcher
            .fetch_and_store(
                &provider,
                &store,
                &make_integration(),
                &ids,
                &cancel,
                &mut stats,
            )
            .unwrap();

        assert!(!outcome.completed);
        assert_eq!(outcome.upserted, 0);
    }
}
