//! Sync engines: full snapshot, incremental change feed, batch fetch

mod fetch;
mod full;
mod incremental;
mod runner;
mod timing;

pub use fetch::Fetcher;
pub use full::full_sync;
pub use incremental::incremental_sync;
pub use runner::{CancelToken, RunOutcome, SyncRunner, SyncStats};
pub use timing::cooldown_elapsed;
