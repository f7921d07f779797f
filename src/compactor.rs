use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that rewrites a tenant's WAL once `threshold` appends
/// have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            tracing::warn!("WAL compaction failed: {e}");
            false
        }
    }
}
