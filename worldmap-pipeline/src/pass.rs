//! One enumeration pass over every chunk a world knows about.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use worldmap_world::{ChunkFetch, ChunkKey, ChunkSource};

use crate::coordinator::{Coordinator, Submission};

pub const LIST_ATTEMPTS: u32 = 10;
pub const LIST_RETRY_DELAY: Duration = Duration::from_millis(500);
const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub total: usize,
    pub queued: usize,
    pub skipped: usize,
}

/// List every known chunk of `source` and hand the unprocessed ones to the
/// coordinator. Returns once everything is queued, not once it is delivered.
///
/// When the listing never becomes ready, only the chunks currently loaded
/// are processed. With none loaded the summary is empty.
pub async fn run_pass(source: Arc<dyn ChunkSource>, coordinator: &Coordinator) -> PassSummary {
    let world_id = source.world_id().to_string();
    let keys = match list_with_retry(source.as_ref()).await {
        Ok(keys) => keys,
        Err(e) => {
            log::warn!("{:#}", e);
            log::warn!("Falling back to currently loaded chunks of {}", world_id);
            match source.loaded_chunks().await {
                Ok(loaded) if !loaded.is_empty() => loaded.into_iter().collect(),
                Ok(_) => {
                    log::error!("No chunks loaded in {}, nothing to process", world_id);
                    return PassSummary::default();
                }
                Err(e) => {
                    log::error!("Failed to read loaded chunks of {}: {:#}", world_id, e);
                    return PassSummary::default();
                }
            }
        }
    };

    let first_load = coordinator.ledger().is_first_load();
    log::info!(
        "Found {} chunks in world {} ({} already processed{})",
        keys.len(),
        world_id,
        coordinator.ledger().processed_count(),
        if first_load { ", first load" } else { "" }
    );

    let mut summary = PassSummary { total: keys.len(), ..Default::default() };
    for key in keys {
        let fetch: ChunkFetch = {
            let source = Arc::clone(&source);
            Box::pin(async move { source.fetch_chunk(key).await })
        };

        match coordinator.submit(key, fetch) {
            Submission::Queued => summary.queued += 1,
            Submission::Skipped => summary.skipped += 1,
            Submission::Rejected => {
                log::info!("Coordinator stopped, ending pass over {}", world_id);
                break;
            }
        }

        let seen = summary.queued + summary.skipped;
        if seen % PROGRESS_INTERVAL == 0 {
            log::info!("Queued {}/{} chunks ({} skipped)", seen, summary.total, summary.skipped);
        }
    }

    if first_load {
        let ledger = Arc::clone(coordinator.ledger());
        if let Err(e) = tokio::task::spawn_blocking(move || ledger.mark_loaded()).await {
            log::error!("Failed to record first load: {}", e);
        }
    }

    log::info!(
        "Pass over {} queued {} chunks, skipped {}",
        world_id,
        summary.queued,
        summary.skipped
    );
    summary
}

/// The chunk listing may not be ready right after the world starts.
async fn list_with_retry(source: &dyn ChunkSource) -> Result<Vec<ChunkKey>> {
    let mut attempt = 1;
    loop {
        match source.list_known_chunks().await {
            Ok(keys) => return Ok(keys.into_iter().collect()),
            Err(e) if attempt < LIST_ATTEMPTS => {
                log::debug!("Chunk listing not ready (attempt {}): {}", attempt, e);
                attempt += 1;
                tokio::time::sleep(LIST_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "Failed to list chunks of {} after {} attempts",
                    source.world_id(),
                    LIST_ATTEMPTS
                )));
            }
        }
    }
}
