//! Completion of partial results.
//!
//! Some indexers return results without an info-hash but with a link to
//! the `.torrent` file. Those are completed by fetching the source and
//! deriving the magnet, with a bounded fan-out. Completion failures are
//! logged and skipped; the incomplete result is dropped later by the
//! post-filter.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::warn;

use crate::torznab::{MagnetResolver, TorzResult};

/// Complete partial results in place.
///
/// `batches` is the per-plan result set; results sharing a `source_link`
/// are fetched exactly once (the first occurrence wins, duplicates are
/// dropped later by hash dedup).
pub(crate) async fn complete_results(
    batches: &mut [Vec<TorzResult>],
    resolver: &Arc<dyn MagnetResolver>,
    max_concurrent: usize,
) {
    let mut seen_links: HashSet<String> = HashSet::new();
    let mut jobs: Vec<(usize, usize, String)> = Vec::new();

    for (batch_index, batch) in batches.iter().enumerate() {
        for (item_index, item) in batch.iter().enumerate() {
            if !item.has_missing_data() {
                continue;
            }
            let Some(link) = item.source_link.clone().filter(|l| !l.is_empty()) else {
                continue;
            };
            if !seen_links.insert(link.clone()) {
                continue;
            }
            jobs.push((batch_index, item_index, link));
        }
    }

    if jobs.is_empty() {
        return;
    }

    let fetched: Vec<_> = stream::iter(jobs)
        .map(|(batch_index, item_index, link)| {
            let resolver = Arc::clone(resolver);
            async move {
                let result = resolver.resolve(&link).await;
                (batch_index, item_index, link, result)
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    for (batch_index, item_index, link, result) in fetched {
        match result {
            Ok((hash, files)) => {
                batches[batch_index][item_index].complete(&hash, files);
            }
            Err(err) => {
                warn!(source_link = %link, error = %err, "failed to ensure magnet link for torrent");
            }
        }
    }
}
