//! Indexer fan-out search engine.
//!
//! Given a stream id and a set of torznab indexers, the engine normalizes
//! the id, derives per-indexer query plans from their capabilities, fans
//! the plans out concurrently, completes partial results, post-filters by
//! parsed title, and merges everything into a deduplicated stream list.
//! Newly discovered torrent metadata is upserted into the long-term store
//! as a side effect.

mod complete;
mod fanout;
mod planner;
mod post_filter;
mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::filter::FilterProgram;
use crate::rank;
use crate::store::{TorrentCategory, TorrentFileEntry, TorrentInfoStore, TorrentItem};
use crate::stream_id::{NormalizedStreamId, StreamIdNormalizer};
use crate::metadata::TitleProvider;
use crate::title::{has_video_extension, parse_release_title};
use crate::torznab::{CapsCache, MagnetFetcher, MagnetResolver, TorznabClient};
use crate::worker::{SyncQueueItem, WorkerQueue};

pub(crate) use planner::{build_plans, build_query_meta};
pub(crate) use complete::complete_results;

pub use types::{
    PlannedQuery, QueryMeta, SearchError, SearchOutcome, SearchPlan, StreamFile, WrappedStream,
    TITLE_MATCH_MAX_EDITS,
};

/// Bounded fan-out for `.torrent` fetches on the request path.
const MAGNET_FETCH_CONCURRENCY: usize = 20;

/// The fan-out search engine.
pub struct StreamSearcher {
    normalizer: Arc<StreamIdNormalizer>,
    titles: Arc<dyn TitleProvider>,
    torrents: Arc<dyn TorrentInfoStore>,
    resolver: Arc<dyn MagnetResolver>,
    caps: CapsCache,
    sync_queue: Option<Arc<WorkerQueue<SyncQueueItem>>>,
    indexer_max_timeout: Option<Duration>,
    lazy_pull: bool,
}

impl StreamSearcher {
    pub fn new(
        normalizer: Arc<StreamIdNormalizer>,
        titles: Arc<dyn TitleProvider>,
        torrents: Arc<dyn TorrentInfoStore>,
    ) -> Self {
        Self {
            normalizer,
            titles,
            torrents,
            resolver: Arc::new(MagnetFetcher::new()),
            caps: CapsCache::new(),
            sync_queue: None,
            indexer_max_timeout: None,
            lazy_pull: false,
        }
    }

    /// Substitute the magnet resolver (tests use a mock).
    pub fn with_resolver(mut self, resolver: Arc<dyn MagnetResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Feed searched stream ids into the background sync queue.
    pub fn with_sync_queue(mut self, queue: Arc<WorkerQueue<SyncQueueItem>>) -> Self {
        self.sync_queue = Some(queue);
        self
    }

    /// Total deadline for the fan-out; stragglers are logged, not awaited.
    pub fn with_indexer_max_timeout(mut self, timeout: Duration) -> Self {
        self.indexer_max_timeout = Some(timeout);
        self
    }

    /// Upsert discovered metadata in a detached task instead of inline.
    pub fn with_lazy_pull(mut self, lazy_pull: bool) -> Self {
        self.lazy_pull = lazy_pull;
        self
    }

    /// Search all given indexers for streams of `stream_id`.
    pub async fn search(
        &self,
        stream_id: &str,
        indexers: &[Arc<dyn TorznabClient>],
    ) -> Result<SearchOutcome, SearchError> {
        if indexers.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let nsid = self.normalizer.normalize(stream_id).await?;

        // User traffic feeds the background sync backlog.
        if !nsid.is_anime {
            if let Some(queue) = &self.sync_queue {
                queue.queue(SyncQueueItem {
                    sid: nsid.to_string(),
                });
            }
        }

        let meta = build_query_meta(&nsid, &self.titles).await?;

        let mut plans: Vec<SearchPlan> = Vec::with_capacity(indexers.len() * 2);
        for client in indexers {
            let caps = match self.caps.get(client).await {
                Ok(caps) => caps,
                Err(err) => {
                    error!(indexer = client.id(), error = %err, "failed to fetch indexer capabilities");
                    continue;
                }
            };
            for planned in build_plans(&caps, &nsid, &meta) {
                plans.push(SearchPlan {
                    client: Arc::clone(client),
                    query: planned.query,
                    is_exact: planned.is_exact,
                });
            }
        }

        if plans.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let outcomes = fanout::execute_plans(&plans, self.indexer_max_timeout).await;

        let mut batches: Vec<Vec<_>> = (0..plans.len()).map(|_| Vec::new()).collect();
        let mut errors = Vec::new();
        let mut any_success = false;
        for outcome in outcomes {
            match outcome.result {
                Ok(items) => {
                    any_success = true;
                    batches[outcome.plan_index] = items;
                }
                Err(err) => {
                    errors.push(format!("{}: {}", plans[outcome.plan_index].client.id(), err));
                }
            }
        }
        if !any_success && !errors.is_empty() {
            return Err(SearchError::AllPlansFailed(errors.join("; ")));
        }

        complete_results(&mut batches, &self.resolver, MAGNET_FETCH_CONCURRENCY).await;

        // Unique hashes in discovery order, completed results only.
        let mut hash_set = HashSet::new();
        let mut hashes = Vec::new();
        for batch in &batches {
            for item in batch {
                if item.has_missing_data() {
                    continue;
                }
                let hash = item.hash.to_lowercase();
                if hash_set.insert(hash.clone()) {
                    hashes.push(hash);
                }
            }
        }

        let info_by_hash = self.torrents.get_by_hashes(&hashes)?;
        let files_by_hash = self.torrents.get_files_by_hashes(&hashes)?;

        let id_to_match = file_match_id(&nsid, stream_id);

        let mut seen = HashSet::new();
        let mut upserts: Vec<TorrentItem> = Vec::new();
        let mut streams = Vec::new();

        for (plan_index, batch) in batches.iter().enumerate() {
            let is_exact = plans[plan_index].is_exact;
            for item in batch {
                let Some(parsed) = post_filter::survives(item, is_exact, &nsid, &meta) else {
                    continue;
                };
                let hash = item.hash.to_lowercase();
                if !seen.insert(hash.clone()) {
                    continue;
                }

                let stored = info_by_hash.get(&hash);

                // Keep the long-term store fresh: record unseen torrents,
                // and replace stored titles that look truncated.
                let looks_authoritative = stored
                    .map(|info| info.title.len() >= item.title.len() / 2)
                    .unwrap_or(false);
                if !looks_authoritative {
                    upserts.push(TorrentItem {
                        hash: hash.clone(),
                        title: item.title.clone(),
                        size: item.size,
                        indexer: item.indexer.clone(),
                        seeders: item.seeders,
                        leechers: item.leechers,
                        private: item.private,
                        files: item.files.clone(),
                    });
                }

                let (title, parsed, is_private, size) = match stored {
                    Some(info) => (
                        info.title.clone(),
                        parse_release_title(&info.title),
                        info.private || item.private,
                        if item.size > 0 { item.size } else { info.size },
                    ),
                    None => (item.title.clone(), parsed, item.private, item.size),
                };

                let mut file = files_by_hash
                    .get(&hash)
                    .and_then(|files| pick_file(files, id_to_match.as_deref()));
                if file.is_none() && has_video_extension(&title) {
                    file = Some(StreamFile {
                        name: title.clone(),
                        index: -1,
                        size: 0,
                    });
                }

                streams.push(WrappedStream {
                    hash,
                    title,
                    indexer: item.indexer.clone(),
                    seeders: item.seeders,
                    is_private,
                    size,
                    source_link: item.source_link.clone(),
                    parsed,
                    file,
                });
            }
        }

        debug!(
            streams = streams.len(),
            hashes = hashes.len(),
            "indexer fan-out merged"
        );

        if !upserts.is_empty() {
            if self.lazy_pull {
                let torrents = Arc::clone(&self.torrents);
                tokio::spawn(async move {
                    if let Err(err) = torrents.upsert(&upserts, TorrentCategory::Unknown, false) {
                        error!(error = %err, "failed to upsert discovered torrents");
                    }
                });
            } else {
                self.torrents
                    .upsert(&upserts, TorrentCategory::Unknown, false)?;
            }
        }

        Ok(SearchOutcome { streams, hashes })
    }
}

/// The stream id a torrent file must map to.
fn file_match_id(nsid: &NormalizedStreamId, stream_id: &str) -> Option<String> {
    if nsid.is_anime {
        if nsid.id.is_empty() {
            return None;
        }
        let episode = nsid.episode.as_deref().unwrap_or_default();
        return Some(format!("{}:{}", nsid.id, episode));
    }
    (!stream_id.is_empty()).then(|| stream_id.to_string())
}

fn pick_file(files: &[TorrentFileEntry], id_to_match: Option<&str>) -> Option<StreamFile> {
    let id_to_match = id_to_match?;
    files
        .iter()
        .filter(|f| f.is_video())
        .filter(|f| {
            f.sid.as_deref() == Some(id_to_match) || f.anime_sid.as_deref() == Some(id_to_match)
        })
        .last()
        .map(|f| StreamFile {
            name: f.name.clone(),
            index: f.index,
            size: f.size,
        })
}

/// A sortable stream attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Resolution,
    Quality,
    Size,
    Seeders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A user-specified sort over the emitted streams.
#[derive(Debug, Clone, Default)]
pub struct SortSpec {
    pub keys: Vec<(SortField, SortOrder)>,
}

impl SortSpec {
    /// Parse a `"field:order,field:order"` spec; unknown fields are
    /// ignored.
    pub fn parse(spec: &str) -> Self {
        let mut keys = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (field, order) = match part.split_once(':') {
                Some((field, order)) => (field, order),
                None => (part, "desc"),
            };
            let field = match field.trim().to_lowercase().as_str() {
                "resolution" => SortField::Resolution,
                "quality" => SortField::Quality,
                "size" => SortField::Size,
                "seeders" => SortField::Seeders,
                _ => continue,
            };
            let order = match order.trim().to_lowercase().as_str() {
                "asc" => SortOrder::Asc,
                _ => SortOrder::Desc,
            };
            keys.push((field, order));
        }
        Self { keys }
    }

    /// The default ordering: best resolution, then quality, then size.
    pub fn default_order() -> Self {
        Self {
            keys: vec![
                (SortField::Resolution, SortOrder::Desc),
                (SortField::Quality, SortOrder::Desc),
                (SortField::Size, SortOrder::Desc),
            ],
        }
    }
}

fn sort_key(stream: &WrappedStream, field: SortField) -> i64 {
    match field {
        SortField::Resolution => rank::resolution_rank(&stream.parsed.resolution),
        SortField::Quality => rank::quality_rank(&stream.parsed.quality),
        SortField::Size => stream.size,
        SortField::Seeders => stream.seeders,
    }
}

/// Stable sort by the spec's keys, semantic fields compared by rank.
pub fn sort_streams(streams: &mut [WrappedStream], spec: &SortSpec) {
    if spec.keys.is_empty() {
        return;
    }
    streams.sort_by(|a, b| {
        for (field, order) in &spec.keys {
            let ordering = sort_key(a, *field).cmp(&sort_key(b, *field));
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Stable partition: cached entries first, each side keeping its current
/// order. Apply after the user sort.
pub fn split_cached_first(
    streams: Vec<WrappedStream>,
    cached: &HashSet<String>,
) -> Vec<WrappedStream> {
    let (mut cached_streams, uncached): (Vec<_>, Vec<_>) = streams
        .into_iter()
        .partition(|stream| cached.contains(&stream.hash));
    cached_streams.extend(uncached);
    cached_streams
}

/// Keep the streams passing the filter program.
pub fn apply_filter(streams: Vec<WrappedStream>, program: &FilterProgram) -> Vec<WrappedStream> {
    streams
        .into_iter()
        .filter(|stream| program.matches(&stream.filter_record()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(hash: &str, resolution: &str, size: i64, seeders: i64) -> WrappedStream {
        WrappedStream {
            hash: hash.to_string(),
            seeders,
            size,
            parsed: crate::title::ParsedTitle {
                resolution: resolution.to_string(),
                ..Default::default()
            },
            ..WrappedStream::default()
        }
    }

    #[test]
    fn test_sort_streams_by_resolution_rank() {
        let mut streams = vec![
            stream("a", "720p", 0, 0),
            stream("b", "2160p", 0, 0),
            stream("c", "1080p", 0, 0),
        ];
        sort_streams(
            &mut streams,
            &SortSpec::parse("resolution:desc"),
        );
        let order: Vec<_> = streams.iter().map(|s| s.hash.as_str()).collect();
        // Lexical order would put "720p" first.
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_sort_streams_secondary_key() {
        let mut streams = vec![
            stream("small", "1080p", 100, 0),
            stream("big", "1080p", 900, 0),
        ];
        sort_streams(
            &mut streams,
            &SortSpec::parse("resolution:desc,size:desc"),
        );
        assert_eq!(streams[0].hash, "big");
    }

    #[test]
    fn test_sort_spec_parse_ignores_unknown() {
        let spec = SortSpec::parse("resolution:desc,unknown:asc,seeders");
        assert_eq!(spec.keys.len(), 2);
        assert_eq!(spec.keys[1], (SortField::Seeders, SortOrder::Desc));
    }

    #[test]
    fn test_split_cached_first_is_stable() {
        let streams = vec![
            stream("a", "2160p", 0, 0),
            stream("b", "1080p", 0, 0),
            stream("c", "720p", 0, 0),
            stream("d", "480p", 0, 0),
        ];
        let cached: HashSet<String> = ["b".to_string(), "d".to_string()].into();
        let ordered = split_cached_first(streams, &cached);
        let order: Vec<_> = ordered.iter().map(|s| s.hash.as_str()).collect();
        // Cached keep their relative order, then uncached keep theirs.
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_apply_filter() {
        let streams = vec![
            stream("a", "2160p", 0, 0),
            stream("b", "480p", 0, 0),
        ];
        let program = crate::filter::compile(r#"Resolution > "720p""#).unwrap();
        let kept = apply_filter(streams, &program);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].hash, "a");
    }

    #[test]
    fn test_file_match_id() {
        let nsid = NormalizedStreamId {
            is_anime: true,
            id: "9969".to_string(),
            season: Some("2".to_string()),
            episode: Some("25".to_string()),
        };
        assert_eq!(
            file_match_id(&nsid, "kitsu:11061:25").as_deref(),
            Some("9969:25")
        );

        let nsid = NormalizedStreamId {
            id: "tt0903747".to_string(),
            season: Some("1".to_string()),
            episode: Some("1".to_string()),
            ..NormalizedStreamId::default()
        };
        assert_eq!(
            file_match_id(&nsid, "tt0903747:1:1").as_deref(),
            Some("tt0903747:1:1")
        );
    }
}
