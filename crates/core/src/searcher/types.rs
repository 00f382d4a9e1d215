//! Types for the indexer fan-out search engine.

use std::sync::Arc;

use thiserror::Error;

use crate::filter::{FileRecord, FilterRecord};
use crate::metadata::MetadataError;
use crate::rank;
use crate::stream_id::StreamIdError;
use crate::store::StoreError;
use crate::title::{titles_match_within, ParsedTitle};
use crate::torznab::{Query, TorznabClient};

/// How far a parsed title may drift from a query title (normalized edits).
pub const TITLE_MATCH_MAX_EDITS: usize = 5;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    StreamId(#[from] StreamIdError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("title not found: {0}")]
    TitleNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("all search plans failed: {0}")]
    AllPlansFailed(String),
}

/// What we know about the requested content before planning queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMeta {
    pub titles: Vec<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl QueryMeta {
    /// Whether a parsed release title matches any known title within the
    /// edit budget.
    pub fn matches_title(&self, parsed_title: &str) -> bool {
        self.titles
            .iter()
            .any(|title| titles_match_within(TITLE_MATCH_MAX_EDITS, parsed_title, title))
    }
}

/// One query derived for one indexer.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub query: Query,
    /// An exact plan's results skip the parsed-title post-filter.
    pub is_exact: bool,
    /// Sync key granularity this plan contributes to
    /// (`sid`, `sid:season`, or `sid:season:episode`).
    pub sync_sid: String,
}

/// A planned query bound to the client that will execute it.
pub struct SearchPlan {
    pub client: Arc<dyn TorznabClient>,
    pub query: Query,
    pub is_exact: bool,
}

/// The video file within a matched torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFile {
    pub name: String,
    pub index: i64,
    pub size: i64,
}

/// A deduplicated, post-filtered stream candidate.
#[derive(Debug, Clone, Default)]
pub struct WrappedStream {
    /// Torrent info-hash, lowercase hex.
    pub hash: String,
    /// Full release title.
    pub title: String,
    /// Composite id of the indexer that produced it.
    pub indexer: String,
    pub seeders: i64,
    pub is_private: bool,
    pub size: i64,
    pub source_link: Option<String>,
    /// Attributes parsed from the release title.
    pub parsed: ParsedTitle,
    /// Matched video file, when one is known.
    pub file: Option<StreamFile>,
}

impl WrappedStream {
    /// Projection consumed by the filter expression engine.
    pub fn filter_record(&self) -> FilterRecord {
        FilterRecord {
            resolution: self.parsed.resolution.clone(),
            quality: self.parsed.quality.clone(),
            size: if self.size > 0 {
                rank::format_size(self.size)
            } else {
                String::new()
            },
            hdr: self.parsed.hdr.clone(),
            seeders: self.seeders,
            is_private: self.is_private,
            file: match &self.file {
                Some(file) => FileRecord {
                    name: file.name.clone(),
                    size: if file.size > 0 {
                        rank::format_size(file.size)
                    } else {
                        String::new()
                    },
                    index: file.index,
                },
                None => FileRecord::default(),
            },
        }
    }
}

/// The outcome of one fan-out search.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub streams: Vec<WrappedStream>,
    /// Unique hashes in discovery order.
    pub hashes: Vec<String>,
}
