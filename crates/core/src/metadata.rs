//! Title metadata collaborator contracts.
//!
//! The engine never talks to IMDb/AniDB/TVDB datasets directly; it consumes
//! these traits. Production implementations live outside this crate, and
//! `testing::` provides mocks.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("metadata lookup failed: {0}")]
    Upstream(String),
}

/// An IMDb title record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImdbTitle {
    pub id: String,
    pub title: String,
    /// Original-language title, when it differs from `title`.
    pub orig_title: Option<String>,
    pub year: Option<i32>,
}

/// One of the known titles of an AniDB entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AniDbTitle {
    pub value: String,
    pub year: Option<String>,
}

/// AniDB→TVDB episode mapping for one AniDB entry.
///
/// AniDB numbers episodes absolutely per entry; TVDB splits them into
/// seasons. Each segment maps a contiguous AniDB episode range onto a TVDB
/// season, with an offset into TMDB episode numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeMap {
    pub segments: Vec<EpisodeMapSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMapSegment {
    /// First AniDB episode covered by this segment.
    pub anidb_start: u32,
    /// Last AniDB episode covered, inclusive.
    pub anidb_end: u32,
    pub tvdb_season: u32,
    /// Added to the AniDB episode number to get the TMDB episode number.
    pub tmdb_offset: i32,
}

impl EpisodeMap {
    pub fn by_anidb_episode(&self, episode: u32) -> Option<&EpisodeMapSegment> {
        self.segments
            .iter()
            .find(|s| s.anidb_start <= episode && episode <= s.anidb_end)
    }
}

impl EpisodeMapSegment {
    pub fn tmdb_episode(&self, anidb_episode: u32) -> u32 {
        (anidb_episode as i64 + self.tmdb_offset as i64).max(0) as u32
    }
}

/// Resolution of an external anime id to its AniDB form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimeIdMapping {
    pub anidb_id: String,
    pub season: Option<String>,
}

/// Title metadata lookups.
#[async_trait]
pub trait TitleProvider: Send + Sync {
    /// IMDb title record, or `None` when the id is unknown.
    async fn imdb_title(&self, imdb_id: &str) -> Result<Option<ImdbTitle>, MetadataError>;

    /// All known titles of an AniDB entry.
    async fn anidb_titles(&self, anidb_id: &str) -> Result<Vec<AniDbTitle>, MetadataError>;

    /// The AniDB→TVDB episode map for an AniDB entry. An empty map means
    /// no mapping is known.
    async fn tvdb_episode_map(&self, anidb_id: &str) -> Result<EpisodeMap, MetadataError>;
}

/// Anime id canonicalization (Kitsu / MAL → AniDB).
#[async_trait]
pub trait AnimeIdMapper: Send + Sync {
    async fn anidb_by_kitsu(&self, kitsu_id: &str) -> Result<AnimeIdMapping, MetadataError>;

    async fn anidb_by_mal(&self, mal_id: &str) -> Result<AnimeIdMapping, MetadataError>;

    /// The season an AniDB entry belongs to, when known.
    async fn anidb_season(&self, anidb_id: &str) -> Result<Option<String>, MetadataError>;
}
