//! Stream id normalization.
//!
//! External content ids arrive in several shapes — `tt0903747:1:1`,
//! `anidb:11061:25`, `kitsu:11061:25`, `mal:30015:25` — and the rest of
//! the engine only deals in the normalized form: an IMDb id with optional
//! season/episode, or an AniDB id with optional episode. Kitsu and MAL ids
//! are canonicalized to AniDB through the [`AnimeIdMapper`] collaborator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::TtlCache;
use crate::metadata::{AnimeIdMapper, MetadataError};

const CACHE_CAPACITY: usize = 2048;
const CACHE_LIFETIME: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StreamIdError {
    #[error("unsupported stream id: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// A canonicalized stream id.
///
/// When `is_anime` is set, `id` is an AniDB id; otherwise it has the IMDb
/// `tt` form. A stream is a series stream iff season or episode is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedStreamId {
    pub is_anime: bool,
    pub id: String,
    pub season: Option<String>,
    pub episode: Option<String>,
}

impl NormalizedStreamId {
    pub fn is_series(&self) -> bool {
        self.season.is_some() || self.episode.is_some()
    }

    /// The id without season/episode qualifiers.
    pub fn to_clean(&self) -> String {
        if self.is_anime && !self.id.is_empty() {
            return format!("anidb:{}", self.id);
        }
        self.id.clone()
    }

    /// The sync key at season granularity, when a season is known.
    pub fn season_key(&self) -> Option<String> {
        self.season
            .as_ref()
            .map(|season| format!("{}:{}", self.to_clean(), season))
    }

    /// The sync key at episode granularity, when both parts are known.
    pub fn episode_key(&self) -> Option<String> {
        match (&self.season, &self.episode) {
            (Some(season), Some(episode)) => {
                Some(format!("{}:{}:{}", self.to_clean(), season, episode))
            }
            _ => None,
        }
    }
}

impl fmt::Display for NormalizedStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.to_clean();
        if id.is_empty() {
            return Ok(());
        }
        f.write_str(&id)?;
        if self.is_anime {
            if let Some(episode) = &self.episode {
                write!(f, ":{}", episode)?;
            }
            return Ok(());
        }
        if let Some(season) = &self.season {
            write!(f, ":{}", season)?;
            if let Some(episode) = &self.episode {
                write!(f, ":{}", episode)?;
            }
        }
        Ok(())
    }
}

/// Normalizes raw stream ids, caching results briefly.
pub struct StreamIdNormalizer {
    mapper: Arc<dyn AnimeIdMapper>,
    cache: TtlCache<String, NormalizedStreamId>,
}

impl StreamIdNormalizer {
    pub fn new(mapper: Arc<dyn AnimeIdMapper>) -> Self {
        Self {
            mapper,
            cache: TtlCache::new(CACHE_CAPACITY, CACHE_LIFETIME),
        }
    }

    /// Normalize a raw stream id.
    ///
    /// Mapper errors surface as-is; an unrecognized prefix yields
    /// [`StreamIdError::Unsupported`].
    pub async fn normalize(&self, sid: &str) -> Result<NormalizedStreamId, StreamIdError> {
        if let Some(cached) = self.cache.get(&sid.to_string()) {
            return Ok(cached);
        }

        let result = if sid.starts_with("tt") {
            let mut parts = sid.splitn(3, ':');
            let id = parts.next().unwrap_or_default().to_string();
            NormalizedStreamId {
                is_anime: false,
                id,
                season: parts.next().map(str::to_string),
                episode: parts.next().map(str::to_string),
            }
        } else if let Some(rest) = sid.strip_prefix("anidb:") {
            let (anidb_id, episode) = split_id_episode(rest);
            let season = self.mapper.anidb_season(&anidb_id).await?;
            NormalizedStreamId {
                is_anime: true,
                id: anidb_id,
                season,
                episode,
            }
        } else if let Some(rest) = sid.strip_prefix("kitsu:") {
            let (kitsu_id, episode) = split_id_episode(rest);
            let mapping = self.mapper.anidb_by_kitsu(&kitsu_id).await?;
            NormalizedStreamId {
                is_anime: true,
                id: mapping.anidb_id,
                season: mapping.season,
                episode,
            }
        } else if let Some(rest) = sid.strip_prefix("mal:") {
            let (mal_id, episode) = split_id_episode(rest);
            let mapping = self.mapper.anidb_by_mal(&mal_id).await?;
            NormalizedStreamId {
                is_anime: true,
                id: mapping.anidb_id,
                season: mapping.season,
                episode,
            }
        } else {
            return Err(StreamIdError::Unsupported(sid.to_string()));
        };

        self.cache.insert(sid.to_string(), result.clone());
        Ok(result)
    }
}

fn split_id_episode(rest: &str) -> (String, Option<String>) {
    match rest.split_once(':') {
        Some((id, episode)) => (id.to_string(), Some(episode.to_string())),
        None => (rest.to_string(), None),
    }
}
