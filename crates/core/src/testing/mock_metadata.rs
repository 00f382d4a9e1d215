//! Mock metadata collaborators.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::metadata::{
    AniDbTitle, AnimeIdMapper, AnimeIdMapping, EpisodeMap, ImdbTitle, MetadataError,
    TitleProvider,
};

/// Mock title provider with pre-seeded records.
#[derive(Default)]
pub struct MockTitleProvider {
    imdb: HashMap<String, ImdbTitle>,
    anidb: HashMap<String, Vec<AniDbTitle>>,
    episode_maps: HashMap<String, EpisodeMap>,
    failure: Option<String>,
}

impl MockTitleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_imdb_title(
        mut self,
        id: &str,
        title: &str,
        orig_title: Option<&str>,
        year: Option<i32>,
    ) -> Self {
        self.imdb.insert(
            id.to_string(),
            ImdbTitle {
                id: id.to_string(),
                title: title.to_string(),
                orig_title: orig_title.map(str::to_string),
                year,
            },
        );
        self
    }

    pub fn with_anidb_titles(mut self, anidb_id: &str, titles: &[(&str, Option<&str>)]) -> Self {
        self.anidb.insert(
            anidb_id.to_string(),
            titles
                .iter()
                .map(|(value, year)| AniDbTitle {
                    value: value.to_string(),
                    year: year.map(str::to_string),
                })
                .collect(),
        );
        self
    }

    pub fn with_episode_map(mut self, anidb_id: &str, map: EpisodeMap) -> Self {
        self.episode_maps.insert(anidb_id.to_string(), map);
        self
    }

    /// Make every lookup fail, to exercise collaborator-unavailable paths.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    fn check_failure(&self) -> Result<(), MetadataError> {
        match &self.failure {
            Some(message) => Err(MetadataError::Upstream(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TitleProvider for MockTitleProvider {
    async fn imdb_title(&self, imdb_id: &str) -> Result<Option<ImdbTitle>, MetadataError> {
        self.check_failure()?;
        Ok(self.imdb.get(imdb_id).cloned())
    }

    async fn anidb_titles(&self, anidb_id: &str) -> Result<Vec<AniDbTitle>, MetadataError> {
        self.check_failure()?;
        Ok(self.anidb.get(anidb_id).cloned().unwrap_or_default())
    }

    async fn tvdb_episode_map(&self, anidb_id: &str) -> Result<EpisodeMap, MetadataError> {
        self.check_failure()?;
        Ok(self.episode_maps.get(anidb_id).cloned().unwrap_or_default())
    }
}

/// Mock anime id mapper with pre-seeded mappings.
#[derive(Default)]
pub struct MockAnimeIdMapper {
    kitsu: HashMap<String, AnimeIdMapping>,
    mal: HashMap<String, AnimeIdMapping>,
    seasons: HashMap<String, Option<String>>,
}

impl MockAnimeIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kitsu(mut self, kitsu_id: &str, anidb_id: &str, season: Option<&str>) -> Self {
        self.kitsu.insert(
            kitsu_id.to_string(),
            AnimeIdMapping {
                anidb_id: anidb_id.to_string(),
                season: season.map(str::to_string),
            },
        );
        self
    }

    pub fn with_mal(mut self, mal_id: &str, anidb_id: &str, season: Option<&str>) -> Self {
        self.mal.insert(
            mal_id.to_string(),
            AnimeIdMapping {
                anidb_id: anidb_id.to_string(),
                season: season.map(str::to_string),
            },
        );
        self
    }

    pub fn with_season(mut self, anidb_id: &str, season: Option<&str>) -> Self {
        self.seasons
            .insert(anidb_id.to_string(), season.map(str::to_string));
        self
    }
}

#[async_trait]
impl AnimeIdMapper for MockAnimeIdMapper {
    async fn anidb_by_kitsu(&self, kitsu_id: &str) -> Result<AnimeIdMapping, MetadataError> {
        self.kitsu
            .get(kitsu_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("kitsu:{}", kitsu_id)))
    }

    async fn anidb_by_mal(&self, mal_id: &str) -> Result<AnimeIdMapping, MetadataError> {
        self.mal
            .get(mal_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("mal:{}", mal_id)))
    }

    async fn anidb_season(&self, anidb_id: &str) -> Result<Option<String>, MetadataError> {
        Ok(self.seasons.get(anidb_id).cloned().flatten())
    }
}
