//! Query plan construction.
//!
//! For each indexer, the planner reads its advertised capabilities and
//! derives one or more queries: a single id-based query when the indexer
//! understands IMDb ids, or one text query per title and granularity
//! otherwise. Every plan carries the sync key it contributes to, so the
//! background sync pipeline can track each granularity independently.

use std::sync::Arc;

use crate::metadata::TitleProvider;
use crate::stream_id::NormalizedStreamId;
use crate::torznab::{Caps, Function, Query, SearchParam};

use super::types::{PlannedQuery, QueryMeta, SearchError};

/// Build the title/year/season/episode metadata driving query planning.
///
/// Non-anime ids resolve through the IMDb title record; anime ids resolve
/// through the AniDB↔TVDB episode map and the AniDB title list. An anime
/// entry without an episode or without a mapping yields an empty title
/// list, which in turn yields no text plans.
pub(crate) async fn build_query_meta(
    nsid: &NormalizedStreamId,
    titles: &Arc<dyn TitleProvider>,
) -> Result<QueryMeta, SearchError> {
    let mut meta = QueryMeta::default();

    if nsid.is_anime {
        let Some(anidb_episode) = nsid.episode.as_deref().and_then(|e| e.parse::<u32>().ok())
        else {
            return Ok(meta);
        };

        let episode_map = titles.tvdb_episode_map(&nsid.id).await?;
        let Some(segment) = episode_map.by_anidb_episode(anidb_episode) else {
            return Ok(meta);
        };
        meta.season = Some(segment.tvdb_season);
        meta.episode = Some(segment.tmdb_episode(anidb_episode));

        let anidb_titles = titles.anidb_titles(&nsid.id).await?;
        for title in anidb_titles {
            if meta.titles.contains(&title.value) {
                continue;
            }
            if meta.year.is_none() {
                if let Some(year) = title.year.as_deref().and_then(|y| y.parse().ok()) {
                    meta.year = Some(year);
                }
            }
            meta.titles.push(title.value);
        }
        return Ok(meta);
    }

    let record = titles
        .imdb_title(&nsid.id)
        .await?
        .ok_or_else(|| SearchError::TitleNotFound(nsid.id.clone()))?;

    meta.titles.push(record.title.clone());
    if let Some(orig) = record.orig_title {
        if orig != record.title {
            meta.titles.push(orig);
        }
    }
    meta.year = record.year;
    if nsid.is_series() {
        meta.season = nsid.season.as_deref().and_then(|s| s.parse().ok());
        meta.episode = nsid.episode.as_deref().and_then(|e| e.parse().ok());
    }
    Ok(meta)
}

/// Derive the query plans one indexer contributes, given its capabilities.
pub(crate) fn build_plans(
    caps: &Caps,
    nsid: &NormalizedStreamId,
    meta: &QueryMeta,
) -> Vec<PlannedQuery> {
    let function = if nsid.is_series() && caps.supports_function(Function::SearchTv) {
        Function::SearchTv
    } else if caps.supports_function(Function::SearchMovie) {
        Function::SearchMovie
    } else {
        Function::Search
    };

    let clean = nsid.to_clean();
    let mut plans = Vec::new();

    if !nsid.is_anime && caps.supports_param(SearchParam::ImdbId) {
        let mut query = Query::new(function);
        query.set_limit(-1);
        query.set(SearchParam::ImdbId, nsid.id.clone());

        let mut is_exact = !nsid.is_series();
        let mut sync_sid = clean.clone();
        if nsid.is_series() {
            if let Some(season) = nsid.season.clone().filter(|_| {
                caps.supports_param(SearchParam::Season)
            }) {
                query.set(SearchParam::Season, season.clone());
                sync_sid = format!("{}:{}", clean, season);
                if let Some(episode) = nsid.episode.clone().filter(|_| {
                    caps.supports_param(SearchParam::Episode)
                }) {
                    query.set(SearchParam::Episode, episode.clone());
                    is_exact = true;
                    sync_sid = format!("{}:{}:{}", clean, season, episode);
                }
            }
        }

        plans.push(PlannedQuery {
            query,
            is_exact,
            sync_sid,
        });
        return plans;
    }

    // Text search. Id-based params are unavailable, so fan out one query
    // per title and granularity.
    let mut base = Query::new(Function::Search);
    base.set_limit(-1);
    let supports_year = caps.supports_param(SearchParam::Year);
    if supports_year {
        if let Some(year) = meta.year {
            base.set(SearchParam::Year, year.to_string());
        }
    }

    for title in &meta.titles {
        let mut text = title.clone();
        if nsid.is_series() {
            plans.push(PlannedQuery {
                query: base.cloned_with(SearchParam::Query, text.clone()),
                is_exact: false,
                sync_sid: clean.clone(),
            });
            if let Some(season) = meta.season.filter(|s| *s > 0) {
                text.push_str(&format!(" S{:02}", season));
                plans.push(PlannedQuery {
                    query: base.cloned_with(SearchParam::Query, text.clone()),
                    is_exact: false,
                    sync_sid: format!("{}:{}", clean, season),
                });
                if let Some(episode) = meta.episode.filter(|e| *e > 0) {
                    text.push_str(&format!("E{:02}", episode));
                    plans.push(PlannedQuery {
                        query: base.cloned_with(SearchParam::Query, text.clone()),
                        is_exact: false,
                        sync_sid: format!("{}:{}:{}", clean, season, episode),
                    });
                }
            }
        } else {
            if let Some(year) = meta.year {
                if !supports_year {
                    text.push_str(&format!(" {}", year));
                }
            }
            plans.push(PlannedQuery {
                query: base.cloned_with(SearchParam::Query, text),
                is_exact: false,
                sync_sid: clean.clone(),
            });
        }
    }

    plans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_nsid() -> NormalizedStreamId {
        NormalizedStreamId {
            is_anime: false,
            id: "tt0903747".to_string(),
            season: Some("1".to_string()),
            episode: Some("1".to_string()),
        }
    }

    fn series_meta() -> QueryMeta {
        QueryMeta {
            titles: vec!["Breaking Bad".to_string()],
            year: Some(2008),
            season: Some(1),
            episode: Some(1),
        }
    }

    fn caps(functions: &[Function], params: &[SearchParam]) -> Caps {
        Caps {
            functions: functions.iter().copied().collect(),
            params: params.iter().copied().collect(),
        }
    }

    #[test]
    fn test_imdb_capable_series_yields_one_exact_plan() {
        let caps = caps(
            &[Function::Search, Function::SearchTv],
            &[
                SearchParam::Query,
                SearchParam::ImdbId,
                SearchParam::Season,
                SearchParam::Episode,
            ],
        );
        let plans = build_plans(&caps, &series_nsid(), &series_meta());

        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert!(plan.is_exact);
        assert_eq!(plan.sync_sid, "tt0903747:1:1");
        assert_eq!(plan.query.function(), Function::SearchTv);
        assert_eq!(plan.query.get(SearchParam::ImdbId), Some("tt0903747"));
        assert_eq!(plan.query.get(SearchParam::Season), Some("1"));
        assert_eq!(plan.query.get(SearchParam::Episode), Some("1"));
    }

    #[test]
    fn test_imdb_without_episode_param_is_not_exact() {
        let caps = caps(
            &[Function::Search, Function::SearchTv],
            &[SearchParam::Query, SearchParam::ImdbId, SearchParam::Season],
        );
        let plans = build_plans(&caps, &series_nsid(), &series_meta());

        assert_eq!(plans.len(), 1);
        assert!(!plans[0].is_exact);
        assert_eq!(plans[0].sync_sid, "tt0903747:1");
    }

    #[test]
    fn test_imdb_movie_is_exact() {
        let nsid = NormalizedStreamId {
            id: "tt1375666".to_string(),
            ..NormalizedStreamId::default()
        };
        let meta = QueryMeta {
            titles: vec!["Inception".to_string()],
            year: Some(2010),
            ..QueryMeta::default()
        };
        let caps = caps(
            &[Function::Search, Function::SearchMovie],
            &[SearchParam::Query, SearchParam::ImdbId],
        );
        let plans = build_plans(&caps, &nsid, &meta);

        assert_eq!(plans.len(), 1);
        assert!(plans[0].is_exact);
        assert_eq!(plans[0].query.function(), Function::SearchMovie);
        assert_eq!(plans[0].sync_sid, "tt1375666");
    }

    #[test]
    fn test_text_series_emits_one_plan_per_granularity() {
        let caps = caps(&[Function::Search], &[SearchParam::Query]);
        let plans = build_plans(&caps, &series_nsid(), &series_meta());

        let queries: Vec<_> = plans
            .iter()
            .map(|p| p.query.get(SearchParam::Query).unwrap().to_string())
            .collect();
        assert_eq!(
            queries,
            vec!["Breaking Bad", "Breaking Bad S01", "Breaking Bad S01E01"]
        );
        let sids: Vec<_> = plans.iter().map(|p| p.sync_sid.clone()).collect();
        assert_eq!(sids, vec!["tt0903747", "tt0903747:1", "tt0903747:1:1"]);
        assert!(plans.iter().all(|p| !p.is_exact));
        assert!(plans.iter().all(|p| p.query.function() == Function::Search));
    }

    #[test]
    fn test_text_series_with_multiple_titles() {
        let caps = caps(&[Function::Search], &[SearchParam::Query]);
        let meta = QueryMeta {
            titles: vec!["Breaking Bad".to_string(), "Metastasis".to_string()],
            season: Some(1),
            episode: Some(1),
            ..QueryMeta::default()
        };
        let plans = build_plans(&caps, &series_nsid(), &meta);
        // Three granularities per title.
        assert_eq!(plans.len(), 6);
    }

    #[test]
    fn test_text_movie_appends_year_when_param_unsupported() {
        let nsid = NormalizedStreamId {
            id: "tt1375666".to_string(),
            ..NormalizedStreamId::default()
        };
        let meta = QueryMeta {
            titles: vec!["Inception".to_string()],
            year: Some(2010),
            ..QueryMeta::default()
        };

        let caps_no_year = caps(&[Function::Search], &[SearchParam::Query]);
        let plans = build_plans(&caps_no_year, &nsid, &meta);
        assert_eq!(plans.len(), 1);
        assert_eq!(
            plans[0].query.get(SearchParam::Query),
            Some("Inception 2010")
        );

        let caps_year = caps(&[Function::Search], &[SearchParam::Query, SearchParam::Year]);
        let plans = build_plans(&caps_year, &nsid, &meta);
        assert_eq!(plans[0].query.get(SearchParam::Query), Some("Inception"));
        assert_eq!(plans[0].query.get(SearchParam::Year), Some("2010"));
    }

    #[test]
    fn test_anime_never_uses_imdb_param() {
        let nsid = NormalizedStreamId {
            is_anime: true,
            id: "9969".to_string(),
            season: Some("2".to_string()),
            episode: Some("25".to_string()),
        };
        let meta = QueryMeta {
            titles: vec!["Some Anime Show".to_string()],
            season: Some(2),
            episode: Some(12),
            ..QueryMeta::default()
        };
        let caps = caps(
            &[Function::Search, Function::SearchTv],
            &[SearchParam::Query, SearchParam::ImdbId],
        );
        let plans = build_plans(&caps, &nsid, &meta);

        assert_eq!(plans.len(), 3);
        assert!(plans
            .iter()
            .all(|p| p.query.get(SearchParam::ImdbId).is_none()));
        assert_eq!(
            plans[2].query.get(SearchParam::Query),
            Some("Some Anime Show S02E12")
        );
        assert_eq!(plans[2].sync_sid, "anidb:9969:2:12");
    }
}
