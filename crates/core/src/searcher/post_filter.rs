//! Post-filtering of completed results.
//!
//! Text searches are fuzzy: an indexer may return releases for a
//! different show that merely shares words. Results from non-exact plans
//! must match one of the known titles within the edit budget, and their
//! parsed season/episode/year must agree with the request.

use crate::stream_id::NormalizedStreamId;
use crate::title::{parse_release_title, ParsedTitle};
use crate::torznab::TorzResult;

use super::types::QueryMeta;

/// Whether a completed result survives post-filtering.
pub(crate) fn survives(
    result: &TorzResult,
    is_exact: bool,
    nsid: &NormalizedStreamId,
    meta: &QueryMeta,
) -> Option<ParsedTitle> {
    if result.has_missing_data() {
        return None;
    }

    let parsed = parse_release_title(&result.title);
    if is_exact {
        return Some(parsed);
    }

    if !meta.matches_title(&parsed.title) {
        return None;
    }

    if nsid.is_series() {
        if let Some(season) = meta.season {
            if !parsed.seasons.contains(&season) {
                return None;
            }
        }
        if let Some(episode) = meta.episode {
            if !parsed.episodes.is_empty() && !parsed.episodes.contains(&episode) {
                return None;
            }
        }
    } else if let Some(year) = meta.year {
        if let Some(parsed_year) = &parsed.year {
            if parsed_year != &year.to_string() {
                return None;
            }
        }
    }

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str) -> TorzResult {
        TorzResult {
            hash: "abc123".to_string(),
            title: title.to_string(),
            ..TorzResult::default()
        }
    }

    fn series_nsid() -> NormalizedStreamId {
        NormalizedStreamId {
            id: "tt0903747".to_string(),
            season: Some("1".to_string()),
            episode: Some("1".to_string()),
            ..NormalizedStreamId::default()
        }
    }

    fn series_meta() -> QueryMeta {
        QueryMeta {
            titles: vec!["The Example Show".to_string()],
            season: Some(1),
            episode: Some(1),
            ..QueryMeta::default()
        }
    }

    #[test]
    fn test_missing_data_never_survives() {
        let mut item = result("The Example Show S01E01 1080p");
        item.hash = String::new();
        assert!(survives(&item, true, &series_nsid(), &series_meta()).is_none());
    }

    #[test]
    fn test_exact_plan_skips_title_check() {
        let item = result("Completely Different Name S05E09");
        assert!(survives(&item, true, &series_nsid(), &series_meta()).is_some());
    }

    #[test]
    fn test_title_tolerance() {
        let nsid = series_nsid();
        let meta = series_meta();

        // Trailing punctuation and small edits pass.
        assert!(survives(&result("The Example Show. S01E01 1080p"), false, &nsid, &meta).is_some());
        assert!(survives(&result("The Exmple Show S01E01 720p"), false, &nsid, &meta).is_some());
        // Unrelated titles do not.
        assert!(survives(&result("Unrelated Thing S01E01 1080p"), false, &nsid, &meta).is_none());
    }

    #[test]
    fn test_series_requires_matching_season() {
        let item = result("The Example Show S02E01 1080p");
        assert!(survives(&item, false, &series_nsid(), &series_meta()).is_none());
    }

    #[test]
    fn test_series_episode_check_allows_season_packs() {
        // A season pack lists no episodes, which matches any episode.
        let pack = result("The Example Show S01 1080p WEB-DL");
        assert!(survives(&pack, false, &series_nsid(), &series_meta()).is_some());

        let wrong_episode = result("The Example Show S01E05 1080p");
        assert!(survives(&wrong_episode, false, &series_nsid(), &series_meta()).is_none());
    }

    #[test]
    fn test_movie_year_must_match_when_present() {
        let nsid = NormalizedStreamId {
            id: "tt1375666".to_string(),
            ..NormalizedStreamId::default()
        };
        let meta = QueryMeta {
            titles: vec!["Inception".to_string()],
            year: Some(2010),
            ..QueryMeta::default()
        };

        assert!(survives(&result("Inception 2010 1080p BluRay"), false, &nsid, &meta).is_some());
        assert!(survives(&result("Inception 2012 1080p BluRay"), false, &nsid, &meta).is_none());
        // A release without a parsed year is allowed through.
        assert!(survives(&result("Inception 1080p BluRay"), false, &nsid, &meta).is_some());
    }
}
