//! Types for the torznab client contract.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// A torznab search function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Search,
    SearchMovie,
    SearchTv,
}

impl Function {
    /// Wire value for the `t` parameter.
    pub fn wire_value(self) -> &'static str {
        match self {
            Function::Search => "search",
            Function::SearchMovie => "movie",
            Function::SearchTv => "tvsearch",
        }
    }
}

/// A recognized search parameter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchParam {
    Query,
    ImdbId,
    Season,
    Episode,
    Year,
}

impl SearchParam {
    pub fn wire_key(self) -> &'static str {
        match self {
            SearchParam::Query => "q",
            SearchParam::ImdbId => "imdbid",
            SearchParam::Season => "season",
            SearchParam::Episode => "ep",
            SearchParam::Year => "year",
        }
    }
}

/// What an indexer advertises it can do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caps {
    pub functions: HashSet<Function>,
    pub params: HashSet<SearchParam>,
}

impl Caps {
    pub fn supports_function(&self, function: Function) -> bool {
        self.functions.contains(&function)
    }

    pub fn supports_param(&self, param: SearchParam) -> bool {
        self.params.contains(&param)
    }
}

/// A mutable search plan against one indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    function: Function,
    params: BTreeMap<SearchParam, String>,
    limit: Option<i64>,
}

impl Query {
    pub fn new(function: Function) -> Self {
        Self {
            function,
            params: BTreeMap::new(),
            limit: None,
        }
    }

    pub fn function(&self) -> Function {
        self.function
    }

    /// Switch the search function, keeping parameters.
    pub fn set_function(&mut self, function: Function) -> &mut Self {
        self.function = function;
        self
    }

    pub fn set(&mut self, param: SearchParam, value: impl Into<String>) -> &mut Self {
        self.params.insert(param, value.into());
        self
    }

    pub fn get(&self, param: SearchParam) -> Option<&str> {
        self.params.get(&param).map(String::as_str)
    }

    pub fn set_limit(&mut self, limit: i64) -> &mut Self {
        self.limit = (limit >= 0).then_some(limit);
        self
    }

    /// A copy of this query to derive a sibling plan from.
    pub fn cloned_with(&self, param: SearchParam, value: impl Into<String>) -> Self {
        let mut query = self.clone();
        query.set(param, value);
        query
    }

    /// Encode to the wire query-string form.
    pub fn encode(&self) -> String {
        let mut encoded = format!("t={}", self.function.wire_value());
        for (param, value) in &self.params {
            encoded.push('&');
            encoded.push_str(param.wire_key());
            encoded.push('=');
            encoded.push_str(&urlencoding::encode(value));
        }
        if let Some(limit) = self.limit {
            encoded.push_str(&format!("&limit={}", limit));
        }
        encoded
    }
}

/// A file within a torrent result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorzFile {
    pub path: String,
    pub size: i64,
}

/// A single search result from an indexer.
///
/// Results may arrive without an info-hash but with a `source_link` to the
/// `.torrent` file; such results are *completed* by fetching the source and
/// deriving the magnet. A completed result has a lowercase hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorzResult {
    pub hash: String,
    pub title: String,
    pub source_link: Option<String>,
    pub size: i64,
    pub seeders: i64,
    pub leechers: i64,
    pub private: bool,
    /// Composite id of the indexer that produced this result.
    pub indexer: String,
    pub files: Option<Vec<TorzFile>>,
}

impl TorzResult {
    /// Whether this result still lacks the data needed to emit a stream.
    pub fn has_missing_data(&self) -> bool {
        self.hash.is_empty()
    }

    /// Fill in the hash (lowercased) and file listing.
    pub fn complete(&mut self, hash: &str, files: Vec<TorzFile>) {
        self.hash = hash.to_lowercase();
        if self.files.is_none() && !files.is_empty() {
            self.files = Some(files);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Caps {
        Caps {
            functions: [Function::Search, Function::SearchTv].into(),
            params: [SearchParam::Query, SearchParam::Season, SearchParam::Episode].into(),
        }
    }

    #[test]
    fn test_caps_supports() {
        let caps = caps();
        assert!(caps.supports_function(Function::SearchTv));
        assert!(!caps.supports_function(Function::SearchMovie));
        assert!(caps.supports_param(SearchParam::Season));
        assert!(!caps.supports_param(SearchParam::ImdbId));
    }

    #[test]
    fn test_query_encode() {
        let mut query = Query::new(Function::SearchTv);
        query
            .set(SearchParam::Query, "Breaking Bad S01E01")
            .set(SearchParam::Season, "1")
            .set_limit(100);
        let encoded = query.encode();
        assert!(encoded.starts_with("t=tvsearch"));
        assert!(encoded.contains("q=Breaking%20Bad%20S01E01"));
        assert!(encoded.contains("season=1"));
        assert!(encoded.ends_with("limit=100"));
    }

    #[test]
    fn test_query_negative_limit_is_unlimited() {
        let mut query = Query::new(Function::Search);
        query.set_limit(-1);
        assert!(!query.encode().contains("limit"));
    }

    #[test]
    fn test_query_clone_does_not_alias() {
        let mut base = Query::new(Function::Search);
        base.set(SearchParam::Query, "title");
        let derived = base.cloned_with(SearchParam::Query, "title S01");
        assert_eq!(base.get(SearchParam::Query), Some("title"));
        assert_eq!(derived.get(SearchParam::Query), Some("title S01"));
    }

    #[test]
    fn test_result_completion() {
        let mut result = TorzResult {
            title: "Some.Show.S01E01.1080p".to_string(),
            source_link: Some("http://indexer/dl/1.torrent".to_string()),
            ..TorzResult::default()
        };
        assert!(result.has_missing_data());

        result.complete(
            "ABCDEF0123456789ABCDEF0123456789ABCDEF01",
            vec![TorzFile {
                path: "Some.Show.S01E01.1080p.mkv".to_string(),
                size: 1024,
            }],
        );
        assert!(!result.has_missing_data());
        assert_eq!(result.hash, "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(result.files.as_ref().unwrap().len(), 1);
    }
}
