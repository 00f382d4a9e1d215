//! Release title parsing and fuzzy title matching.
//!
//! Indexers return scene-style release names
//! (`The.Example.Show.S01E01.1080p.WEB-DL.x264-GRP`). The post-filter needs
//! the embedded title, seasons, episodes, year, and the semantic attributes
//! (resolution, quality, HDR flags) that the filter DSL compares through
//! the rank tables.

use once_cell::sync::Lazy;
use regex::Regex;

/// Attributes extracted from a release name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTitle {
    /// The human title portion, separators collapsed to spaces.
    pub title: String,
    pub seasons: Vec<u32>,
    pub episodes: Vec<u32>,
    pub year: Option<String>,
    pub resolution: String,
    pub quality: String,
    pub hdr: Vec<String>,
}

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static SEASON_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})(?:\s?E(\d{1,3})(?:-?E?(\d{1,3}))?)?\b").unwrap()
});
static SEASON_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bS(\d{1,2})\s?-\s?S(\d{1,2})\b").unwrap());
static CROSS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})x(\d{2,3})\b").unwrap());
static SEASON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSeason\s+(\d{1,2})\b").unwrap());
static EPISODE_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Episode|Ep)\.?\s*(\d{1,3})\b").unwrap());
static RESOLUTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(4320p|2160p|1440p|1080p|720p|576p|540p|480p|360p|240p|8k|4k|2k)\b")
        .unwrap()
});
static QUALITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(remux|blu-?ray|bd-?rip|br-?rip|web-?dl|web-?rip|webmux|web|",
        r"hdtv|pdtv|tvrip|satrip|ppvrip|dvd-?rip|dvdscr|hd-?rip|telesync|telecine|cam|r5|scr)\b",
    ))
    .unwrap()
});
static HDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(dolby\s?vision|dovi|dv|hdr10\+|hdr10|hdr)\b").unwrap()
});
static GROUP_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[^\]]*\]\s*").unwrap());
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Parse a release name into its structured attributes.
pub fn parse_release_title(raw: &str) -> ParsedTitle {
    let name = GROUP_PREFIX_RE.replace(raw, "");
    let name = name.replace(['.', '_'], " ");

    let mut parsed = ParsedTitle::default();
    // Offset of the first structural marker; everything before it is title.
    let mut title_end = name.len();

    for caps in SEASON_RANGE_RE.captures_iter(&name) {
        let whole = caps.get(0).unwrap();
        title_end = title_end.min(whole.start());
        let start: u32 = caps[1].parse().unwrap_or(0);
        let end: u32 = caps[2].parse().unwrap_or(0);
        if start > 0 && end >= start {
            parsed.seasons.extend(start..=end);
        }
    }

    if parsed.seasons.is_empty() {
        for caps in SEASON_EPISODE_RE.captures_iter(&name) {
            let whole = caps.get(0).unwrap();
            title_end = title_end.min(whole.start());
            if let Ok(season) = caps[1].parse::<u32>() {
                if !parsed.seasons.contains(&season) {
                    parsed.seasons.push(season);
                }
            }
            if let Some(ep) = caps.get(2) {
                let first: u32 = ep.as_str().parse().unwrap_or(0);
                let last: u32 = caps
                    .get(3)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(first);
                if first > 0 && last >= first {
                    for episode in first..=last {
                        if !parsed.episodes.contains(&episode) {
                            parsed.episodes.push(episode);
                        }
                    }
                }
            }
        }
    }

    if parsed.seasons.is_empty() {
        if let Some(caps) = CROSS_RE.captures(&name) {
            title_end = title_end.min(caps.get(0).unwrap().start());
            if let Ok(season) = caps[1].parse() {
                parsed.seasons.push(season);
            }
            if let Ok(episode) = caps[2].parse() {
                parsed.episodes.push(episode);
            }
        }
    }

    if parsed.seasons.is_empty() {
        if let Some(caps) = SEASON_WORD_RE.captures(&name) {
            title_end = title_end.min(caps.get(0).unwrap().start());
            if let Ok(season) = caps[1].parse() {
                parsed.seasons.push(season);
            }
        }
    }
    if parsed.episodes.is_empty() {
        if let Some(caps) = EPISODE_WORD_RE.captures(&name) {
            title_end = title_end.min(caps.get(0).unwrap().start());
            if let Ok(episode) = caps[1].parse() {
                parsed.episodes.push(episode);
            }
        }
    }

    if let Some(m) = RESOLUTION_RE.find(&name) {
        title_end = title_end.min(m.start());
        parsed.resolution = normalize_resolution(m.as_str());
    }
    if let Some(m) = QUALITY_RE.find(&name) {
        title_end = title_end.min(m.start());
        parsed.quality = normalize_quality(m.as_str());
    }
    for caps in HDR_RE.captures_iter(&name) {
        let tag = normalize_hdr(&caps[1]);
        if !parsed.hdr.contains(&tag) {
            parsed.hdr.push(tag);
        }
    }

    // Take the last year before the structural markers, so titles that
    // begin with a year ("2012") are not consumed as the release year.
    let mut year_end = None;
    for caps in YEAR_RE.captures_iter(&name) {
        let whole = caps.get(0).unwrap();
        if whole.end() > title_end {
            break;
        }
        if whole.start() > 0 {
            parsed.year = Some(caps[1].to_string());
            year_end = Some(whole.start());
        }
    }
    if let Some(end) = year_end {
        title_end = title_end.min(end);
    }

    let title = &name[..title_end];
    let title = title.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | '(' | ')' | '[' | ']')
    });
    parsed.title = SPACES_RE.replace_all(title, " ").to_string();

    parsed
}

fn normalize_resolution(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "8k" => "4320p".to_string(),
        "4k" => "2160p".to_string(),
        "2k" => "1440p".to_string(),
        other => other.to_string(),
    }
}

fn normalize_quality(raw: &str) -> String {
    let compact = raw.to_lowercase().replace([' ', '-'], "");
    match compact.as_str() {
        "bluray" => "BluRay",
        "bdrip" => "BDRip",
        "brrip" => "BRRip",
        "remux" => "REMUX",
        "webdl" => "WEB-DL",
        "webrip" => "WEBRip",
        "webmux" => "WEBMux",
        "web" => "WEB",
        "hdtv" => "HDTV",
        "pdtv" => "PDTV",
        "tvrip" => "TVRip",
        "satrip" => "SATRip",
        "ppvrip" => "PPVRip",
        "dvdrip" => "DVDRip",
        "dvdscr" => "DVDScr",
        "hdrip" => "HDRip",
        "telesync" => "TeleSync",
        "telecine" => "TeleCine",
        "cam" => "CAM",
        "r5" => "R5",
        "scr" => "SCR",
        other => return other.to_uppercase(),
    }
    .to_string()
}

fn normalize_hdr(raw: &str) -> String {
    let compact = raw.to_lowercase().replace(' ', "");
    match compact.as_str() {
        "dolbyvision" | "dovi" | "dv" => "DV".to_string(),
        "hdr10+" => "HDR10+".to_string(),
        "hdr10" => "HDR10".to_string(),
        _ => "HDR".to_string(),
    }
}

/// Whether a file name carries a known video container extension.
pub fn has_video_extension(name: &str) -> bool {
    const VIDEO_EXTENSIONS: [&str; 12] = [
        ".mkv", ".mp4", ".avi", ".m4v", ".mov", ".webm", ".wmv", ".flv", ".mpg", ".mpeg", ".ts",
        ".m2ts",
    ];
    let lower = name.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Lowercases and strips everything but letters and digits, so that
/// punctuation and spacing differences don't count as edits.
pub fn normalize_for_match(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Whether two titles are within `max` edits after normalization.
pub fn titles_match_within(max: usize, a: &str, b: &str) -> bool {
    let a = normalize_for_match(a);
    let b = normalize_for_match(b);
    if a.len().abs_diff(b.len()) > max {
        return false;
    }
    levenshtein_distance(&a, &b) <= max
}

/// Levenshtein edit distance between two strings.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut matrix = vec![vec![0usize; b_len + 1]; a_len + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b_len {
        matrix[0][j] = j;
    }

    for i in 1..=a_len {
        for j in 1..=b_len {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[a_len][b_len]
}
