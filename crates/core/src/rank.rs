//! Rank tables for semantic string comparison.
//!
//! Resolution, quality, and size values are strings on the wire
//! (`"1080p"`, `"BluRay"`, `"1.5 GB"`), but comparing them lexically gives
//! nonsense orderings (`"2160p" < "720p"`). Each table assigns a totally
//! ordered integer rank; values not in the table rank 0. The filter engine
//! substitutes these converters into comparison expressions.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static RESOLUTION_RANKS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    let ordered = [
        "240p", "360p", "480p", "540p", "576p", "720p", "1080p", "1440p", "2160p", "4320p",
    ];
    let mut ranks: HashMap<&'static str, i64> = ordered
        .iter()
        .enumerate()
        .map(|(i, v)| (*v, (i + 1) as i64))
        .collect();
    ranks.insert("2k", ranks["1440p"]);
    ranks.insert("4k", ranks["2160p"]);
    ranks.insert("8k", ranks["4320p"]);
    ranks
});

static QUALITY_RANKS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    let ordered = [
        "cam",
        "telesync",
        "telecine",
        "scr",
        "dvdscr",
        "r5",
        "ppvrip",
        "satrip",
        "tvrip",
        "pdtv",
        "hdtv",
        "dvdrip",
        "hdrip",
        "web",
        "webrip",
        "web-dl",
        "webmux",
        "bdrip",
        "brrip",
        "bluray",
        "remux",
    ];
    ordered
        .iter()
        .enumerate()
        .map(|(i, v)| (*v, (i + 1) as i64))
        .collect()
});

/// Rank for a resolution string. Unknown values rank 0.
pub fn resolution_rank(value: &str) -> i64 {
    RESOLUTION_RANKS
        .get(value.trim().to_lowercase().as_str())
        .copied()
        .unwrap_or(0)
}

/// Rank for a source-quality string. Unknown values rank 0.
pub fn quality_rank(value: &str) -> i64 {
    QUALITY_RANKS
        .get(value.trim().to_lowercase().as_str())
        .copied()
        .unwrap_or(0)
}

/// Rank for a `"{number} {unit}"` size string, proportional to bytes.
/// Unparseable values rank 0.
pub fn size_rank(value: &str) -> i64 {
    let value = value.trim();
    let (number, unit) = match value.split_once(' ') {
        Some((number, unit)) => (number, unit),
        None => {
            // Tolerate the compact form ("700MB").
            let split = value.find(|c: char| c.is_ascii_alphabetic());
            match split {
                Some(idx) if idx > 0 => value.split_at(idx),
                _ => return 0,
            }
        }
    };

    let number: f64 = match number.trim().parse() {
        Ok(n) => n,
        Err(_) => return 0,
    };
    let multiplier: f64 = match unit.trim().to_uppercase().as_str() {
        "B" => 1.0,
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };

    (number * multiplier) as i64
}

/// Format a byte count in the `"{number} {unit}"` form the rank table
/// parses back.
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes <= 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_rank_order() {
        assert!(resolution_rank("2160p") > resolution_rank("1080p"));
        assert!(resolution_rank("1080p") > resolution_rank("720p"));
        assert!(resolution_rank("720p") > resolution_rank("480p"));
        // Lexical order would invert this one.
        assert!(resolution_rank("2160p") > resolution_rank("720p"));
    }

    #[test]
    fn test_resolution_rank_aliases_and_case() {
        assert_eq!(resolution_rank("4K"), resolution_rank("2160p"));
        assert_eq!(resolution_rank("1080P"), resolution_rank("1080p"));
    }

    #[test]
    fn test_resolution_rank_unknown_is_zero() {
        assert_eq!(resolution_rank("potato"), 0);
        assert_eq!(resolution_rank(""), 0);
    }

    #[test]
    fn test_quality_rank_order() {
        assert!(quality_rank("BluRay") > quality_rank("WEB-DL"));
        assert!(quality_rank("WEB-DL") > quality_rank("HDTV"));
        assert!(quality_rank("HDTV") > quality_rank("CAM"));
        assert!(quality_rank("REMUX") > quality_rank("BluRay"));
    }

    #[test]
    fn test_size_rank_units() {
        assert!(size_rank("1.5 GB") > size_rank("700 MB"));
        assert!(size_rank("1 TB") > size_rank("999 GB"));
        assert!(size_rank("2 KB") > size_rank("2000 B"));
        assert_eq!(size_rank("1 KB"), 1024);
    }

    #[test]
    fn test_size_rank_compact_form() {
        assert_eq!(size_rank("700MB"), size_rank("700 MB"));
    }

    #[test]
    fn test_size_rank_invalid_is_zero() {
        assert_eq!(size_rank("huge"), 0);
        assert_eq!(size_rank("12 parsec"), 0);
        assert_eq!(size_rank(""), 0);
    }

    #[test]
    fn test_format_size_round_trips_through_rank() {
        let formatted = format_size(1_610_612_736); // 1.5 GB
        assert_eq!(formatted, "1.50 GB");
        let rank = size_rank(&formatted);
        assert!(rank > size_rank("700 MB"));
    }
}
