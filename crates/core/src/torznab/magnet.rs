//! Magnet completion: deriving a hash and file list from a `.torrent` URL.

use std::time::Duration;

use async_trait::async_trait;
use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use reqwest::Client;
use thiserror::Error;

use super::types::TorzFile;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MagnetError {
    #[error("failed to fetch torrent: {0}")]
    Fetch(String),
    #[error("failed to parse torrent: {0}")]
    Parse(String),
}

/// Derives `(hash, files)` from a `.torrent` source link.
///
/// The production implementation fetches over HTTP; tests substitute a
/// mock.
#[async_trait]
pub trait MagnetResolver: Send + Sync {
    async fn resolve(&self, source_link: &str) -> Result<(String, Vec<TorzFile>), MagnetError>;
}

/// Fetches `.torrent` files and extracts the info-hash and file listing.
pub struct MagnetFetcher {
    client: Client,
}

#[async_trait]
impl MagnetResolver for MagnetFetcher {
    async fn resolve(&self, source_link: &str) -> Result<(String, Vec<TorzFile>), MagnetError> {
        self.fetch(source_link).await
    }
}

impl Default for MagnetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MagnetFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Fetch the `.torrent` at `source_link` and derive `(hash, files)`.
    /// The hash is lowercase hex.
    pub async fn fetch(&self, source_link: &str) -> Result<(String, Vec<TorzFile>), MagnetError> {
        let response = self
            .client
            .get(source_link)
            .send()
            .await
            .map_err(|e| MagnetError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MagnetError::Fetch(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MagnetError::Fetch(e.to_string()))?;

        parse_torrent(&bytes)
    }
}

/// Parse raw `.torrent` bytes into the lowercase info-hash and file list.
pub fn parse_torrent(bytes: &[u8]) -> Result<(String, Vec<TorzFile>), MagnetError> {
    let torrent: TorrentMetaV1Owned =
        torrent_from_bytes(bytes).map_err(|e| MagnetError::Parse(e.to_string()))?;

    let hash = torrent.info_hash.as_string().to_lowercase();

    let info = &torrent.info;
    let root_name = info
        .name
        .as_ref()
        .map(|b| String::from_utf8_lossy(b.as_ref()).into_owned())
        .unwrap_or_default();

    let files = if let Some(files) = &info.files {
        files
            .iter()
            .map(|file| {
                let mut parts = vec![root_name.clone()];
                for part in &file.path {
                    parts.push(String::from_utf8_lossy(part.as_ref()).into_owned());
                }
                TorzFile {
                    path: parts.join("/"),
                    size: file.length as i64,
                }
            })
            .collect()
    } else if let Some(length) = info.length {
        vec![TorzFile {
            path: root_name,
            size: length as i64,
        }]
    } else {
        Vec::new()
    };

    Ok((hash, files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invalid_torrent() {
        assert!(parse_torrent(b"not a torrent").is_err());
        assert!(parse_torrent(b"").is_err());
    }
}
