//! `.torrent` file table extraction.
//!
//! Uses librqbit-core to bdecode the metainfo. A blob that does not decode is
//! an error, never an empty list, so callers can tell "no files" from
//! "corrupt data".

use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use thiserror::Error;

/// Errors that can occur when parsing torrent files.
#[derive(Debug, Error)]
pub enum TorrentParseError {
    #[error("Failed to parse torrent: {0}")]
    ParseError(String),

    #[error("Empty torrent (no files)")]
    EmptyTorrent,
}

/// One entry of a torrent's file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path within the torrent, rooted at the torrent name.
    pub path: String,
    pub size_bytes: u64,
}

impl TorrentFile {
    /// BEP-47 padding entries (`.pad/N`) and the older
    /// `_____padding_file_` convention.
    pub fn is_padding(&self) -> bool {
        self.path
            .split('/')
            .any(|part| part == ".pad" || part.starts_with("_____padding_file_"))
    }
}

/// Parse a .torrent blob into its file table.
///
/// Single-file torrents yield one entry named after the torrent.
pub fn parse_torrent_files(bytes: &[u8]) -> Result<Vec<TorrentFile>, TorrentParseError> {
    let torrent = decode(bytes)?;
    let info = &torrent.info;

    let root_name = info
        .name
        .as_ref()
        .map(|b| lossy(b.as_ref()))
        .unwrap_or_else(|| "unknown".to_string());

    if let Some(ref files) = info.files {
        let result: Vec<TorrentFile> = files
            .iter()
            .map(|file| {
                let path = std::iter::once(root_name.clone())
                    .chain(file.path.iter().map(|part| lossy(part.as_ref())))
                    .collect::<Vec<_>>()
                    .join("/");
                TorrentFile {
                    path,
                    size_bytes: file.length,
                }
            })
            .collect();

        if result.is_empty() {
            return Err(TorrentParseError::EmptyTorrent);
        }
        Ok(result)
    } else if let Some(length) = info.length {
        Ok(vec![TorrentFile {
            path: root_name,
            size_bytes: length,
        }])
    } else {
        Err(TorrentParseError::EmptyTorrent)
    }
}

/// Lowercase hex info hash of a .torrent blob.
pub fn parse_torrent_info_hash(bytes: &[u8]) -> Result<String, TorrentParseError> {
    Ok(decode(bytes)?.info_hash.as_string())
}

fn decode(bytes: &[u8]) -> Result<TorrentMetaV1Owned, TorrentParseError> {
    torrent_from_bytes(bytes).map_err(|e| TorrentParseError::ParseError(e.to_string()))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_parse_multi_file() {
        let data = fixtures::multi_file_torrent("album", &[("01.flac", 100), ("cover.jpg", 7)]);
        let files = parse_torrent_files(&data).unwrap();
        assert_eq!(
            files,
            vec![
                TorrentFile {
                    path: "album/01.flac".to_string(),
                    size_bytes: 100
                },
                TorrentFile {
                    path: "album/cover.jpg".to_string(),
                    size_bytes: 7
                },
            ]
        );
    }

    #[test]
    fn test_parse_single_file() {
        let data = fixtures::single_file_torrent("movie.mkv", 4096);
        let files = parse_torrent_files(&data).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "movie.mkv");
        assert_eq!(files[0].size_bytes, 4096);
    }

    #[test]
    fn test_info_hash_is_hex() {
        let data = fixtures::single_file_torrent("movie.mkv", 4096);
        let hash = parse_torrent_info_hash(&data).unwrap();
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_parse_invalid_torrent() {
        assert!(parse_torrent_files(b"not a valid torrent").is_err());
        assert!(parse_torrent_files(b"").is_err());
    }

    #[test]
    fn test_padding_detection() {
        let pad = TorrentFile {
            path: "x/.pad/1024".to_string(),
            size_bytes: 1024,
        };
        let legacy = TorrentFile {
            path: "x/_____padding_file_0_".to_string(),
            size_bytes: 1,
        };
        let normal = TorrentFile {
            path: "x/a.pad".to_string(),
            size_bytes: 1,
        };
        assert!(pad.is_padding());
        assert!(legacy.is_padding());
        assert!(!normal.is_padding());
    }
}
