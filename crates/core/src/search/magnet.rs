//! Resolving magnet links into `.torrent` bytes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session, SessionOptions};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MagnetError {
    #[error("Timed out resolving magnet after {0:?}")]
    Timeout(Duration),

    #[error("Failed to resolve magnet: {0}")]
    Failed(String),

    #[error("Session error: {0}")]
    Session(String),
}

/// Fetches the metainfo a magnet URI points at (over DHT and peers).
#[async_trait]
pub trait MagnetDownloader: Send + Sync {
    async fn download(&self, magnet: &str, timeout: Duration) -> Result<Vec<u8>, MagnetError>;
}

/// Metadata-only resolver on top of an embedded librqbit session.
///
/// Torrents are added in list-only mode so nothing is downloaded besides
/// the info dictionary.
pub struct LibrqbitMagnetDownloader {
    session: Arc<Session>,
}

impl LibrqbitMagnetDownloader {
    pub async fn new(output_folder: PathBuf) -> Result<Self, MagnetError> {
        let opts = SessionOptions {
            disable_dht_persistence: true,
            ..Default::default()
        };

        info!(folder = %output_folder.display(), "Starting metadata session");

        let session = Session::new_with_opts(output_folder, opts)
            .await
            .map_err(|e| MagnetError::Session(e.to_string()))?;
        Ok(Self { session })
    }
}

#[async_trait]
impl MagnetDownloader for LibrqbitMagnetDownloader {
    async fn download(&self, magnet: &str, timeout: Duration) -> Result<Vec<u8>, MagnetError> {
        let opts = AddTorrentOptions {
            list_only: true,
            ..Default::default()
        };
        let add = self
            .session
            .add_torrent(AddTorrent::from_url(magnet), Some(opts));

        let response = tokio::time::timeout(timeout, add)
            .await
            .map_err(|_| MagnetError::Timeout(timeout))?
            .map_err(|e| MagnetError::Failed(e.to_string()))?;

        match response {
            AddTorrentResponse::ListOnly(listed) => {
                debug!(hash = %listed.info_hash.as_string(), "Resolved magnet metadata");
                Ok(listed.torrent_bytes.to_vec())
            }
            _ => Err(MagnetError::Failed(
                "torrent was added instead of listed".to_string(),
            )),
        }
    }
}
