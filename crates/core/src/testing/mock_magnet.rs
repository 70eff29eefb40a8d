//! Mock magnet downloader and clock for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::search::{Clock, MagnetDownloader, MagnetError};

/// Resolves scripted magnet URIs; anything else times out.
#[derive(Default)]
pub struct MockMagnetDownloader {
    torrents: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<(String, Duration)>>,
}

impl MockMagnetDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_torrent(&self, magnet: &str, bytes: Vec<u8>) {
        self.torrents
            .lock()
            .unwrap()
            .insert(magnet.to_string(), bytes);
    }

    /// Requested URIs with the timeout each was given.
    pub fn requests(&self) -> Vec<(String, Duration)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MagnetDownloader for MockMagnetDownloader {
    async fn download(&self, magnet: &str, timeout: Duration) -> Result<Vec<u8>, MagnetError> {
        self.requests
            .lock()
            .unwrap()
            .push((magnet.to_string(), timeout));
        self.torrents
            .lock()
            .unwrap()
            .get(magnet)
            .cloned()
            .ok_or(MagnetError::Timeout(timeout))
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_millis: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now_millis: AtomicI64::new(now_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }
}
