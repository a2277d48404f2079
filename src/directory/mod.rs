//! Guard relay directory: the trusted-relay allow-list.
//!
//! A [`RelaySnapshot`] is one immutable copy of the onionoo guard listing.
//! [`RelayDirectory`] owns the cache policy around it:
//!
//! 1. read the cached body from disk (`load`)
//! 2. if the cached snapshot is still inside its freshness window, use it
//! 3. otherwise fetch a new body, persist it verbatim and use that
//!
//! A failed fetch is never papered over with the stale cache.
//!
//! Snapshots are shared as `Arc<RelaySnapshot>` and replaced wholesale,
//! never edited in place.

pub mod fetcher;
pub mod refresher;

use crate::constants::directory::{FRESHNESS_MINUTES, PUBLISHED_FORMAT};
use crate::error::DirectoryError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use fetcher::DirectoryFetcher;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One relay from the listing. Only the fields the monitor reads are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    #[serde(default)]
    pub nickname: String,
    /// `host:port` strings; IPv6 hosts are bracketed
    #[serde(default)]
    pub or_addresses: Vec<String>,
}

impl Relay {
    pub fn new(nickname: impl Into<String>, or_addresses: Vec<String>) -> Self {
        Self {
            nickname: nickname.into(),
            or_addresses,
        }
    }
}

/// Wire shape of the directory document
#[derive(Serialize, Deserialize)]
struct DirectoryDocument {
    relays_published: String,
    #[serde(default)]
    relays: Vec<Relay>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaySnapshot {
    published: DateTime<Local>,
    relays: Vec<Relay>,
}

impl RelaySnapshot {
    pub fn new(published: DateTime<Local>, relays: Vec<Relay>) -> Self {
        Self { published, relays }
    }

    pub fn parse(data: &[u8]) -> Result<Self, DirectoryError> {
        let document: DirectoryDocument = serde_json::from_slice(data)?;
        let published = parse_published(&document.relays_published)?;
        Ok(Self {
            published,
            relays: document.relays,
        })
    }

    /// Serializes back into the directory document shape.
    ///
    /// `relays_published` is written as whole local seconds, so a parse of
    /// the output drops sub-second precision. During a DST fall-back hour
    /// the repeated wall time parses as its earlier instant.
    pub fn to_json(&self) -> Result<String, DirectoryError> {
        let document = DirectoryDocument {
            relays_published: self.published.format(PUBLISHED_FORMAT).to_string(),
            relays: self.relays.clone(),
        };
        Ok(serde_json::to_string(&document)?)
    }

    pub fn published(&self) -> DateTime<Local> {
        self.published
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    /// Fresh iff `now < published + window`. A window reaching past the
    /// representable range never expires.
    pub fn is_fresh_at(&self, now: DateTime<Local>, window: chrono::Duration) -> bool {
        self.published
            .checked_add_signed(window)
            .map_or(true, |end| end > now)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Local::now(), chrono::Duration::minutes(FRESHNESS_MINUTES))
    }

    /// True iff any relay advertises an address whose text contains `ip`.
    ///
    /// This is a substring match, not a host/port comparison: `1.2.3.4`
    /// also matches a relay at `11.2.3.45:443`. Trust classification depends
    /// on this exact looseness.
    pub fn contains_address(&self, ip: IpAddr) -> bool {
        let needle = ip.to_string();
        self.relays.iter().any(|relay| {
            relay
                .or_addresses
                .iter()
                .any(|address| address.contains(&needle))
        })
    }
}

fn parse_published(value: &str) -> Result<DateTime<Local>, DirectoryError> {
    let naive = NaiveDateTime::parse_from_str(value, PUBLISHED_FORMAT).map_err(|_| {
        DirectoryError::Timestamp {
            value: value.to_string(),
        }
    })?;
    // Nonexistent local times (DST gap) have no mapping
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| DirectoryError::Timestamp {
            value: value.to_string(),
        })
}

/// Cache-then-network loader for the guard directory.
pub struct RelayDirectory {
    cache_path: PathBuf,
    freshness: chrono::Duration,
    fetcher: Arc<dyn DirectoryFetcher>,
}

impl RelayDirectory {
    pub fn new(
        cache_path: impl Into<PathBuf>,
        freshness: chrono::Duration,
        fetcher: Arc<dyn DirectoryFetcher>,
    ) -> Self {
        Self {
            cache_path: cache_path.into(),
            freshness,
            fetcher,
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn is_fresh(&self, snapshot: &RelaySnapshot) -> bool {
        snapshot.is_fresh_at(Local::now(), self.freshness)
    }

    /// Reads the cached snapshot. A missing cache file is `Ok(None)`; an
    /// unreadable or unparseable one is an error. Freshness is not checked.
    pub async fn load(&self) -> Result<Option<RelaySnapshot>, DirectoryError> {
        let data = match tokio::fs::read(&self.cache_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No directory cache at {}", self.cache_path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(DirectoryError::CacheRead {
                    path: self.cache_path.display().to_string(),
                    source,
                })
            }
        };
        RelaySnapshot::parse(&data).map(Some)
    }

    /// Returns the cached snapshot while it is fresh, otherwise fetches,
    /// persists and returns a new one.
    pub async fn refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<RelaySnapshot>, DirectoryError> {
        info!("Checking guard relay directory...");
        if let Some(current) = self.load().await? {
            if self.is_fresh(&current) {
                info!(
                    "✓ Guard directory is fresh (published {}, {} relays)",
                    current.published().format(PUBLISHED_FORMAT),
                    current.relays().len()
                );
                return Ok(Arc::new(current));
            }
            info!("Guard directory is not fresh - reloading...");
        } else {
            info!("Guard directory not cached - downloading...");
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(DirectoryError::Cancelled),
            body = self.fetcher.fetch() => body?,
        };
        let snapshot = RelaySnapshot::parse(&body)?;
        self.store(&body).await?;

        info!(
            "✓ Downloaded guard directory (published {}, {} relays)",
            snapshot.published().format(PUBLISHED_FORMAT),
            snapshot.relays().len()
        );
        Ok(Arc::new(snapshot))
    }

    async fn store(&self, body: &[u8]) -> Result<(), DirectoryError> {
        let to_err = |source| DirectoryError::CacheWrite {
            path: self.cache_path.display().to_string(),
            source,
        };
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
            }
        }
        tokio::fs::write(&self.cache_path, body)
            .await
            .map_err(to_err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    pub(crate) fn document(published: DateTime<Local>) -> String {
        format!(
            r#"{{"version":"8.0","relays_published":"{}","relays":[
                {{"nickname":"alpha","fingerprint":"AA","or_addresses":["198.51.100.7:9001","[2001:db8::7]:9001"]}},
                {{"nickname":"beta","or_addresses":["203.0.113.45:443"]}}
            ],"bridges":[]}}"#,
            published.format(PUBLISHED_FORMAT)
        )
    }

    /// Serves a fixed body and counts how often it was asked.
    pub(crate) struct CountingFetcher {
        pub body: Result<String, String>,
        pub calls: AtomicUsize,
    }

    impl CountingFetcher {
        pub fn ok(body: String) -> Self {
            Self {
                body: Ok(body),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                body: Err(reason.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DirectoryFetcher for CountingFetcher {
        async fn fetch(&self) -> Result<Bytes, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.body {
                Ok(body) => Ok(Bytes::from(body.clone())),
                Err(reason) => Err(DirectoryError::Fetch(reason.clone())),
            }
        }
    }

    fn minutes_ago(m: i64) -> DateTime<Local> {
        Local::now() - chrono::Duration::minutes(m)
    }

    fn window() -> chrono::Duration {
        chrono::Duration::minutes(FRESHNESS_MINUTES)
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Local::now();
        let fresh = RelaySnapshot::new(now - chrono::Duration::minutes(10), vec![]);
        assert!(fresh.is_fresh_at(now, window()));
        assert!(fresh.is_fresh());

        let stale = RelaySnapshot::new(now - chrono::Duration::minutes(31), vec![]);
        assert!(!stale.is_fresh_at(now, window()));
        assert!(!stale.is_fresh());

        // Exactly at the boundary is already stale
        let edge = RelaySnapshot::new(now - window(), vec![]);
        assert!(!edge.is_fresh_at(now, window()));
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let now = Local::now();
        let snapshot = RelaySnapshot::new(now - chrono::Duration::minutes(31), vec![]);
        assert!(snapshot.is_fresh_at(now, chrono::Duration::MAX));
    }

    #[test]
    fn test_parse_listing() {
        let published = Local.with_ymd_and_hms(2024, 3, 9, 14, 0, 0).unwrap();
        let snapshot = RelaySnapshot::parse(document(published).as_bytes()).unwrap();
        assert_eq!(snapshot.published(), published);
        assert_eq!(snapshot.relays().len(), 2);
        assert_eq!(snapshot.relays()[0].nickname, "alpha");
        assert_eq!(snapshot.relays()[1].or_addresses, vec!["203.0.113.45:443"]);
    }

    #[test]
    fn test_serialize_then_parse_keeps_fields() {
        let published = Local.with_ymd_and_hms(2023, 11, 2, 8, 30, 15).unwrap();
        let snapshot = RelaySnapshot::new(
            published,
            vec![
                Relay::new("gamma", vec!["192.0.2.1:9001".to_string()]),
                Relay::new("delta", vec![]),
            ],
        );
        let parsed = RelaySnapshot::parse(snapshot.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_published_keeps_whole_seconds_only() {
        let exact = Local.with_ymd_and_hms(2023, 11, 2, 8, 30, 15).unwrap();
        let snapshot = RelaySnapshot::new(exact + chrono::Duration::milliseconds(750), vec![]);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains(r#""relays_published":"2023-11-02 08:30:15""#));

        let parsed = RelaySnapshot::parse(json.as_bytes()).unwrap();
        assert_eq!(parsed.published(), exact);
        assert_ne!(parsed, snapshot);
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let body = r#"{"relays_published":"2024-03-09T14:00:00Z","relays":[]}"#;
        assert!(matches!(
            RelaySnapshot::parse(body.as_bytes()),
            Err(DirectoryError::Timestamp { .. })
        ));
        assert!(matches!(
            RelaySnapshot::parse(b"{not json"),
            Err(DirectoryError::Json(_))
        ));
    }

    #[test]
    fn test_contains_address_substring() {
        let snapshot = RelaySnapshot::parse(document(Local::now()).as_bytes()).unwrap();
        assert!(snapshot.contains_address("198.51.100.7".parse().unwrap()));
        assert!(snapshot.contains_address("2001:db8::7".parse().unwrap()));
        // Loose match: a prefix of a listed address also counts
        assert!(snapshot.contains_address("203.0.113.4".parse().unwrap()));
        assert!(!snapshot.contains_address("192.0.2.99".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_load_missing_cache_is_none() {
        let dir = tempdir().unwrap();
        let directory = RelayDirectory::new(
            dir.path().join("guards.json"),
            window(),
            Arc::new(CountingFetcher::failing("unused")),
        );
        assert!(directory.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_returns_stale_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guards.json");
        std::fs::write(&path, document(minutes_ago(120))).unwrap();
        let directory = RelayDirectory::new(
            &path,
            window(),
            Arc::new(CountingFetcher::failing("unused")),
        );
        let loaded = directory.load().await.unwrap().unwrap();
        assert!(!directory.is_fresh(&loaded));
    }

    #[tokio::test]
    async fn test_load_corrupt_cache_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guards.json");
        std::fs::write(&path, "garbage").unwrap();
        let directory = RelayDirectory::new(
            &path,
            window(),
            Arc::new(CountingFetcher::failing("unused")),
        );
        assert!(directory.load().await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_uses_fresh_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guards.json");
        std::fs::write(&path, document(minutes_ago(5))).unwrap();
        let fetcher = Arc::new(CountingFetcher::failing("network down"));
        let directory = RelayDirectory::new(&path, window(), fetcher.clone());

        let snapshot = directory.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.relays().len(), 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_fetches_and_persists_when_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("guards.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, document(minutes_ago(45))).unwrap();

        let new_body = document(minutes_ago(1));
        let fetcher = Arc::new(CountingFetcher::ok(new_body.clone()));
        let directory = RelayDirectory::new(&path, window(), fetcher.clone());

        let snapshot = directory.refresh(&CancellationToken::new()).await.unwrap();
        assert!(directory.is_fresh(&snapshot));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), new_body);
    }

    #[tokio::test]
    async fn test_refresh_fetches_when_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("guards.json");
        let fetcher = Arc::new(CountingFetcher::ok(document(minutes_ago(2))));
        let directory = RelayDirectory::new(&path, window(), fetcher.clone());

        directory.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_refresh_failure_does_not_fall_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guards.json");
        let stale = document(minutes_ago(90));
        std::fs::write(&path, &stale).unwrap();
        let directory = RelayDirectory::new(
            &path,
            window(),
            Arc::new(CountingFetcher::failing("connection refused")),
        );

        let result = directory.refresh(&CancellationToken::new()).await;
        assert!(matches!(result, Err(DirectoryError::Fetch(_))));
        // The stale cache is left untouched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), stale);
    }

    #[tokio::test]
    async fn test_refresh_rejects_unparseable_download() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guards.json");
        let directory = RelayDirectory::new(
            &path,
            window(),
            Arc::new(CountingFetcher::ok("<html>rate limited</html>".to_string())),
        );

        assert!(directory.refresh(&CancellationToken::new()).await.is_err());
        assert!(!path.exists());
    }
}
