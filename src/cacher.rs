//! Core logic to download and cache APT repository items.
//!
//! The [`Cacher`] owns two storages (indices and payloads), the map of
//! expected checksums published by the repository indices, and the download
//! coordinator. Downloads are single-flight per path: concurrent readers of
//! the same path attach to one upstream fetch, and failed fetches are
//! negatively cached for a short period.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::fileinfo::FileInfo;
use crate::meta;
use crate::storage::Storage;
use crate::urlmap::UrlMap;

/// Hard deadline for a single upstream fetch, covering both the request
/// and the body read.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How many in-flight downloads a single `get` will wait out before it
/// gives up and answers 500. Sustained checksum churn between an index and
/// its files would otherwise retry forever.
const MAX_DOWNLOAD_WAITS: usize = 3;

/// Cacher tunables.
#[derive(Debug, Clone)]
pub struct CacherOptions {
    /// Interval between Release/InRelease refresher ticks.
    pub check_interval: Duration,
    /// How long a failed fetch status lingers in the negative cache.
    pub cache_period: Duration,
}

impl Default for CacherOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
            cache_period: Duration::from_secs(3),
        }
    }
}

#[derive(Default)]
struct DownloadState {
    /// One entry per path with a fetch in flight. The worker drops its
    /// sender on exit, which wakes every receiver.
    inflight: HashMap<String, watch::Receiver<()>>,
    /// Last fetch status per path, kept for the negative-cache period.
    results: HashMap<String, u16>,
}

struct CacherInner {
    meta: Storage,
    items: Storage,
    um: UrlMap,
    client: reqwest::Client,
    options: CacherOptions,
    shutdown: CancellationToken,
    /// path → identity the repository indices expect for that path.
    info: RwLock<HashMap<String, FileInfo>>,
    dl: RwLock<DownloadState>,
}

/// Downloads and caches APT indices and package files.
#[derive(Clone)]
pub struct Cacher {
    inner: Arc<CacherInner>,
}

impl Cacher {
    /// Load both storages, rebuild the expected-checksum index from the
    /// repository indices already on disk, and start refreshers for the
    /// top-level Release/InRelease files found there.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        meta: Storage,
        items: Storage,
        um: UrlMap,
        options: CacherOptions,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        meta.load().context("loading meta storage")?;
        items.load().context("loading items storage")?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("apt-cacher/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let inner = Arc::new(CacherInner {
            meta,
            items,
            um,
            client,
            options,
            shutdown,
            info: RwLock::new(HashMap::new()),
            dl: RwLock::new(DownloadState::default()),
        });

        let metas = inner.meta.list_all();
        let mut info = inner.info.write();
        for fi in &metas {
            let mut file = inner
                .meta
                .lookup(fi)
                .with_context(|| format!("looking up cached index {}", fi.path()))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .with_context(|| format!("reading cached index {}", fi.path()))?;
            let children = meta::extract_file_info(fi.path(), &data)
                .with_context(|| format!("extracting {}", fi.path()))?;
            for child in children {
                info.insert(child.path().to_string(), child);
            }
        }

        // Indices nothing vouches for (top-level Release and friends) are
        // registered path-only and kept fresh by a refresher.
        for fi in &metas {
            if !info.contains_key(fi.path()) {
                info.insert(fi.path().to_string(), FileInfo::with_path(fi.path()));
                inner.spawn_refresher(fi.path());
            }
        }
        drop(info);

        Ok(Self { inner })
    }

    /// Serve `path` from the cache, downloading from upstream on a miss.
    ///
    /// Returns the HTTP status to answer with and, on 200, an open handle
    /// to the cached file which the caller owns. `Err` means an internal
    /// storage failure.
    pub async fn get(&self, path: &str) -> CacheResult<(u16, Option<File>)> {
        let inner = &self.inner;
        if inner.um.url(path).is_none() {
            return Ok((404, None));
        }

        let is_index = meta::is_meta(path);
        if is_index && !meta::is_supported(path) {
            return Ok((404, None));
        }
        let storage = if is_index { &inner.meta } else { &inner.items };

        for _ in 0..MAX_DOWNLOAD_WAITS {
            let expected = inner.info.read().get(path).cloned();
            if let Some(expected) = &expected {
                match storage.lookup(expected) {
                    Ok(file) => return Ok((200, Some(file))),
                    Err(CacheError::NotFound) => {}
                    Err(e) => {
                        error!(%path, error = %e, "cache lookup failure");
                        return Err(e);
                    }
                }
            }

            // Not in storage: consume a cached failure, join the in-flight
            // download for this path, or start one.
            let (inflight, result) = {
                let dl = inner.dl.read();
                (
                    dl.inflight.get(path).cloned(),
                    dl.results.get(path).copied(),
                )
            };
            if let Some(status) = result {
                if status != 200 {
                    return Ok((status, None));
                }
            }
            if let Some(mut rx) = inflight {
                let _ = rx.changed().await;
            } else if let Some(mut rx) = inner.download(path, expected) {
                let _ = rx.changed().await;
            } else {
                return Ok((404, None));
            }
        }

        warn!(%path, "giving up after repeated download attempts");
        Ok((500, None))
    }
}

impl CacherInner {
    /// Start a download for `path` unless one is already in flight, and
    /// return a signal that resolves when the fetch completes. `None` means
    /// the path has no upstream mapping and nothing was started.
    ///
    /// When `expected` is set, the downloaded bytes are validated against
    /// it before being stored. The fetch may still fail or be superseded;
    /// callers should look the item up again after the signal and retry.
    fn download(self: &Arc<Self>, path: &str, expected: Option<FileInfo>) -> Option<watch::Receiver<()>> {
        let url = self.um.url(path)?;

        let mut dl = self.dl.write();
        if let Some(rx) = dl.inflight.get(path) {
            return Some(rx.clone());
        }
        let (tx, rx) = watch::channel(());
        dl.inflight.insert(path.to_string(), rx.clone());
        drop(dl);

        let inner = Arc::clone(self);
        let path = path.to_string();
        tokio::spawn(async move { inner.fetch(path, url, expected, tx).await });
        Some(rx)
    }

    /// Fetch worker; exactly one runs per path at a time. Always records
    /// the effective status, removes itself from the in-flight map, wakes
    /// its waiters, and schedules the negative-cache expiry.
    async fn fetch(
        self: Arc<Self>,
        path: String,
        url: Url,
        expected: Option<FileInfo>,
        tx: watch::Sender<()>,
    ) {
        let status = tokio::select! {
            () = self.shutdown.cancelled() => 500,
            result = self.fetch_and_store(&path, &url, expected.as_ref()) => match result {
                Ok(()) => 200,
                Err(CacheError::FetchFailure(status)) => status,
                Err(e) => {
                    error!(%path, error = %e, "download failed");
                    500
                }
            },
        };

        let mut dl = self.dl.write();
        dl.inflight.remove(&path);
        dl.results.insert(path.clone(), status);
        drop(dl);
        drop(tx);

        let inner = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::select! {
                () = inner.shutdown.cancelled() => return,
                () = tokio::time::sleep(inner.options.cache_period) => {}
            }
            inner.dl.write().results.remove(&path);
        });
    }

    /// Perform the GET, validate, store, and merge extracted checksums.
    /// Upstream problems surface as [`CacheError::FetchFailure`] carrying
    /// the upstream status (500 for transport errors); validation, parse,
    /// and storage failures keep their own kinds and are recorded as 500.
    async fn fetch_and_store(
        self: &Arc<Self>,
        path: &str,
        url: &Url,
        expected: Option<&FileInfo>,
    ) -> CacheResult<()> {
        let response = self
            .client
            .get(url.clone())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                warn!(%url, error = %e, "upstream GET failed");
                CacheError::FetchFailure(500)
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            debug!(%url, status, "upstream returned non-200");
            return Err(CacheError::FetchFailure(status));
        }

        let body = response.bytes().await.map_err(|e| {
            warn!(%url, error = %e, "reading upstream body failed");
            CacheError::FetchFailure(500)
        })?;

        let actual = FileInfo::make(path, &body);
        if let Some(expected) = expected {
            if !expected.same(&actual) {
                return Err(CacheError::Validation(path.to_string()));
            }
        }

        let is_index = meta::is_meta(path);
        let children = if is_index {
            meta::extract_file_info(path, &body)?
        } else {
            Vec::new()
        };

        let storage = if is_index { &self.meta } else { &self.items };
        let mut info = self.info.write();
        storage.insert(&body, &actual)?;
        for child in children {
            info.insert(child.path().to_string(), child);
        }
        if is_index && !info.contains_key(path) {
            // First sighting of this index: keep it fresh from now on.
            self.spawn_refresher(path);
        }
        info.insert(path.to_string(), actual);
        drop(info);

        info!(%path, "downloaded and cached");
        Ok(())
    }

    /// Spawn the periodic refresher for a top-level index path. Paths whose
    /// base is not Release/InRelease have nothing to refresh.
    fn spawn_refresher(self: &Arc<Self>, path: &str) {
        let with_gpg = match meta::index_basename(path) {
            "Release" => true,
            "InRelease" => false,
            _ => return,
        };
        let inner = Arc::clone(self);
        let path = path.to_string();
        tokio::spawn(async move { inner.refresh_loop(path, with_gpg).await });
    }

    /// Re-download the index (and its detached signature, for Release) on
    /// every tick until the cacher shuts down. A path that loses its
    /// mapping skips the tick.
    async fn refresh_loop(self: Arc<Self>, path: String, with_gpg: bool) {
        debug!(%path, "starting index refresher");

        let mut ticker = tokio::time::interval(self.options.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; refreshes start one full
        // interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let signal = self.download(&path, None);
            if with_gpg {
                if let Some(mut rx) = self.download(&format!("{path}.gpg"), None) {
                    let _ = rx.changed().await;
                }
            }
            if let Some(mut rx) = signal {
                let _ = rx.changed().await;
            }
        }
    }
}
