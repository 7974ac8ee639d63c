//! Persistent keyed byte store with LRU eviction.
//!
//! A `Storage` is a directory tree mirroring request paths plus an
//! in-memory index. Inserts land in a temp file and are renamed into place
//! atomically; lookups validate the stored checksums against the query and
//! hand back an open file handle so the caller can stream it without
//! holding the storage lock. When a byte capacity is configured, the
//! least-recently-used entries are purged after every mutation.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::fileinfo::FileInfo;
use crate::paths;

/// Prefix of in-flight temp files inside the storage root. `load` ignores
/// anything carrying it, so temp files left behind by a crash are never
/// resurrected as cache entries.
const TEMP_PREFIX: &str = ".tmp-";

struct Entry {
    info: FileInfo,
    size: u64,
    atime: u64,
}

#[derive(Default)]
struct Inner {
    used: u64,
    /// Logical clock; every insert and lookup takes the next tick, so ticks
    /// are unique and `by_atime` is a total LRU order.
    lclock: u64,
    entries: HashMap<String, Entry>,
    by_atime: BTreeMap<u64, String>,
}

/// On-disk cache directory with checksum-verified lookup and LRU eviction.
pub struct Storage {
    dir: PathBuf,
    /// Capacity in bytes; zero disables eviction.
    capacity: u64,
    inner: Mutex<Inner>,
}

impl Storage {
    /// Create a storage rooted at the absolute directory `dir`.
    pub fn new(dir: impl Into<PathBuf>, capacity: u64) -> Self {
        let dir = dir.into();
        assert!(dir.is_absolute(), "storage root must be an absolute path");
        Self {
            dir,
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Scan the root directory and rebuild the in-memory index from scratch.
    ///
    /// Every regular file becomes an entry keyed by its relative path, with
    /// a freshly computed identity. Directories are descended into;
    /// symlinks and temp files are ignored. An error reading any file
    /// aborts the load.
    pub fn load(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        *inner = Inner::default();
        self.load_dir(&mut inner, &self.dir, "")?;
        self.maint(&mut inner);
        debug!(dir = %self.dir.display(), entries = inner.entries.len(), used = inner.used, "storage loaded");
        Ok(())
    }

    fn load_dir(&self, inner: &mut Inner, dir: &Path, rel: &str) -> CacheResult<()> {
        let read_dir = fs::read_dir(dir)
            .map_err(|e| CacheError::storage(format!("reading {}", dir.display()), e))?;

        for entry in read_dir {
            let entry =
                entry.map_err(|e| CacheError::storage(format!("reading {}", dir.display()), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() {
                name.clone()
            } else {
                format!("{rel}/{name}")
            };

            let file_type = entry
                .file_type()
                .map_err(|e| CacheError::storage(format!("stat {child_rel}"), e))?;
            if file_type.is_dir() {
                self.load_dir(inner, &entry.path(), &child_rel)?;
                continue;
            }
            if !file_type.is_file() || name.starts_with(TEMP_PREFIX) {
                continue;
            }

            let data = fs::read(entry.path())
                .map_err(|e| CacheError::storage(format!("reading {child_rel}"), e))?;
            let info = FileInfo::make(child_rel.clone(), &data);
            let size = data.len() as u64;
            let atime = inner.lclock;
            inner.lclock += 1;
            inner.used += size;
            inner.by_atime.insert(atime, child_rel.clone());
            inner.entries.insert(child_rel, Entry { info, size, atime });
        }
        Ok(())
    }

    /// Store `data` under `info.path()`, replacing any existing entry.
    ///
    /// The caller must supply an identity whose digests match `data`; they
    /// are not recomputed here.
    pub fn insert(&self, data: &[u8], info: &FileInfo) -> CacheResult<()> {
        let path = info.path();
        if path.is_empty() || path.starts_with('/') || path != paths::clean(path) {
            return Err(CacheError::InvalidPath(path.to_string()));
        }

        let mut temp = NamedTempFile::with_prefix_in(TEMP_PREFIX, &self.dir)
            .map_err(|e| CacheError::storage("creating temp file", e))?;
        temp.write_all(data)
            .map_err(|e| CacheError::storage("writing temp file", e))?;
        temp.flush()
            .map_err(|e| CacheError::storage("flushing temp file", e))?;

        let dest = self.dir.join(path);
        if let Some(dest_dir) = dest.parent() {
            fs::create_dir_all(dest_dir)
                .map_err(|e| CacheError::storage(format!("creating parent of {path}"), e))?;
        }

        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.remove(path) {
            inner.by_atime.remove(&old.atime);
            inner.used -= old.size;
            if let Err(e) = fs::remove_file(&dest) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(CacheError::storage(format!("removing old {path}"), e));
                }
            }
        }

        temp.persist(&dest)
            .map_err(|e| CacheError::storage(format!("renaming temp file to {path}"), e.error))?;

        let size = data.len() as u64;
        let atime = inner.lclock;
        inner.lclock += 1;
        inner.used += size;
        inner.by_atime.insert(atime, path.to_string());
        inner.entries.insert(
            path.to_string(),
            Entry {
                info: info.clone(),
                size,
                atime,
            },
        );
        self.maint(&mut inner);
        Ok(())
    }

    /// Look up the entry at `query.path()` and open it for reading.
    ///
    /// Returns [`CacheError::NotFound`] when no entry exists or the stored
    /// identity does not satisfy `query`. A hit counts as an access for LRU
    /// purposes. The caller owns the returned handle; the underlying file
    /// stays readable even if the entry is evicted concurrently.
    pub fn lookup(&self, query: &FileInfo) -> CacheResult<File> {
        let path = query.path();
        let mut inner = self.inner.lock();
        let Inner {
            lclock,
            entries,
            by_atime,
            ..
        } = &mut *inner;

        let Some(entry) = entries.get_mut(path) else {
            return Err(CacheError::NotFound);
        };
        if !query.same(&entry.info) {
            return Err(CacheError::NotFound);
        }

        by_atime.remove(&entry.atime);
        entry.atime = *lclock;
        *lclock += 1;
        by_atime.insert(entry.atime, path.to_string());

        File::open(self.dir.join(path)).map_err(|e| CacheError::storage(format!("opening {path}"), e))
    }

    /// Remove the entry at `path` and its file. A missing path is a no-op.
    pub fn delete(&self, path: &str) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.remove(path) else {
            return Ok(());
        };
        inner.by_atime.remove(&entry.atime);
        inner.used -= entry.size;

        match fs::remove_file(self.dir.join(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::storage(format!("removing {path}"), e)),
        }
    }

    /// Snapshot of the identities currently stored.
    pub fn list_all(&self) -> Vec<FileInfo> {
        let inner = self.inner.lock();
        inner.entries.values().map(|e| e.info.clone()).collect()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes currently stored.
    pub fn used(&self) -> u64 {
        self.inner.lock().used
    }

    /// Purge least-recently-used entries while over capacity. Must be
    /// called with the lock held. There is no pinning: a just-inserted
    /// entry larger than the whole capacity evicts itself.
    fn maint(&self, inner: &mut Inner) {
        while self.capacity > 0 && inner.used > self.capacity {
            let Some((_, path)) = inner.by_atime.pop_first() else {
                break;
            };
            let Some(entry) = inner.entries.remove(&path) else {
                continue;
            };
            inner.used -= entry.size;
            if let Err(e) = fs::remove_file(self.dir.join(&path)) {
                warn!(%path, error = %e, "failed to remove evicted file");
            }
            debug!(%path, size = entry.size, "evicted");
        }
    }
}
