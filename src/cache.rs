//! A-record cache with optional whole-file persistence.

use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::DomainName;
use crate::error::CacheError;

type Records = FxHashMap<DomainName, Vec<Ipv4Addr>>;

/// Name to IPv4 address cache.
///
/// Every read and write goes through one mutex, and the file rewrite holds it
/// too so the file is always a consistent snapshot. Entries never expire; a
/// later successful resolution overwrites them.
pub struct RecordCache {
    records: Mutex<Records>,
    path: Option<PathBuf>,
    dirty: Notify,
}

impl RecordCache {
    /// An in-memory cache with no backing file.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(FxHashMap::default()),
            path: None,
            dirty: Notify::new(),
        }
    }

    /// Create a cache, loading `path` first when one is given.
    pub fn open(path: Option<PathBuf>) -> Result<Self, CacheError> {
        let Some(path) = path else {
            return Ok(Self::new());
        };

        let cache = Self {
            path: Some(path.clone()),
            ..Self::new()
        };
        let loaded = cache.load_from(&path)?;
        info!("loaded {} cached records from {}", loaded, path.display());
        Ok(cache)
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &DomainName) -> Option<Vec<Ipv4Addr>> {
        self.lock().get(name).cloned()
    }

    /// Store a resolution result.
    ///
    /// Empty lists are ignored so negative answers never reach the cache.
    /// Returns whether the entry was written. With a backing file, the
    /// persister is asked to rewrite it.
    pub fn set(&self, name: DomainName, addrs: Vec<Ipv4Addr>) -> bool {
        if addrs.is_empty() {
            return false;
        }

        self.lock().insert(name, addrs);
        if self.path.is_some() {
            self.dirty.notify_one();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Load `name addr [addr ...]` lines from `path`.
    ///
    /// A missing file is created empty. Lines with fewer than two fields or an
    /// address that is not IPv4 are skipped with a warning. Returns the number
    /// of entries loaded.
    pub fn load_from(&self, path: &Path) -> Result<usize, CacheError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("cache file {} not found, creating it", path.display());
                File::create(path).map_err(|source| CacheError::Create {
                    path: path.to_path_buf(),
                    source,
                })?;
                return Ok(0);
            }
            Err(source) => {
                return Err(CacheError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut loaded = 0;
        let mut records = self.lock();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| CacheError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            match parse_line(&line) {
                Some((name, addrs)) => {
                    records.insert(name, addrs);
                    loaded += 1;
                }
                None => warn!("skipping invalid cache line: {:?}", line),
            }
        }

        Ok(loaded)
    }

    /// Rewrite `path` with every entry, one line each.
    ///
    /// The cache lock is held for the whole write.
    pub fn save_to(&self, path: &Path) -> Result<(), CacheError> {
        let write_err = |source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        };

        let records = self.lock();
        let file = File::create(path).map_err(write_err)?;
        let mut out = BufWriter::new(file);
        for (name, addrs) in records.iter() {
            write!(out, "{}", name).map_err(write_err)?;
            for addr in addrs {
                write!(out, " {}", addr).map_err(write_err)?;
            }
            writeln!(out).map_err(write_err)?;
        }
        out.flush().map_err(write_err)?;

        debug!("saved {} records to {}", records.len(), path.display());
        Ok(())
    }

    /// Background writer for the backing file.
    ///
    /// Waits for `set` to mark the cache dirty and rewrites the file on a
    /// blocking thread. Bursts of updates collapse into one rewrite. Only
    /// returns on a write failure, which callers treat as fatal. Without a
    /// backing file it returns immediately.
    pub async fn persist(self: Arc<Self>) -> Result<(), CacheError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        loop {
            self.dirty.notified().await;

            let cache = Arc::clone(&self);
            let path = path.clone();
            tokio::task::spawn_blocking(move || cache.save_to(&path))
                .await
                .map_err(|e| CacheError::Persister(e.to_string()))??;
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &str) -> Option<(DomainName, Vec<Ipv4Addr>)> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let addrs = fields
        .map(|field| field.parse::<Ipv4Addr>().ok())
        .collect::<Option<Vec<_>>>()?;
    if addrs.is_empty() {
        return None;
    }
    Some((DomainName::new(name), addrs))
}
