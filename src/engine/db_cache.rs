//! On-disk cache for the compiled prefilter database.
//!
//! Compiling thousands of prefilter patterns dominates startup, so the
//! serialized database is cached on disk, keyed by a 64-bit FNV-1a hash of a
//! version tag followed by every pattern expression in enrollment order. Any
//! change to the pattern set (or its order) changes the key.
//!
//! Cache files are named `<16-hex-key>.hsdb`. Stores go through a tmp file
//! and an atomic rename so concurrent processes never observe partial
//! writes. Unlike a best-effort cache, a cache file that exists but cannot
//! be deserialized is a hard error; callers may delete the file and retry.

use std::error::Error;
use std::ffi::CString;
use std::fmt;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};

use fnv::FnvHasher;
use tracing::info;

use super::prefilter::PrefilterDb;

/// Version tag mixed into every cache key. Bumping it invalidates all
/// previously cached databases.
const KEY_VERSION_TAG: &[u8] = b"HSPATV1";

/// On-disk cache of serialized prefilter databases inside one directory.
pub(crate) struct DbCache {
    dir: PathBuf,
}

impl DbCache {
    pub(crate) fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Computes the 64-bit FNV-1a cache key over the ordered pattern set.
    pub(crate) fn cache_key(patterns: &[CString]) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write(KEY_VERSION_TAG);
        for pattern in patterns {
            hasher.write(pattern.as_bytes());
        }
        hasher.finish()
    }

    /// Returns the cache file path for the given ordered pattern set.
    pub(crate) fn cache_path(&self, patterns: &[CString]) -> PathBuf {
        self.dir
            .join(format!("{:016x}.hsdb", Self::cache_key(patterns)))
    }

    /// Loads the cached database for `patterns`, or compiles and stores it.
    ///
    /// The cache directory is created if absent. A hit deserializes the
    /// stored bytes; corruption is fatal. A miss compiles the database,
    /// serializes it, and atomically places the file before returning.
    pub(crate) fn build_or_load(
        &self,
        patterns: &[CString],
        ids: &[u32],
    ) -> Result<PrefilterDb, CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::Dir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.cache_path(patterns);
        if !path.exists() {
            let db = PrefilterDb::compile(patterns, ids)
                .map_err(|detail| CacheError::Compile { detail })?;
            let bytes = db
                .serialize()
                .map_err(|detail| CacheError::Serialize { detail })?;

            let tmp_path = self
                .dir
                .join(format!("{:016x}.{}.tmp", Self::cache_key(patterns), std::process::id()));
            std::fs::write(&tmp_path, &bytes).map_err(|source| CacheError::Write {
                path: tmp_path.clone(),
                source,
            })?;
            std::fs::rename(&tmp_path, &path).map_err(|source| {
                let _ = std::fs::remove_file(&tmp_path);
                CacheError::Write {
                    path: path.clone(),
                    source,
                }
            })?;
            info!("created prefilter database cache at {}", path.display());
            return Ok(db);
        }

        let bytes = std::fs::read(&path).map_err(|source| CacheError::Read {
            path: path.clone(),
            source,
        })?;
        PrefilterDb::deserialize(&bytes).map_err(|detail| CacheError::Corrupt { path, detail })
    }
}

/// Cache I/O failures. All are fatal at engine construction.
#[derive(Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// The cache directory cannot be created.
    Dir { path: PathBuf, source: io::Error },
    /// An existing cache file cannot be read.
    Read { path: PathBuf, source: io::Error },
    /// The cache file cannot be written or placed.
    Write { path: PathBuf, source: io::Error },
    /// An existing cache file failed to deserialize. Deleting the file and
    /// retrying rebuilds it.
    Corrupt { path: PathBuf, detail: String },
    /// The prefilter database itself failed to compile.
    Compile { detail: String },
    /// A freshly compiled database failed to serialize.
    Serialize { detail: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dir { path, source } => write!(
                f,
                "failed to create cache directory {}: {source}",
                path.display()
            ),
            Self::Read { path, source } => write!(
                f,
                "failed to read prefilter database cache {}: {source}",
                path.display()
            ),
            Self::Write { path, source } => write!(
                f,
                "failed to write prefilter database cache {}: {source}",
                path.display()
            ),
            Self::Corrupt { path, detail } => write!(
                f,
                "failed to load prefilter database from cache {}: {detail}",
                path.display()
            ),
            Self::Compile { detail } => {
                write!(f, "failed to compile prefilter database: {detail}")
            }
            Self::Serialize { detail } => {
                write!(f, "failed to serialize prefilter database: {detail}")
            }
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Dir { source, .. } | Self::Read { source, .. } | Self::Write { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
