//! # Bootstrap Cache
//!
//! File cache shared by workers that boot concurrently.
//!
//! Writers hold an advisory lock file (`<name>.lock`, created exclusively) and
//! publish the artifact by writing a temporary file and renaming it into
//! place, so readers see either the old or the new artifact, never a partial
//! one. A worker that finds the lock taken builds the artifact itself and
//! moves on without writing; it never waits for the lock holder. Lock files
//! older than the stale threshold are treated as abandoned and reclaimed.

use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// How a cached value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Read from the cache
    Hit,
    /// Built and written to the cache
    Built,
    /// Built locally because another worker held the lock
    BuiltLocal,
}

/// Value returned by [`BootstrapCache::get_or_build`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached<T> {
    /// The artifact
    pub value: T,
    /// Where it came from
    pub source: CacheSource,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    fingerprint: String,
    value: T,
}

struct LockGuard {
    path: PathBuf,
    token: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // a lock reclaimed as stale now belongs to another worker
        match fs::read_to_string(&self.path) {
            Ok(holder) if holder.trim() == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove cache lock");
                }
            }
            Ok(_) => debug!(path = %self.path.display(), "Cache lock was reclaimed by another worker"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to read cache lock"),
        }
    }
}

fn lock_token() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{seq}", std::process::id())
}

/// Cross-worker artifact cache rooted at a directory
#[derive(Debug, Clone)]
pub struct BootstrapCache {
    dir: PathBuf,
    stale_after: Duration,
}

impl BootstrapCache {
    /// Create a cache in `dir`
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    /// Cache described by configuration, if a directory is set
    #[must_use]
    pub fn from_config(config: &BootstrapConfig) -> Option<Self> {
        config
            .cache_dir
            .as_ref()
            .map(|dir| Self::new(dir, Duration::from_secs(config.lock_stale_after_secs)))
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    fn cache_error(path: &Path, message: impl std::fmt::Display) -> Error {
        Error::BootstrapCache {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Read an artifact written with the same fingerprint
    ///
    /// A missing file or a fingerprint mismatch is a miss (`None`).
    ///
    /// # Errors
    ///
    /// Returns `Error::BootstrapCache` if the file exists but cannot be read
    /// or decoded.
    pub fn load<T: DeserializeOwned>(&self, name: &str, fingerprint: &str) -> Result<Option<T>> {
        let path = self.artifact_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::cache_error(&path, e)),
        };
        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|e| Self::cache_error(&path, e))?;
        if envelope.fingerprint != fingerprint {
            debug!(path = %path.display(), "Cached artifact has a different fingerprint");
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    /// Write an artifact if the lock is free
    ///
    /// Returns `false` without writing when another worker holds the lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::BootstrapCache` on I/O or serialization failure.
    pub fn store<T: Serialize>(&self, name: &str, fingerprint: &str, value: &T) -> Result<bool> {
        let Some(_lock) = self.try_lock(name)? else {
            return Ok(false);
        };
        self.write_atomic(name, fingerprint, value)?;
        Ok(true)
    }

    /// Return the cached artifact or build it
    ///
    /// On a miss the builder runs under the lock and the result is published.
    /// If the lock is taken, the builder runs without the lock and nothing is
    /// written. Unreadable artifacts are logged and rebuilt.
    ///
    /// # Errors
    ///
    /// Propagates builder errors, and `Error::BootstrapCache` if publishing
    /// fails.
    pub fn get_or_build<T, F>(&self, name: &str, fingerprint: &str, build: F) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.load_or_warn(name, fingerprint) {
            return Ok(Cached {
                value,
                source: CacheSource::Hit,
            });
        }

        let Some(_lock) = self.try_lock(name)? else {
            info!(name, "Bootstrap cache busy; building locally");
            return Ok(Cached {
                value: build()?,
                source: CacheSource::BuiltLocal,
            });
        };

        // another worker may have published while we were taking the lock
        if let Some(value) = self.load_or_warn(name, fingerprint) {
            return Ok(Cached {
                value,
                source: CacheSource::Hit,
            });
        }

        let value = build()?;
        self.write_atomic(name, fingerprint, &value)?;
        info!(name, path = %self.artifact_path(name).display(), "Bootstrap cache written");
        Ok(Cached {
            value,
            source: CacheSource::Built,
        })
    }

    fn load_or_warn<T: DeserializeOwned>(&self, name: &str, fingerprint: &str) -> Option<T> {
        match self.load(name, fingerprint) {
            Ok(value) => value,
            Err(e) => {
                warn!(name, error = %e, "Ignoring unreadable bootstrap cache");
                None
            }
        }
    }

    fn try_lock(&self, name: &str) -> Result<Option<LockGuard>> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::cache_error(&self.dir, e))?;
        let path = self.lock_path(name);
        let token = lock_token();

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // holder pid first, for humans inspecting a stuck lock
                    writeln!(file, "{token}").map_err(|e| Self::cache_error(&path, e))?;
                    return Ok(Some(LockGuard { path, token }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt == 0 && self.is_stale(&path) && self.reclaim(&path, &token)? {
                        continue;
                    }
                    debug!(path = %path.display(), "Bootstrap lock held by another worker");
                    return Ok(None);
                }
                Err(e) => return Err(Self::cache_error(&path, e)),
            }
        }
        Ok(None)
    }

    /// Move a stale lock out of the way
    ///
    /// The lock is renamed to a private name before it is removed, so of two
    /// workers reclaiming the same lock only one succeeds and neither can
    /// delete a fresh lock the other just created. Returns whether the lock
    /// path is free to retry.
    fn reclaim(&self, lock: &Path, token: &str) -> Result<bool> {
        let claimed = self.dir.join(format!(
            ".{}.{token}.stale",
            lock.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned())
        ));
        match fs::rename(lock, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Self::cache_error(lock, e)),
        }

        if self.is_stale(&claimed) {
            warn!(path = %lock.display(), "Reclaimed stale bootstrap lock");
            fs::remove_file(&claimed).map_err(|e| Self::cache_error(&claimed, e))?;
            return Ok(true);
        }

        // another worker re-created the lock in between; hand it back
        if let Err(e) = fs::hard_link(&claimed, lock) {
            debug!(path = %lock.display(), error = %e, "Lock re-created while restoring");
        }
        fs::remove_file(&claimed).map_err(|e| Self::cache_error(&claimed, e))?;
        Ok(false)
    }

    fn is_stale(&self, lock: &Path) -> bool {
        fs::metadata(lock)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= self.stale_after)
    }

    fn write_atomic<T: Serialize>(&self, name: &str, fingerprint: &str, value: &T) -> Result<()> {
        let path = self.artifact_path(name);
        let tmp = self
            .dir
            .join(format!(".{name}.json.{}.tmp", std::process::id()));

        let envelope = Envelope {
            fingerprint: fingerprint.to_string(),
            value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| Self::cache_error(&path, e))?;

        let written = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Self::cache_error(&path, e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cache(dir: &Path) -> BootstrapCache {
        BootstrapCache::new(dir, Duration::from_secs(60))
    }

    #[test]
    fn test_build_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let builds = Cell::new(0);

        let first = cache
            .get_or_build("routes", "v1", || {
                builds.set(builds.get() + 1);
                Ok(vec!["/users".to_string()])
            })
            .unwrap();
        assert_eq!(first.source, CacheSource::Built);

        let second = cache
            .get_or_build("routes", "v1", || {
                builds.set(builds.get() + 1);
                Ok(Vec::<String>::new())
            })
            .unwrap();
        assert_eq!(second.source, CacheSource::Hit);
        assert_eq!(second.value, vec!["/users".to_string()]);
        assert_eq!(builds.get(), 1);
        assert!(!dir.path().join("routes.lock").exists());
    }

    #[test]
    fn test_fingerprint_mismatch_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.store("routes", "v1", &1_u32).unwrap();

        let rebuilt = cache.get_or_build("routes", "v2", || Ok(2_u32)).unwrap();
        assert_eq!(rebuilt, Cached { value: 2, source: CacheSource::Built });
        assert_eq!(cache.load::<u32>("routes", "v2").unwrap(), Some(2));
        assert_eq!(cache.load::<u32>("routes", "v1").unwrap(), None);
    }

    #[test]
    fn test_held_lock_builds_locally_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        fs::write(dir.path().join("routes.lock"), "other worker").unwrap();

        let local = cache.get_or_build("routes", "v1", || Ok(7_u32)).unwrap();
        assert_eq!(local.source, CacheSource::BuiltLocal);
        assert_eq!(local.value, 7);
        assert!(!dir.path().join("routes.json").exists());
        assert!(!cache.store("routes", "v1", &7_u32).unwrap());
        assert!(dir.path().join("routes.lock").exists());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BootstrapCache::new(dir.path(), Duration::ZERO);
        fs::write(dir.path().join("routes.lock"), "crashed worker").unwrap();

        let built = cache.get_or_build("routes", "v1", || Ok(3_u32)).unwrap();
        assert_eq!(built.source, CacheSource::Built);
        assert!(!dir.path().join("routes.lock").exists());
    }

    #[test]
    fn test_reclaimed_lock_survives_previous_holder() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BootstrapCache::new(dir.path(), Duration::ZERO);
        let lock = dir.path().join("routes.lock");

        let first = cache.try_lock("routes").unwrap().unwrap();
        let second = cache.try_lock("routes").unwrap().unwrap();
        assert_ne!(first.token, second.token);

        drop(first);
        assert_eq!(fs::read_to_string(&lock).unwrap().trim(), second.token);
        drop(second);
        assert!(!lock.exists());
    }

    #[test]
    fn test_fresh_lock_is_not_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let lock = dir.path().join("routes.lock");
        fs::write(&lock, "other worker").unwrap();

        assert!(!cache.reclaim(&lock, "me").unwrap());
        assert_eq!(fs::read_to_string(&lock).unwrap(), "other worker");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_artifact_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        fs::write(dir.path().join("routes.json"), "{ not json").unwrap();

        assert!(matches!(
            cache.load::<u32>("routes", "v1"),
            Err(Error::BootstrapCache { .. })
        ));
        let rebuilt = cache.get_or_build("routes", "v1", || Ok(5_u32)).unwrap();
        assert_eq!(rebuilt.source, CacheSource::Built);
        assert_eq!(cache.load::<u32>("routes", "v1").unwrap(), Some(5));
    }

    #[test]
    fn test_builder_error_propagates_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let result: Result<Cached<u32>> = cache.get_or_build("routes", "v1", || {
            Err(Error::Config {
                message: "bad routes".to_string(),
            })
        });
        assert!(matches!(result, Err(Error::Config { .. })));
        assert!(!dir.path().join("routes.lock").exists());
    }

    #[test]
    fn test_from_config() {
        assert!(BootstrapCache::from_config(&BootstrapConfig::default()).is_none());
        let config = BootstrapConfig {
            cache_dir: Some(PathBuf::from("/tmp/trellis-cache")),
            lock_stale_after_secs: 5,
        };
        let cache = BootstrapCache::from_config(&config).unwrap();
        assert_eq!(cache.dir(), Path::new("/tmp/trellis-cache"));
    }
}
