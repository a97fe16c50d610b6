use crate::error::FetchError;
use crate::utils::file::{ensure_directory, file_age_at, i_am_root, write_atomic};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Run-time switches that decide whether cache files may be used.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Reading cache files is allowed.
    pub use_cachefile: bool,
    /// Never read cache files.
    pub no_cache: bool,
    /// No network access: a missing cache file is an error.
    pub no_tcp: bool,
    /// Serve everything from cache files regardless of their age.
    pub simulation_mode: bool,
}

/// Filesystem cache of raw payloads keyed by `<host>` or `<host>.<check_type>`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, relpath: &str) -> PathBuf {
        self.dir.join(relpath)
    }

    /// Age of the cache file in seconds, if there is one.
    pub fn age(&self, relpath: &str) -> Option<u64> {
        file_age_at(&self.path(relpath), SystemTime::now()).ok()
    }

    pub fn read(
        &self,
        relpath: &str,
        max_age: u64,
        opts: &CacheOptions,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        self.read_at(relpath, max_age, opts, SystemTime::now())
    }

    /// Returns the cached payload if it is usable at `now`.
    ///
    /// `Ok(None)` means the caller has to fetch fresh data. Fails when no
    /// fresh data may be fetched: in simulation mode or without network.
    pub fn read_at(
        &self,
        relpath: &str,
        max_age: u64,
        opts: &CacheOptions,
        now: SystemTime,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let cachefile = self.path(relpath);
        let allowed = !opts.no_cache && (opts.use_cachefile || opts.simulation_mode);

        if allowed && cachefile.exists() {
            match file_age_at(&cachefile, now) {
                Ok(age) if age <= max_age || opts.simulation_mode => {
                    match fs::read(&cachefile) {
                        Ok(content) if !content.is_empty() => {
                            debug!("Using data from cachefile {}", cachefile.display());
                            return Ok(Some(content));
                        }
                        Ok(_) => debug!("Ignoring empty cache file {}", cachefile.display()),
                        Err(e) => debug!("Cannot read cache file {}: {}", cachefile.display(), e),
                    }
                }
                Ok(age) => debug!(
                    "Skipping cache file {}: Too old (age is {} sec, allowed is {} sec)",
                    cachefile.display(),
                    age,
                    max_age
                ),
                Err(e) => debug!("Cannot stat cache file {}: {}", cachefile.display(), e),
            }
        }

        if opts.simulation_mode && !opts.no_cache {
            return Err(FetchError::Agent(
                "Simulation mode and no cachefile present.".to_string(),
            ));
        }

        if opts.no_tcp {
            return Err(FetchError::Agent(
                "Host is unreachable, no usable cache file present".to_string(),
            ));
        }

        Ok(None)
    }

    /// Stores `content`. Skipped when running as root.
    pub fn write(&self, relpath: &str, content: &[u8]) -> Result<(), FetchError> {
        ensure_directory(&self.dir).map_err(|e| {
            FetchError::General(format!(
                "Cannot create directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        if i_am_root() {
            warn!("Not writing cache file {} as root", relpath);
            return Ok(());
        }

        let cachefile = self.path(relpath);
        write_atomic(&cachefile, content).map_err(|e| {
            FetchError::General(format!(
                "Cannot write cache file {}: {}",
                cachefile.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cached_opts() -> CacheOptions {
        CacheOptions {
            use_cachefile: true,
            ..CacheOptions::default()
        }
    }

    fn store_with_file(content: &str) -> (tempfile::TempDir, CacheStore, SystemTime) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::write(store.path("host1"), content).unwrap();
        let modified = fs::metadata(store.path("host1")).unwrap().modified().unwrap();
        (dir, store, modified)
    }

    #[test]
    fn test_cache_age_boundary() {
        let (_dir, store, modified) = store_with_file("<<<check_mk>>>\nVersion: 1.0\n");
        let opts = cached_opts();

        let at_limit = store
            .read_at("host1", 60, &opts, modified + Duration::from_secs(60))
            .unwrap();
        assert!(at_limit.is_some());

        let too_old = store
            .read_at("host1", 60, &opts, modified + Duration::from_secs(61))
            .unwrap();
        assert!(too_old.is_none());
    }

    #[test]
    fn test_simulation_mode_ignores_age() {
        let (_dir, store, modified) = store_with_file("payload");
        let opts = CacheOptions {
            simulation_mode: true,
            ..CacheOptions::default()
        };
        let content = store
            .read_at("host1", 0, &opts, modified + Duration::from_secs(3600))
            .unwrap();
        assert_eq!(content.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_simulation_mode_requires_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let opts = CacheOptions {
            simulation_mode: true,
            ..CacheOptions::default()
        };
        assert!(matches!(store.read("missing", 60, &opts), Err(FetchError::Agent(_))));
    }

    #[test]
    fn test_no_tcp_without_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let opts = CacheOptions {
            no_tcp: true,
            ..cached_opts()
        };
        let err = store.read("missing", 60, &opts).unwrap_err();
        assert_eq!(err.message(), "Host is unreachable, no usable cache file present");
    }

    #[test]
    fn test_cache_not_used_unless_enabled() {
        let (_dir, store, modified) = store_with_file("payload");
        let content = store
            .read_at("host1", 60, &CacheOptions::default(), modified)
            .unwrap();
        assert!(content.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"));
        store.write("host1.if", b"{\"table\":[]}").unwrap();
        if !i_am_root() {
            let content = store.read("host1.if", 60, &cached_opts()).unwrap();
            assert_eq!(content.as_deref(), Some(&b"{\"table\":[]}"[..]));
            assert!(store.age("host1.if").is_some());
        }
    }

    #[test]
    fn test_rewrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        if i_am_root() {
            return;
        }
        store.write("host1", b"<<<uptime>>>\n12345 678\n<<<df>>>\n/ 10\n").unwrap();
        store.write("host1", b"<<<uptime>>>\n1\n").unwrap();

        assert_eq!(fs::read(store.path("host1")).unwrap(), b"<<<uptime>>>\n1\n");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["host1".to_string()]);
    }
}
