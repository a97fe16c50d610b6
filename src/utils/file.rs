use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

/// Creates `path` and its parents. Never fails because another process
/// created the directory concurrently; only fails if it is still missing.
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(_) if path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Age of the file in seconds relative to `now`. Files from the future are
/// zero seconds old.
pub fn file_age_at(path: &Path, now: SystemTime) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(now
        .duration_since(modified)
        .map(|age| age.as_secs())
        .unwrap_or(0))
}

/// Writes `contents` to a temporary sibling and renames it over `path`, so
/// readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_directory(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Cache files written by root would not be readable by the regular core user.
pub fn i_am_root() -> bool {
    nix::unistd::geteuid().is_root()
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
