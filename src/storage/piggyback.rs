use crate::utils::file::{file_age_at, remove_if_exists, write_atomic};
use indexmap::IndexMap;
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Host names come from agent output. Only names that are a single plain
/// path component may become directory or file names.
fn is_valid_host_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains(['/', '\0'])
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

/// Exchange directory for data one host's agent delivers for other hosts.
///
/// Layout: `<dir>/<target>/<source>`, one file per pair.
#[derive(Debug, Clone)]
pub struct PiggybackStore {
    dir: PathBuf,
    max_age: u64,
}

impl PiggybackStore {
    pub fn new<P: AsRef<Path>>(dir: P, max_age: u64) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_age,
        }
    }

    /// Concatenated piggyback payload for `target`. Outdated files are deleted.
    pub fn get(&self, target: &str) -> Vec<u8> {
        self.get_at(target, SystemTime::now())
    }

    pub fn get_at(&self, target: &str, now: SystemTime) -> Vec<u8> {
        let mut output = Vec::new();
        if !is_valid_host_name(target) {
            return output;
        }
        let target_dir = self.dir.join(target);
        let Ok(entries) = fs::read_dir(&target_dir) else {
            return output;
        };

        let mut sources: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'))
            })
            .collect();
        sources.sort();

        for path in sources {
            match file_age_at(&path, now) {
                Ok(age) if age > self.max_age => {
                    debug!(
                        "Piggyback file {} is outdated by {} seconds. Deleting it.",
                        path.display(),
                        age - self.max_age
                    );
                    if let Err(e) = remove_if_exists(&path) {
                        warn!("Cannot delete {}: {}", path.display(), e);
                    }
                }
                Ok(_) => match fs::read(&path) {
                    Ok(content) => {
                        debug!("Using piggyback data from {}", path.display());
                        output.extend_from_slice(&content);
                    }
                    Err(e) => debug!("Cannot read piggyback file {}: {}", path.display(), e),
                },
                Err(e) => debug!("Cannot stat piggyback file {}: {}", path.display(), e),
            }
        }
        output
    }

    /// Stores the lines `source` delivered for each target and drops files
    /// of `source` for targets it no longer reports.
    pub fn store(&self, source: &str, piggybacked: &IndexMap<String, Vec<Vec<u8>>>) -> io::Result<()> {
        if !is_valid_host_name(source) {
            warn!("Not storing piggyback data of invalid host name {:?}", source);
            return Ok(());
        }
        for (target, lines) in piggybacked {
            if !is_valid_host_name(target) {
                warn!("Ignoring piggyback data from {} for invalid host name {:?}", source, target);
                continue;
            }
            let mut content = lines.join(&b'\n');
            content.push(b'\n');
            write_atomic(&self.dir.join(target).join(source), &content)?;
        }
        self.remove_stale(source, |target| piggybacked.contains_key(target))
    }

    /// Drops every file `source` has written.
    pub fn remove_from(&self, source: &str) -> io::Result<()> {
        if !is_valid_host_name(source) {
            return Ok(());
        }
        self.remove_stale(source, |_| false)
    }

    fn remove_stale<F: Fn(&str) -> bool>(&self, source: &str, keep: F) -> io::Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let target = entry.file_name().to_string_lossy().into_owned();
            if keep(&target) {
                continue;
            }
            remove_if_exists(&entry.path().join(source))?;
        }
        Ok(())
    }
}
