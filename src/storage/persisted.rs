use crate::models::{CacheInfo, PersistedSection, Table};
use crate::utils::file::{remove_if_exists, write_atomic};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk shape of one persisted section. Old files carry no start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full(i64, i64, Table),
    Legacy(i64, Table),
}

impl From<&PersistedSection> for StoredEntry {
    fn from(section: &PersistedSection) -> Self {
        StoredEntry::Full(section.cached_at, section.until, section.rows.clone())
    }
}

/// Sections that outlive a single agent output, one file per host.
#[derive(Debug, Clone)]
pub struct PersistedStore {
    dir: PathBuf,
}

impl PersistedStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, hostname: &str) -> PathBuf {
        self.dir.join(hostname)
    }

    /// Unreadable or malformed files count as empty.
    fn load(&self, hostname: &str) -> IndexMap<String, StoredEntry> {
        let path = self.path(hostname);
        let Ok(content) = fs::read_to_string(&path) else {
            return IndexMap::new();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            debug!("Ignoring malformed persisted file {}: {}", path.display(), e);
            IndexMap::new()
        })
    }

    fn save(&self, hostname: &str, entries: &IndexMap<String, StoredEntry>) -> Result<()> {
        let path = self.path(hostname);
        let content = serde_json::to_vec(entries)?;
        write_atomic(&path, &content)
            .with_context(|| format!("Cannot write persisted sections to {}", path.display()))
    }

    /// Merges freshly persisted sections into the host's file.
    pub fn store(&self, hostname: &str, persisted: &IndexMap<String, PersistedSection>) -> Result<()> {
        if persisted.is_empty() {
            return Ok(());
        }
        let mut entries = self.load(hostname);
        for (name, section) in persisted {
            entries.insert(name.clone(), StoredEntry::from(section));
        }
        self.save(hostname, &entries)?;
        debug!(
            "Persisted sections {}",
            persisted.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }

    /// Adds persisted sections missing from `sections`, drops expired ones
    /// from disk and records their cache info.
    pub fn add_persisted(
        &self,
        hostname: &str,
        sections: &mut IndexMap<String, Table>,
        cache_info: &mut IndexMap<String, CacheInfo>,
        now: i64,
        force: bool,
    ) {
        let mut entries = self.load(hostname);
        if entries.is_empty() {
            return;
        }

        let mut modified = false;
        entries.retain(|name, entry| {
            let (from, until, rows) = match entry {
                StoredEntry::Full(from, until, rows) => (Some(*from), *until, rows),
                StoredEntry::Legacy(until, rows) => (None, *until, rows),
            };

            if now < until || force {
                if let Some(from) = from {
                    cache_info.insert(name.clone(), CacheInfo::new(from, until - from));
                }
                if !sections.contains_key(name) {
                    sections.insert(name.clone(), rows.clone());
                    debug!("Added persisted section {}", name);
                }
                true
            } else {
                debug!(
                    "Persisted section {} is outdated by {} seconds. Deleting it.",
                    name,
                    now - until
                );
                modified = true;
                false
            }
        });

        let result = if entries.is_empty() {
            remove_if_exists(&self.path(hostname)).map_err(anyhow::Error::from)
        } else if modified {
            self.save(hostname, &entries)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!("Cannot update persisted sections of {}: {:#}", hostname, e);
        }
    }
}
