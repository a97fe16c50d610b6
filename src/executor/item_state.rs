use crate::error::CheckError;
use crate::utils::file::write_atomic;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// What `counter_rate` does when no rate can be computed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnWrap {
    /// Fail the check immediately: its result is pending.
    Raise,
    /// Return 0 and make the result pending after the check has finished,
    /// so that all counters of the check get initialized in one cycle.
    Skip,
    /// Return 0.
    Zero,
}

/// Counter values of one host that survive between runs.
#[derive(Debug, Default)]
pub struct ItemState {
    path: Option<PathBuf>,
    counters: IndexMap<String, (f64, f64)>,
    prefix: String,
    wrapped: Vec<String>,
}

impl ItemState {
    /// Loads the counters of `hostname`. Missing or broken files start empty.
    pub fn load(dir: &Path, hostname: &str) -> Self {
        let path = dir.join(hostname);
        let counters = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                debug!("Ignoring broken counter file {}: {}", path.display(), e);
                IndexMap::new()
            }),
            Err(_) => IndexMap::new(),
        };
        Self {
            path: Some(path),
            counters,
            ..Self::default()
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_vec(&self.counters)?;
        write_atomic(path, &content)
            .with_context(|| format!("Cannot save counters to {}", path.display()))
    }

    /// Scopes following counters to one check instance.
    pub fn set_prefix(&mut self, check_type: &str, item: Option<&str>) {
        self.prefix = format!("{}.{}.", check_type, item.unwrap_or("None"));
    }

    pub fn reset_wrapped(&mut self) {
        self.wrapped.clear();
    }

    /// Message of the first counter deferred with `OnWrap::Skip`, if any.
    pub fn take_wrapped(&mut self) -> Option<String> {
        let first = self.wrapped.first().cloned();
        self.wrapped.clear();
        first
    }

    /// Per-second rate of a monotonically increasing counter.
    pub fn counter_rate(
        &mut self,
        name: &str,
        now: f64,
        value: f64,
        on_wrap: OnWrap,
    ) -> Result<f64, CheckError> {
        let key = format!("{}{}", self.prefix, name);
        let previous = self.counters.insert(key.clone(), (now, value));

        let problem = match previous {
            None => Some(format!("Initialized: {}", key)),
            Some((then, _)) if now <= then => Some(format!("No time difference: {}", key)),
            Some((_, last)) if value < last => Some(format!("Value overflow: {}", key)),
            Some((then, last)) => return Ok((value - last) / (now - then)),
        };

        match (problem, on_wrap) {
            (Some(msg), OnWrap::Raise) => Err(CheckError::CounterWrapped(msg)),
            (Some(msg), OnWrap::Skip) => {
                self.wrapped.push(msg);
                Ok(0.0)
            }
            _ => Ok(0.0),
        }
    }
}
