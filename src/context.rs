use crate::client::aggregate::AggregateBuckets;
use crate::config::AppConfig;
use crate::error::FetchError;
use crate::models::{CacheInfo, SectionData};
use crate::storage::CacheOptions;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tokio::time::Instant;

/// Sections already fetched during this run, per host.
#[derive(Debug, Default)]
pub struct HostInfoCache {
    hosts: HashMap<String, IndexMap<String, SectionData>>,
}

impl HostInfoCache {
    pub fn get(&self, hostname: &str, section: &str) -> Option<&SectionData> {
        self.hosts.get(hostname)?.get(section)
    }

    /// Merges `sections` into what is known about the host.
    pub fn store(&mut self, hostname: &str, sections: IndexMap<String, SectionData>) {
        self.hosts
            .entry(hostname.to_string())
            .or_default()
            .extend(sections);
    }

    pub fn store_section(&mut self, hostname: &str, section: &str, data: SectionData) {
        self.hosts
            .entry(hostname.to_string())
            .or_default()
            .insert(section.to_string(), data);
    }
}

/// Outcome of the one agent contact allowed per host and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentContact {
    Succeeded,
    Failed,
}

/// State of one check run. Created by the driver and dropped at its end.
#[derive(Debug)]
pub struct RunContext {
    pub cache_opts: CacheOptions,
    pub deadline: Option<Instant>,
    pub info_cache: HostInfoCache,
    pub broken_agent_hosts: HashSet<String>,
    pub broken_snmp_hosts: HashSet<String>,
    pub aggregates: AggregateBuckets,
    agent_cache_info: HashMap<String, IndexMap<String, CacheInfo>>,
    agent_contacts: HashMap<String, AgentContact>,
}

impl RunContext {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            cache_opts: CacheOptions {
                use_cachefile: config.agent.use_cachefile,
                no_cache: config.agent.no_cache,
                no_tcp: config.agent.no_tcp,
                simulation_mode: config.agent.simulation_mode,
            },
            deadline: config.timeout().map(|t| Instant::now() + t),
            info_cache: HostInfoCache::default(),
            broken_agent_hosts: HashSet::new(),
            broken_snmp_hosts: HashSet::new(),
            aggregates: AggregateBuckets::new(&config.checking.aggregation_output_format),
            agent_cache_info: HashMap::new(),
            agent_contacts: HashMap::new(),
        }
    }

    pub fn agent_contact(&self, hostname: &str) -> Option<AgentContact> {
        self.agent_contacts.get(hostname).copied()
    }

    pub fn set_agent_contact(&mut self, hostname: &str, contact: AgentContact) {
        self.agent_contacts.insert(hostname.to_string(), contact);
    }

    pub fn agent_cache_info_mut(&mut self, hostname: &str) -> &mut IndexMap<String, CacheInfo> {
        self.agent_cache_info
            .entry(hostname.to_string())
            .or_default()
    }

    /// Oldest timestamp and widest interval of `section` over all hosts that
    /// contributed to this run (cluster nodes included).
    pub fn cache_info_for(&self, section: &str) -> Option<CacheInfo> {
        self.agent_cache_info
            .values()
            .filter_map(|sections| sections.get(section).copied())
            .reduce(CacheInfo::merge)
    }
}

/// Runs `fut` until the run's deadline, if there is one.
pub async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| FetchError::Timeout)?,
        None => fut.await,
    }
}
