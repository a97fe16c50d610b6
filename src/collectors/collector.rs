use crate::checks::CheckRegistry;
use crate::collectors::parser::parse_info;
use crate::collectors::program::fetch_program;
use crate::collectors::snmp::{get_snmp_info, SnmpTarget, SnmpWalker};
use crate::collectors::tcp::fetch_tcp;
use crate::config::AppConfig;
use crate::context::{with_deadline, AgentContact, RunContext};
use crate::error::FetchError;
use crate::models::{Info, SectionData, SectionInfo};
use crate::storage::{CacheStore, PersistedStore, PiggybackStore};
use crate::utils::file::unix_now;
use indexmap::IndexMap;
use log::{debug, warn};
use std::time::Instant;

/// Agent payloads shorter than this cannot be valid.
const MIN_AGENT_OUTPUT: usize = 16;

/// Decides where the data of a section comes from and fetches it: the
/// run's in-memory cache, SNMP, a datasource program or the TCP agent,
/// plus piggyback data of other hosts and persisted sections.
pub struct Collector<'a> {
    config: &'a AppConfig,
    registry: &'a CheckRegistry,
    snmp: &'a dyn SnmpWalker,
    cache: CacheStore,
    persisted: PersistedStore,
    piggyback: PiggybackStore,
}

impl<'a> Collector<'a> {
    pub fn new(config: &'a AppConfig, registry: &'a CheckRegistry, snmp: &'a dyn SnmpWalker) -> Self {
        Self {
            config,
            registry,
            snmp,
            cache: CacheStore::new(&config.paths.cache_dir),
            persisted: PersistedStore::new(config.paths.persisted_dir()),
            piggyback: PiggybackStore::new(
                config.paths.piggyback_dir(),
                config.agent.piggyback_max_cachefile_age,
            ),
        }
    }

    fn apply_parse_function(&self, section: &str, data: SectionData) -> Result<Info, String> {
        match self.registry.parse_function(section) {
            Some(parse_fn) => parse_fn(&data)
                .map(Info::Parsed)
                .map_err(|e| format!("{:#}", e)),
            None => Ok(Info::Data(data)),
        }
    }

    /// Section data as handed to a check: parsed, and bundled with the
    /// plugin's extra sections. A failing extra section is passed as `None`.
    pub async fn get_info_for_check(
        &self,
        ctx: &mut RunContext,
        hostname: &str,
        ipaddress: Option<&str>,
        section: &str,
    ) -> Result<SectionInfo, FetchError> {
        let Some(data) = self
            .get_host_info(ctx, hostname, ipaddress, section, None, false)
            .await?
        else {
            return Ok(SectionInfo::Missing);
        };
        let info = match self.apply_parse_function(section, data) {
            Ok(info) => info,
            Err(msg) => return Ok(SectionInfo::ParseFailed(msg)),
        };

        let extra_sections = self.registry.extra_sections(section);
        if extra_sections.is_empty() {
            return Ok(SectionInfo::Available(info));
        }

        let mut bundle = vec![Some(info)];
        for extra in extra_sections {
            let extra_info = match self
                .get_host_info(ctx, hostname, ipaddress, extra, None, false)
                .await
            {
                Ok(Some(data)) => self.apply_parse_function(extra, data).ok(),
                Ok(None) => None,
                Err(FetchError::Timeout) => return Err(FetchError::Timeout),
                Err(e) => {
                    debug!("Extra section {} not available: {}", extra, e);
                    None
                }
            };
            bundle.push(extra_info);
        }
        Ok(SectionInfo::Available(Info::Bundle(bundle)))
    }

    /// Raw section data of a host or, for clusters, of all its nodes.
    ///
    /// `Ok(None)` means the host has no data source at all.
    pub async fn get_host_info(
        &self,
        ctx: &mut RunContext,
        hostname: &str,
        ipaddress: Option<&str>,
        section: &str,
        max_cache_age: Option<u64>,
        ignore_check_interval: bool,
    ) -> Result<Option<SectionData>, FetchError> {
        let node_info = self.registry.has_node_info(section);

        let Some(nodes) = self.config.nodes_of(hostname) else {
            let max_age = max_cache_age.unwrap_or(self.config.agent.check_max_cachefile_age);
            let info = self
                .get_realhost_info(ctx, hostname, ipaddress, section, max_age, ignore_check_interval)
                .await?;
            if !node_info {
                return Ok(info);
            }
            let tag = if self.config.clusters_of(hostname).is_empty() {
                None
            } else {
                Some(hostname)
            };
            return Ok(info.map(|data| data.with_node(tag)));
        };

        // Clusters always read the cache files of their nodes.
        ctx.cache_opts.use_cachefile = true;
        let max_age = max_cache_age.unwrap_or(self.config.agent.cluster_max_cachefile_age);

        let mut merged: Option<SectionData> = None;
        let mut at_least_one_without_exception = false;
        let mut exception_texts = Vec::new();
        let mut is_snmp_error = false;

        for node in nodes {
            let node_ip = self.lookup_ip_address(node).await;
            // The SNMP check interval is ignored: clusters read the
            // cache files their nodes have written.
            match self
                .get_realhost_info(ctx, node, node_ip.as_deref(), section, max_age, true)
                .await
            {
                Ok(Some(data)) => {
                    let data = if node_info {
                        data.with_node(Some(node))
                    } else {
                        data
                    };
                    match merged.as_mut() {
                        Some(all) => all.extend(data),
                        None => merged = Some(data),
                    }
                    at_least_one_without_exception = true;
                }
                Ok(None) | Err(FetchError::Skip) => at_least_one_without_exception = true,
                Err(FetchError::Agent(msg)) => {
                    if !msg.is_empty() {
                        exception_texts.push(msg);
                    }
                    ctx.broken_agent_hosts.insert(node.clone());
                }
                Err(FetchError::Snmp(msg)) => {
                    if !msg.is_empty() {
                        exception_texts.push(msg);
                    }
                    ctx.broken_snmp_hosts.insert(node.clone());
                    is_snmp_error = true;
                }
                Err(e) => return Err(e),
            }
        }

        if !at_least_one_without_exception {
            let text = exception_texts.join(", ");
            return Err(if is_snmp_error {
                FetchError::Snmp(text)
            } else {
                FetchError::Agent(text)
            });
        }
        Ok(Some(merged.unwrap_or_else(SectionData::empty)))
    }

    async fn lookup_ip_address(&self, hostname: &str) -> Option<String> {
        if let Some(address) = self.config.address_of(hostname) {
            return Some(address.to_string());
        }
        match tokio::net::lookup_host((hostname, 0)).await {
            Ok(mut addrs) => addrs.next().map(|a| a.ip().to_string()),
            Err(e) => {
                debug!("Cannot resolve {}: {}", hostname, e);
                None
            }
        }
    }

    /// Data of a real host (not a cluster) for one section.
    ///
    /// The agent is contacted at most once per run. Its whole output lands
    /// in the run's info cache, later sections are answered from there.
    async fn get_realhost_info(
        &self,
        ctx: &mut RunContext,
        hostname: &str,
        ipaddress: Option<&str>,
        section: &str,
        max_cache_age: u64,
        ignore_check_interval: bool,
    ) -> Result<Option<SectionData>, FetchError> {
        if let Some(data) = ctx.info_cache.get(hostname, section) {
            return Ok(Some(data.clone()));
        }

        if self.registry.snmp_info(section).is_some() {
            return self
                .get_snmp_section(ctx, hostname, ipaddress, section, max_cache_age, ignore_check_interval)
                .await;
        }

        // Agent data is not available for SNMP-only hosts, but piggyback
        // data may still be.
        match ctx.agent_contact(hostname) {
            Some(AgentContact::Failed) => return Err(FetchError::Agent(String::new())),
            Some(AgentContact::Succeeded) => return Ok(Some(SectionData::empty())),
            None => {}
        }
        ctx.set_agent_contact(hostname, AgentContact::Failed);

        let mut piggy_output = self.piggyback.get(hostname);
        if let Some(ip) = ipaddress.filter(|ip| *ip != hostname) {
            piggy_output.extend(self.piggyback.get(ip));
        }

        let is_tcp_host = self.config.is_tcp_host(hostname);
        let mut output = Vec::new();
        let mut agent_failed: Option<FetchError> = None;
        if is_tcp_host {
            match self.get_agent_info(ctx, hostname, ipaddress, max_cache_age).await {
                Ok(agent_output) => output = agent_output,
                Err(FetchError::Timeout) => return Err(FetchError::Timeout),
                Err(e) => {
                    // The host was not reached, data it delivered for other
                    // hosts last time is not valid anymore.
                    if let Err(remove_err) = self.piggyback.remove_from(hostname) {
                        warn!("Cannot remove piggyback data of {}: {}", hostname, remove_err);
                    }
                    if piggy_output.is_empty() {
                        return Err(e);
                    }
                    agent_failed = Some(e);
                }
            }
        }

        output.extend(piggy_output);

        if output.is_empty() {
            if is_tcp_host {
                return Err(FetchError::Agent("Empty output from agent".to_string()));
            }
            return Ok(None);
        }
        if output.len() < MIN_AGENT_OUTPUT {
            return Err(FetchError::Agent(format!(
                "Too short output from agent: '{}'",
                String::from_utf8_lossy(&output)
            )));
        }

        let now = unix_now();
        let parsed = parse_info(
            &output,
            hostname,
            |target| self.config.translate_piggyback_host(hostname, target),
            now,
        );

        let cache_info = ctx.agent_cache_info_mut(hostname);
        cache_info.extend(parsed.cache_info);
        if let Err(e) = self.piggyback.store(hostname, &parsed.piggybacked) {
            warn!("Cannot store piggyback data of {}: {}", hostname, e);
        }
        if let Err(e) = self.persisted.store(hostname, &parsed.persisted) {
            warn!("{:#}", e);
        }

        // Sections of earlier outputs that are still valid fill the gaps.
        let mut sections = parsed.sections;
        self.persisted.add_persisted(
            hostname,
            &mut sections,
            ctx.agent_cache_info_mut(hostname),
            now,
            self.config.checking.force,
        );

        let requested = sections.get(section).cloned();
        ctx.info_cache.store(
            hostname,
            sections
                .into_iter()
                .map(|(name, rows)| (name, SectionData::Table(rows)))
                .collect(),
        );

        if agent_failed.is_none() {
            ctx.set_agent_contact(hostname, AgentContact::Succeeded);
        }

        match (requested, agent_failed) {
            (Some(rows), _) => Ok(Some(SectionData::Table(rows))),
            (None, Some(e)) => Err(FetchError::Agent(format!(
                "Cannot get information from agent ({}), processing only piggyback data.",
                e
            ))),
            (None, None) => Ok(Some(SectionData::empty())),
        }
    }

    async fn get_snmp_section(
        &self,
        ctx: &mut RunContext,
        hostname: &str,
        ipaddress: Option<&str>,
        check_type: &str,
        max_cache_age: u64,
        ignore_check_interval: bool,
    ) -> Result<Option<SectionData>, FetchError> {
        let Some(snmp_info) = self.registry.snmp_info(check_type) else {
            return Ok(None);
        };
        let cache_relpath = format!("{}.{}", hostname, check_type);
        let dont_submit = self.config.checking.dont_submit;

        // An SNMP check only runs every `interval` minutes.
        if let Some(interval) = self.config.snmp_check_interval_of(hostname, check_type) {
            if !ignore_check_interval && !dont_submit {
                if let Some(age) = self.cache.age(&cache_relpath) {
                    if age < interval * 60 {
                        debug!(
                            "Skipping {} on {}: cache file is only {} sec old",
                            check_type, hostname, age
                        );
                        return Err(FetchError::Skip);
                    }
                }
            }
        }

        match self.cache.read(&cache_relpath, max_cache_age, &ctx.cache_opts) {
            Ok(Some(content)) => match serde_json::from_slice::<SectionData>(&content) {
                Ok(data) => {
                    ctx.info_cache.store_section(hostname, check_type, data.clone());
                    return Ok(Some(data));
                }
                Err(e) => debug!("Ignoring unparsable cache file {}: {}", cache_relpath, e),
            },
            Ok(None) => {}
            // Missing SNMP cache files are no error in simulation mode.
            Err(_) if ctx.cache_opts.simulation_mode && !ctx.cache_opts.no_cache => return Ok(None),
            Err(e) => return Err(e),
        }

        if ctx.broken_snmp_hosts.contains(hostname) {
            return Err(FetchError::Snmp(String::new()));
        }

        let Some(ipaddress) = ipaddress else {
            return Err(FetchError::Snmp(format!(
                "Cannot contact SNMP host '{}': no IP address",
                hostname
            )));
        };
        let target = SnmpTarget {
            hostname: hostname.to_string(),
            ipaddress: ipaddress.to_string(),
            community: self.config.snmp_community_of(hostname),
        };

        let start = Instant::now();
        let data = match with_deadline(ctx.deadline, get_snmp_info(self.snmp, &target, snmp_info)).await {
            Ok(data) => data,
            Err(FetchError::Snmp(msg)) => {
                ctx.broken_snmp_hosts.insert(hostname.to_string());
                return Err(FetchError::Snmp(msg));
            }
            Err(e) => return Err(e),
        };
        debug!("get_snmp_section {} took: {} ms", check_type, start.elapsed().as_millis());

        ctx.info_cache.store_section(hostname, check_type, data.clone());
        if !dont_submit {
            let mut content = serde_json::to_vec(&data)
                .map_err(|e| FetchError::General(format!("Cannot serialize SNMP data: {}", e)))?;
            content.push(b'\n');
            self.cache.write(&cache_relpath, &content)?;
        }
        Ok(Some(data))
    }

    /// Raw output of the host's agent, from the cache file if it is fresh
    /// enough, otherwise from the datasource program or the TCP agent.
    pub async fn get_agent_info(
        &self,
        ctx: &mut RunContext,
        hostname: &str,
        ipaddress: Option<&str>,
        max_cache_age: u64,
    ) -> Result<Vec<u8>, FetchError> {
        if matches!(ipaddress, Some("0.0.0.0") | Some("::")) {
            return Err(FetchError::Agent(
                "Failed to lookup IP address and no explicit IP address configured".to_string(),
            ));
        }

        if let Some(output) = self.cache.read(hostname, max_cache_age, &ctx.cache_opts)? {
            return Ok(output);
        }

        // Try to contact every host only once
        if ctx.broken_agent_hosts.contains(hostname) {
            return Err(FetchError::Agent(String::new()));
        }

        let output = match self.config.datasource_program_of(hostname, ipaddress) {
            Some(commandline) => fetch_program(&commandline, ctx.deadline).await?,
            None => {
                let Some(ipaddress) = ipaddress else {
                    return Err(FetchError::General(format!(
                        "Cannot contact agent: host '{}' has no IP address.",
                        hostname
                    )));
                };
                let encryption = self.config.encryption_of(hostname);
                with_deadline(
                    ctx.deadline,
                    fetch_tcp(
                        ipaddress,
                        self.config.agent_port_of(hostname),
                        self.config.tcp_connect_timeout(),
                        &encryption,
                    ),
                )
                .await?
            }
        };

        self.cache.write(hostname, &output)?;
        Ok(output)
    }
}
