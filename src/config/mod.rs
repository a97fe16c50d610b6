use crate::models::{CheckInstance, State};
use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use log::{debug, LevelFilter};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw agent payloads and SNMP tables.
    pub cache_dir: PathBuf,
    /// Persisted sections and counters.
    pub var_dir: PathBuf,
    /// Piggyback exchange.
    pub tmp_dir: PathBuf,
    pub command_pipe: PathBuf,
    pub check_result_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("var/cache"),
            var_dir: PathBuf::from("var"),
            tmp_dir: PathBuf::from("tmp"),
            command_pipe: PathBuf::from("tmp/run/nagios.cmd"),
            check_result_dir: PathBuf::from("tmp/check_results"),
        }
    }
}

impl PathsConfig {
    pub fn persisted_dir(&self) -> PathBuf {
        self.var_dir.join("persisted")
    }

    pub fn counters_dir(&self) -> PathBuf {
        self.var_dir.join("counters")
    }

    pub fn piggyback_dir(&self) -> PathBuf {
        self.tmp_dir.join("piggyback")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub port: u16,
    /// Seconds.
    pub tcp_connect_timeout: f64,
    pub check_max_cachefile_age: u64,
    pub cluster_max_cachefile_age: u64,
    pub piggyback_max_cachefile_age: u64,
    pub use_cachefile: bool,
    pub no_cache: bool,
    pub no_tcp: bool,
    pub simulation_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 6556,
            tcp_connect_timeout: 5.0,
            check_max_cachefile_age: 0,
            cluster_max_cachefile_age: 90,
            piggyback_max_cachefile_age: 3600,
            use_cachefile: false,
            no_cache: false,
            no_tcp: false,
            simulation_mode: false,
        }
    }
}

/// Host state used for the summary service in the various failure situations.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExitSpec {
    pub empty_output: i64,
    pub connection: i64,
    pub missing_sections: i64,
    pub wrong_version: i64,
    pub exception: i64,
}

impl Default for ExitSpec {
    fn default() -> Self {
        Self {
            empty_output: 2,
            connection: 2,
            missing_sections: 1,
            wrong_version: 1,
            exception: 3,
        }
    }
}

impl ExitSpec {
    pub fn state(code: i64) -> State {
        State::from_code(code).unwrap_or(State::Unknown)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CheckingConfig {
    /// Run checks without submitting or persisting anything.
    pub dont_submit: bool,
    /// Use persisted sections even after they expired.
    pub force: bool,
    /// Seconds for one host run. Unset means no deadline.
    pub timeout: Option<u64>,
    /// `multiline` or `singleline`.
    pub aggregation_output_format: String,
    /// `{}` is replaced by the host name.
    pub summary_hostname_format: String,
    pub aggregate_check_mk: bool,
    /// `pnp` appends the check command label to the perfdata.
    pub perfdata_format: String,
    pub agent_min_version: Option<String>,
    pub inactive_timeperiods: Vec<String>,
    pub exit_spec: ExitSpec,
}

impl Default for CheckingConfig {
    fn default() -> Self {
        Self {
            dont_submit: false,
            force: false,
            timeout: None,
            aggregation_output_format: "multiline".to_string(),
            summary_hostname_format: "{}-s".to_string(),
            aggregate_check_mk: false,
            perfdata_format: "pnp".to_string(),
            agent_min_version: None,
            inactive_timeperiods: Vec::new(),
            exit_spec: ExitSpec::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SubmissionConfig {
    /// `pipe` or `file`.
    pub mode: String,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            mode: "pipe".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    Disabled,
    Allow,
    Enforce,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EncryptionSettings {
    /// `disable`, `allow` or `enforce`.
    pub use_regular: String,
    pub passphrase: String,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            use_regular: "disable".to_string(),
            passphrase: String::new(),
        }
    }
}

impl EncryptionSettings {
    pub fn mode(&self) -> EncryptionMode {
        match self.use_regular.to_lowercase().as_str() {
            "enforce" => EncryptionMode::Enforce,
            "allow" | "optional" => EncryptionMode::Allow,
            _ => EncryptionMode::Disabled,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnmpCheckInterval {
    pub check_type: String,
    pub minutes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    /// Set for clusters.
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    /// Whether the host is queried by TCP agent or datasource program.
    #[serde(default = "default_true")]
    pub tcp: bool,
    #[serde(default)]
    pub datasource_program: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub snmp_community: Option<String>,
    #[serde(default)]
    pub snmp_check_intervals: Vec<SnmpCheckInterval>,
    #[serde(default)]
    pub aggregated: bool,
    #[serde(default)]
    pub management_address: Option<String>,
    #[serde(default)]
    pub management_protocol: Option<String>,
    #[serde(default)]
    pub expected_agent_version: Option<String>,
    #[serde(default)]
    pub checks: Vec<CheckInstance>,
}

impl HostConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: None,
            nodes: None,
            tcp: true,
            datasource_program: None,
            port: None,
            encryption: EncryptionSettings::default(),
            snmp_community: None,
            snmp_check_intervals: Vec::new(),
            aggregated: false,
            management_address: None,
            management_protocol: None,
            expected_agent_version: None,
            checks: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub checking: CheckingConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub piggyback_translation: Vec<HostRename>,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl AppConfig {
    pub fn new() -> Result<Self> {
        Self::from_file("hostcheck.toml")
    }

    pub fn get_log_level(&self) -> LevelFilter {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info, // Default to Info if invalid
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        debug!("Loading configuration from {}", config_path.display());

        let config = Config::builder()
            .add_source(File::from(config_path).format(FileFormat::Toml))
            .build()
            .context(format!("Failed to load config from {}", config_path.display()))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize config")?;

        Ok(app_config)
    }

    pub fn host(&self, hostname: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.name == hostname)
    }

    pub fn nodes_of(&self, hostname: &str) -> Option<&[String]> {
        self.host(hostname).and_then(|h| h.nodes.as_deref())
    }

    pub fn is_cluster(&self, hostname: &str) -> bool {
        self.nodes_of(hostname).is_some()
    }

    /// Clusters the host is a node of.
    pub fn clusters_of(&self, hostname: &str) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| {
                h.nodes
                    .as_ref()
                    .is_some_and(|nodes| nodes.iter().any(|n| n == hostname))
            })
            .map(|h| h.name.as_str())
            .collect()
    }

    /// Unknown hosts are agent hosts.
    pub fn is_tcp_host(&self, hostname: &str) -> bool {
        self.host(hostname).map(|h| h.tcp).unwrap_or(true)
    }

    pub fn address_of(&self, hostname: &str) -> Option<&str> {
        self.host(hostname).and_then(|h| h.address.as_deref())
    }

    pub fn agent_port_of(&self, hostname: &str) -> u16 {
        self.host(hostname)
            .and_then(|h| h.port)
            .unwrap_or(self.agent.port)
    }

    pub fn encryption_of(&self, hostname: &str) -> EncryptionSettings {
        self.host(hostname)
            .map(|h| h.encryption.clone())
            .unwrap_or_default()
    }

    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.agent.tcp_connect_timeout.max(0.0))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.checking.timeout.map(Duration::from_secs)
    }

    /// Command line of the datasource program with `<IP>` and `<HOST>` replaced.
    pub fn datasource_program_of(&self, hostname: &str, ipaddress: Option<&str>) -> Option<String> {
        let program = self.host(hostname)?.datasource_program.as_ref()?;
        Some(
            program
                .replace("<IP>", ipaddress.unwrap_or(""))
                .replace("<HOST>", hostname),
        )
    }

    pub fn snmp_community_of(&self, hostname: &str) -> String {
        self.host(hostname)
            .and_then(|h| h.snmp_community.clone())
            .unwrap_or_else(|| "public".to_string())
    }

    /// Minutes between two SNMP polls of the check type.
    pub fn snmp_check_interval_of(&self, hostname: &str, check_type: &str) -> Option<u64> {
        self.host(hostname)?
            .snmp_check_intervals
            .iter()
            .find(|i| i.check_type == check_type)
            .map(|i| i.minutes)
    }

    pub fn management_snmp_address(&self, hostname: &str) -> Option<&str> {
        let host = self.host(hostname)?;
        match host.management_protocol.as_deref() {
            Some("snmp") => host.management_address.as_deref(),
            _ => None,
        }
    }

    pub fn check_table_of(&self, hostname: &str) -> Vec<CheckInstance> {
        self.host(hostname)
            .map(|h| h.checks.clone())
            .unwrap_or_default()
    }

    pub fn host_is_aggregated(&self, hostname: &str) -> bool {
        self.host(hostname).is_some_and(|h| h.aggregated)
    }

    pub fn summary_hostname(&self, hostname: &str) -> String {
        self.checking.summary_hostname_format.replace("{}", hostname)
    }

    pub fn is_timeperiod_active(&self, period: &str) -> bool {
        !self
            .checking
            .inactive_timeperiods
            .iter()
            .any(|p| p == period)
    }

    /// Name under which piggyback data found in the output of `source`
    /// is filed. Spaces are not allowed in host names.
    pub fn translate_piggyback_host(&self, _source: &str, target: &str) -> String {
        let translated = self
            .piggyback_translation
            .iter()
            .find(|r| r.from == target)
            .map(|r| r.to.as_str())
            .unwrap_or(target);
        translated.replace(' ', "_")
    }
}
