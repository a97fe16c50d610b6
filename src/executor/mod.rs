//! Check Executor: runs every check of a host against the data the
//! collector delivers and condenses the run into the host summary.

pub mod item_state;

use crate::checks::CheckRegistry;
use crate::client::submit::Submitter;
use crate::collectors::collector::Collector;
use crate::collectors::snmp::SnmpWalker;
use crate::config::{AppConfig, ExitSpec};
use crate::context::RunContext;
use crate::error::{CheckError, FetchError, SubmitError};
use crate::models::{CheckInstance, CheckOutcome, CheckResult, Info, SectionInfo, State};
use item_state::ItemState;
use log::{debug, info, warn};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

/// State and text of the host's own service.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSummary {
    pub state: State,
    pub output: String,
}

/// What became of a single check call.
enum Verdict {
    Submit(CheckResult),
    /// A counter had no usable history. Nothing is submitted this cycle.
    Pending(String),
}

#[derive(Debug, Default)]
struct RunStats {
    num_success: usize,
    error_sections: BTreeSet<String>,
    problems: Vec<String>,
}

impl RunStats {
    fn add_problem(&mut self, message: String) {
        if !message.is_empty() && !self.problems.contains(&message) {
            self.problems.push(message);
        }
    }
}

struct HostRun<'a> {
    config: &'a AppConfig,
    registry: &'a CheckRegistry,
    collector: Collector<'a>,
    hostname: &'a str,
    only_check_types: Option<&'a [String]>,
    item_state: ItemState,
    parsed_infos: HashMap<String, SectionInfo>,
    stats: RunStats,
}

/// Runs all checks of `hostname`, submits their results and returns the
/// summary of the run.
#[allow(clippy::too_many_arguments)]
pub async fn run_host(
    config: &AppConfig,
    registry: &CheckRegistry,
    snmp: &dyn SnmpWalker,
    ctx: &mut RunContext,
    submitter: &mut Submitter,
    hostname: &str,
    ipaddress: Option<&str>,
    only_check_types: Option<&[String]>,
) -> HostSummary {
    let start = Instant::now();
    let mut run = HostRun {
        config,
        registry,
        collector: Collector::new(config, registry, snmp),
        hostname,
        only_check_types,
        item_state: ItemState::load(&config.paths.counters_dir(), hostname),
        parsed_infos: HashMap::new(),
        stats: RunStats::default(),
    };

    let outcome = run.execute_all(ctx, submitter, ipaddress).await;

    let (state, mut output) = match outcome {
        Ok(agent_version) => {
            if !config.checking.dont_submit {
                if let Err(e) = run.item_state.save() {
                    warn!("{:#}", e);
                }
            }
            summarize(config, hostname, &run.stats, agent_version.as_deref())
        }
        Err(e) => (
            ExitSpec::state(config.checking.exit_spec.exception),
            format!("{}, ", e),
        ),
    };

    if config.checking.aggregate_check_mk
        && config.host_is_aggregated(hostname)
        && !config.checking.dont_submit
    {
        let summary_host = config.summary_hostname(hostname);
        if let Err(e) = submitter.submit_to_core(&summary_host, "Check_MK", state, &output, None) {
            warn!("Cannot submit aggregated summary of {}: {}", hostname, e);
        }
    }

    if let Err(e) = submitter.finish() {
        warn!("{}", e);
    }

    let run_time = start.elapsed().as_secs_f64();
    output.push_str(&format!(
        "execution time {:.1} sec|execution_time={:.3}",
        run_time, run_time
    ));
    HostSummary { state, output }
}

impl<'a> HostRun<'a> {
    /// Executes the check table and flushes the aggregations. Returns the
    /// agent version.
    async fn execute_all(
        &mut self,
        ctx: &mut RunContext,
        submitter: &mut Submitter,
        ipaddress: Option<&str>,
    ) -> Result<Option<String>, SubmitError> {
        let management_address = self.config.management_snmp_address(self.hostname);

        for check in self.config.check_table_of(self.hostname) {
            // SNMP checks go to the management board if it speaks SNMP.
            let address = match management_address {
                Some(address) if self.registry.is_snmp_check(&check.check_type) => Some(address),
                _ => ipaddress,
            };
            if self.execute_check(ctx, submitter, &check, address).await? {
                self.stats.num_success += 1;
            }
        }

        self.submit_aggregated_results(ctx, submitter)?;
        Ok(self.agent_version(ctx, ipaddress).await)
    }

    /// Returns true if the check got its data and ran.
    async fn execute_check(
        &mut self,
        ctx: &mut RunContext,
        submitter: &mut Submitter,
        check: &CheckInstance,
        ipaddress: Option<&str>,
    ) -> Result<bool, SubmitError> {
        if let Some(only) = self.only_check_types {
            if !only.contains(&check.check_type) {
                return Ok(false);
            }
        }

        if let Some(period) = &check.period {
            if !self.config.is_timeperiod_active(period) {
                info!(
                    "Skipping service {}: currently not in timeperiod {}.",
                    check.description, period
                );
                return Ok(false);
            }
        }

        let section = check.section_name();
        if !self.parsed_infos.contains_key(section) {
            let fetched = self
                .collector
                .get_info_for_check(ctx, self.hostname, ipaddress, section)
                .await;
            match fetched {
                Ok(info) => {
                    self.parsed_infos.insert(section.to_string(), info);
                }
                Err(FetchError::Skip) => return Ok(false),
                Err(e) => {
                    self.record_fetch_error(ctx, section, e);
                    return Ok(false);
                }
            }
        }

        let is_snmp = self.registry.is_snmp_check(&check.check_type);
        let section_info = match self.parsed_infos.get(section) {
            Some(SectionInfo::Available(Info::Parsed(serde_json::Value::Null)))
            | Some(SectionInfo::Missing)
            | None => {
                self.stats.error_sections.insert(section.to_string());
                return Ok(false);
            }
            // No SNMP response at all, unless the check copes with that.
            Some(SectionInfo::Available(info))
                if info.is_empty()
                    && is_snmp
                    && !self.registry.handles_empty_info(&check.check_type) =>
            {
                self.stats.error_sections.insert(section.to_string());
                return Ok(false);
            }
            Some(section_info) => section_info,
        };

        let verdict = match self.registry.check_function(&check.check_type) {
            None => Verdict::Submit(CheckResult::unimplemented()),
            Some(check_fn) => {
                self.item_state
                    .set_prefix(&check.check_type, check.item.as_deref());
                self.item_state.reset_wrapped();
                let called = match section_info {
                    SectionInfo::ParseFailed(msg) => Ok(Err(CheckError::Failed(anyhow::anyhow!(
                        "Parse function failed: {}",
                        msg
                    )))),
                    SectionInfo::Available(info) => {
                        let item_state = &mut self.item_state;
                        catch_unwind(AssertUnwindSafe(|| {
                            check_fn(check.item.as_deref(), &check.params, info, item_state)
                        }))
                    }
                    SectionInfo::Missing => Ok(Err(CheckError::Failed(anyhow::anyhow!(
                        "Section {} is missing",
                        section
                    )))),
                };
                classify(called, check, is_snmp, &mut self.item_state)
            }
        };

        let result = match verdict {
            Verdict::Submit(result) => result,
            Verdict::Pending(msg) => {
                info!(
                    "{:<20} PEND - Cannot compute check result: {}",
                    check.description, msg
                );
                return Ok(true);
            }
        };

        let aggregation = if self.config.host_is_aggregated(self.hostname) {
            check.aggregation.as_deref()
        } else {
            None
        };
        let cache_info = ctx.cache_info_for(section);
        submitter.submit_check_result(
            &mut ctx.aggregates,
            self.hostname,
            &check.description,
            result,
            aggregation,
            cache_info,
        )?;
        Ok(true)
    }

    fn record_fetch_error(&mut self, ctx: &mut RunContext, section: &str, error: FetchError) {
        match &error {
            FetchError::Snmp(_) => {
                ctx.broken_snmp_hosts.insert(self.hostname.to_string());
            }
            FetchError::Agent(_) => {
                ctx.broken_agent_hosts.insert(self.hostname.to_string());
            }
            FetchError::Timeout => {
                warn!("Timeout while fetching section {} of {}", section, self.hostname)
            }
            FetchError::General(_) | FetchError::Skip => {}
        }
        self.stats.add_problem(error.message());
        self.stats.error_sections.insert(section.to_string());
    }

    fn submit_aggregated_results(
        &mut self,
        ctx: &mut RunContext,
        submitter: &mut Submitter,
    ) -> Result<(), SubmitError> {
        if !self.config.host_is_aggregated(self.hostname) {
            return Ok(());
        }
        let summary_host = self.config.summary_hostname(self.hostname);
        for (service, state, text) in ctx.aggregates.flush() {
            if !self.config.checking.dont_submit {
                submitter.submit_to_core(&summary_host, &service, state, &text, None)?;
            }
            info!("{:<20} {} {}", service, state, text);
        }
        Ok(())
    }

    /// Version line of the `check_mk` section. `(unknown)` if the agent
    /// did not tell, `None` for hosts without agent.
    async fn agent_version(&mut self, ctx: &mut RunContext, ipaddress: Option<&str>) -> Option<String> {
        if !self.config.is_tcp_host(self.hostname) {
            return None;
        }
        let mut version = Some("(unknown)".to_string());
        match self
            .collector
            .get_info_for_check(ctx, self.hostname, ipaddress, "check_mk")
            .await
        {
            Ok(SectionInfo::Available(info)) => {
                for row in info.rows().into_iter().flatten() {
                    let Some(key) = row.first().and_then(|k| k.strip_suffix(':')) else {
                        continue;
                    };
                    if key.eq_ignore_ascii_case("version") {
                        version = (row.len() > 1).then(|| row[1..].join(" "));
                    }
                }
            }
            Err(FetchError::Agent(_)) => {
                ctx.broken_agent_hosts.insert(self.hostname.to_string());
            }
            Ok(_) | Err(_) => {}
        }
        version
    }
}

/// Turns whatever the check call produced into a verdict. Failures of the
/// check become CRIT results carrying the diagnostics.
fn classify(
    called: Result<Result<CheckOutcome, CheckError>, Box<dyn Any + Send>>,
    check: &CheckInstance,
    is_snmp: bool,
    item_state: &mut ItemState,
) -> Verdict {
    let failure = match called {
        Ok(Ok(outcome)) => match outcome.sanitize(is_snmp) {
            Ok(result) => match item_state.take_wrapped() {
                Some(msg) => return Verdict::Pending(msg),
                None => return Verdict::Submit(result),
            },
            Err(CheckError::CounterWrapped(msg)) => return Verdict::Pending(msg),
            Err(CheckError::Failed(e)) => format!("{:#}", e),
        },
        Ok(Err(CheckError::CounterWrapped(msg))) => return Verdict::Pending(msg),
        Ok(Err(CheckError::Failed(e))) => format!("{:#}", e),
        Err(payload) => panic_message(payload.as_ref()),
    };
    debug!("Check {} failed: {}", check.description, failure);
    Verdict::Submit(crash_result(check, &failure))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn crash_result(check: &CheckInstance, failure: &str) -> CheckResult {
    CheckResult::new(
        State::Crit,
        format!(
            "check failed - {}\nCheck type: {}\nItem: {}\nParameters: {}",
            failure,
            check.check_type,
            check.item.as_deref().unwrap_or("None"),
            check.params
        ),
    )
}

/// Numeric components for ordering agent versions (`1.2.8p3` → 1,2,8,3).
fn version_key(version: &str) -> Vec<u64> {
    version
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|part| part.parse().ok())
        .collect()
}

fn is_expected_agent_version(agent_version: &str, expected: &str) -> bool {
    !matches!(agent_version, "(unknown)" | "None") && agent_version == expected
}

fn summarize(
    config: &AppConfig,
    hostname: &str,
    stats: &RunStats,
    agent_version: Option<&str>,
) -> (State, String) {
    let exit_spec = &config.checking.exit_spec;
    let num_errors = stats.error_sections.len();
    let expected_version = config
        .host(hostname)
        .and_then(|h| h.expected_agent_version.as_deref());

    if !stats.problems.is_empty() {
        let problems = stats.problems.join(", ");
        let code = if problems == "Empty output from agent" {
            exit_spec.empty_output
        } else {
            exit_spec.connection
        };
        return (ExitSpec::state(code), format!("{}, ", problems));
    }

    if num_errors > 0 && stats.num_success > 0 {
        let sections: Vec<&str> = stats.error_sections.iter().map(String::as_str).collect();
        return (
            ExitSpec::state(exit_spec.missing_sections),
            format!("Missing agent sections: {} - ", sections.join(", ")),
        );
    }

    if num_errors > 0 {
        return (
            ExitSpec::state(exit_spec.empty_output),
            "Got no information from host, ".to_string(),
        );
    }

    if let (Some(expected), Some(version)) = (expected_version, agent_version) {
        if !is_expected_agent_version(version, expected) {
            return (
                ExitSpec::state(exit_spec.wrong_version),
                format!("unexpected agent version {} (should be {}), ", version, expected),
            );
        }
    }

    if let (Some(min_version), Some(version)) =
        (config.checking.agent_min_version.as_deref(), agent_version)
    {
        if version_key(version) < version_key(min_version) {
            return (
                ExitSpec::state(exit_spec.wrong_version),
                format!(
                    "old plugin version {} (should be at least {}), ",
                    version, min_version
                ),
            );
        }
    }

    let mut output = String::new();
    if let Some(version) = agent_version {
        if !config.is_cluster(hostname) {
            output.push_str(&format!("Agent version {}, ", version));
        }
    }
    (State::Ok, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::builtin::register_builtin_checks;
    use crate::checks::CheckPlugin;
    use crate::client::submit::KeepaliveResult;
    use crate::collectors::snmp::tests::FakeWalker;
    use crate::collectors::snmp::{OidGroup, SnmpInfo};
    use crate::config::HostConfig;
    use crate::executor::item_state::OnWrap;
    use crate::models::SubResult;
    use tokio::sync::mpsc::UnboundedReceiver;

    const AGENT_OUTPUT: &str = "<<<check_mk>>>\\nVersion: 1.2.8\\n<<<uptime>>>\\n90061 100\\n<<<local>>>\\n1 Backup count=3 Last backup failed\\n";

    fn host_config(dir: &std::path::Path, checks: Vec<CheckInstance>) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.cache_dir = dir.join("cache");
        config.paths.var_dir = dir.join("var");
        config.paths.tmp_dir = dir.join("tmp");
        let mut host = HostConfig::new("host1");
        host.address = Some("127.0.0.1".to_string());
        host.datasource_program = Some(format!("printf '{}'", AGENT_OUTPUT));
        host.checks = checks;
        config.hosts.push(host);
        config
    }

    fn registry() -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        register_builtin_checks(&mut registry);
        registry
    }

    async fn run(
        config: &AppConfig,
        registry: &CheckRegistry,
        walker: &FakeWalker,
    ) -> (HostSummary, Vec<KeepaliveResult>) {
        let (tx, mut rx): (_, UnboundedReceiver<KeepaliveResult>) =
            tokio::sync::mpsc::unbounded_channel();
        let mut submitter = Submitter::keepalive(tx, config);
        let mut ctx = RunContext::new(config);
        let summary = run_host(
            config,
            registry,
            walker,
            &mut ctx,
            &mut submitter,
            "host1",
            Some("127.0.0.1"),
            None,
        )
        .await;
        let mut results = Vec::new();
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }
        (summary, results)
    }

    #[tokio::test]
    async fn test_run_submits_results_and_agent_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = host_config(
            dir.path(),
            vec![
                CheckInstance::new("uptime", None, "Uptime"),
                CheckInstance::new("local", Some("Backup"), "Backup"),
            ],
        );

        let (summary, results) = run(&config, &registry(), &FakeWalker::default()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].service, "Uptime");
        assert_eq!(results[0].state, State::Ok);
        assert!(results[0].output.starts_with("OK - Up since "));
        assert_eq!(results[1].state, State::Warn);
        assert_eq!(results[1].output, "WARN - Last backup failed|count=3;;;;");

        assert_eq!(summary.state, State::Ok);
        assert!(summary.output.starts_with("Agent version 1.2.8, execution time "));
        assert!(summary.output.contains("|execution_time="));
    }

    #[tokio::test]
    async fn test_missing_section_degrades_summary() {
        let dir = tempfile::tempdir().unwrap();
        let config = host_config(
            dir.path(),
            vec![
                CheckInstance::new("uptime", None, "Uptime"),
                CheckInstance::new("df", Some("/"), "Filesystem /"),
            ],
        );
        let mut registry = registry();
        registry.register("df", CheckPlugin::new(|_, _, _, _| Ok(CheckOutcome::NotFound)));

        let (summary, results) = run(&config, &registry, &FakeWalker::default()).await;

        // An agent that answered has no missing sections, only empty ones.
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].output, "UNKNOWN - Item not found in agent output");
        assert_eq!(summary.state, State::Ok);
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = host_config(dir.path(), vec![CheckInstance::new("uptime", None, "Uptime")]);
        config.hosts[0].datasource_program = Some("echo broken >&2; exit 1".to_string());

        let (summary, results) = run(&config, &registry(), &FakeWalker::default()).await;

        assert!(results.is_empty());
        assert_eq!(summary.state, State::Crit);
        assert!(summary.output.starts_with("Agent exited with code 1: broken"));
    }

    #[tokio::test]
    async fn test_crashing_and_pending_checks_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = host_config(
            dir.path(),
            vec![
                CheckInstance::new("uptime.crash", None, "Crash"),
                CheckInstance::new("uptime.failing", None, "Failing"),
                CheckInstance::new("uptime.counter", None, "Counter"),
                CheckInstance::new("uptime.deferred", None, "Deferred"),
                CheckInstance::new("uptime.nothere", None, "Nothere"),
                CheckInstance::new("uptime", None, "Uptime"),
            ],
        );
        let mut registry = registry();
        registry.register(
            "uptime.crash",
            CheckPlugin::new(|_, _, _, _| panic!("plugin bug")),
        );
        registry.register(
            "uptime.failing",
            CheckPlugin::new(|_, _, _, _| Err(anyhow::anyhow!("cannot evaluate").into())),
        );
        registry.register(
            "uptime.counter",
            CheckPlugin::new(|_, _, _, state| {
                let rate = state.counter_rate("ticks", 100.0, 5.0, OnWrap::Raise)?;
                Ok(CheckOutcome::Single(SubResult::new(State::Ok, format!("{}", rate))))
            }),
        );
        registry.register(
            "uptime.deferred",
            CheckPlugin::new(|_, _, _, state| {
                state.counter_rate("ticks", 100.0, 5.0, OnWrap::Skip)?;
                Ok(CheckOutcome::Single(SubResult::new(State::Ok, "fine")))
            }),
        );
        registry.register("uptime.nothere", CheckPlugin::default());

        let (summary, results) = run(&config, &registry, &FakeWalker::default()).await;

        let services: Vec<&str> = results.iter().map(|r| r.service.as_str()).collect();
        assert_eq!(services, vec!["Crash", "Failing", "Nothere", "Uptime"]);
        assert_eq!(results[0].state, State::Crit);
        assert!(results[0].output.contains("plugin bug"));
        assert!(results[0].output.contains("\nCheck type: uptime.crash"));
        assert_eq!(results[1].state, State::Crit);
        assert!(results[1].output.contains("cannot evaluate"));
        assert_eq!(results[2].output, "UNKNOWN - Check not implemented");
        assert_eq!(summary.state, State::Ok);

        let counters = std::fs::read_to_string(config.paths.counters_dir().join("host1")).unwrap();
        assert!(counters.contains("uptime.counter.None.ticks"));
        assert!(counters.contains("uptime.deferred.None.ticks"));
    }

    #[tokio::test]
    async fn test_filters_and_timeperiods() {
        let dir = tempfile::tempdir().unwrap();
        let mut night = CheckInstance::new("local", Some("Backup"), "Backup");
        night.period = Some("night".to_string());
        let mut config = host_config(
            dir.path(),
            vec![night, CheckInstance::new("uptime", None, "Uptime")],
        );
        config.checking.inactive_timeperiods = vec!["night".to_string()];

        let (_, results) = run(&config, &registry(), &FakeWalker::default()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].service, "Uptime");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut submitter = Submitter::keepalive(tx, &config);
        let mut ctx = RunContext::new(&config);
        let only = vec!["local".to_string()];
        run_host(
            &config,
            &registry(),
            &FakeWalker::default(),
            &mut ctx,
            &mut submitter,
            "host1",
            Some("127.0.0.1"),
            Some(only.as_slice()),
        )
        .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_aggregated_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut uptime = CheckInstance::new("uptime", None, "Uptime");
        uptime.aggregation = Some("System".to_string());
        let mut backup = CheckInstance::new("local", Some("Backup"), "Backup");
        backup.aggregation = Some("System".to_string());
        let mut config = host_config(dir.path(), vec![uptime, backup]);
        config.hosts[0].aggregated = true;
        config.checking.aggregate_check_mk = true;

        let (summary, results) = run(&config, &registry(), &FakeWalker::default()).await;

        let aggregated: Vec<&KeepaliveResult> =
            results.iter().filter(|r| r.host == "host1-s").collect();
        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[0].service, "System");
        assert_eq!(aggregated[0].state, State::Warn);
        assert!(aggregated[0].output.starts_with("1 service OK, 1 service WARN\\nUptime: OK - "));
        assert_eq!(aggregated[1].service, "Check_MK");
        assert_eq!(aggregated[1].output, "Agent version 1.2.8, ");
        assert_eq!(summary.state, State::Ok);
    }

    #[tokio::test]
    async fn test_snmp_host_without_answer() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = host_config(dir.path(), vec![CheckInstance::new("if", Some("1"), "Interface 1")]);
        config.hosts[0].tcp = false;
        config.hosts[0].datasource_program = None;
        let mut registry = registry();
        registry.register(
            "if",
            CheckPlugin::new(|_, _, _, _| Ok(CheckOutcome::NotFound))
                .with_snmp_info(SnmpInfo::Single(OidGroup::new(".1.3.6.1.2.1.2.2.1", &["2"]))),
        );

        let (summary, results) = run(&config, &registry, &FakeWalker::default()).await;

        assert!(results.is_empty());
        assert_eq!(summary.state, State::Crit);
        assert!(summary.output.starts_with("Got no information from host, "));
    }

    #[test]
    fn test_summary_versions() {
        let mut config = AppConfig::default();
        let mut host = HostConfig::new("host1");
        host.expected_agent_version = Some("1.2.8".to_string());
        config.hosts.push(host);
        let stats = RunStats::default();

        let (state, output) = summarize(&config, "host1", &stats, Some("1.2.6"));
        assert_eq!(state, State::Warn);
        assert_eq!(output, "unexpected agent version 1.2.6 (should be 1.2.8), ");

        let (state, _) = summarize(&config, "host1", &stats, Some("(unknown)"));
        assert_eq!(state, State::Warn);

        config.hosts[0].expected_agent_version = None;
        config.checking.agent_min_version = Some("1.2.10".to_string());
        let (state, output) = summarize(&config, "host1", &stats, Some("1.2.8p3"));
        assert_eq!(state, State::Warn);
        assert_eq!(output, "old plugin version 1.2.8p3 (should be at least 1.2.10), ");

        let (state, output) = summarize(&config, "host1", &stats, Some("1.4.0"));
        assert_eq!(state, State::Ok);
        assert_eq!(output, "Agent version 1.4.0, ");
    }

    #[test]
    fn test_summary_problems_and_errors() {
        let config = AppConfig::default();
        let mut stats = RunStats::default();
        stats.add_problem("Empty output from agent".to_string());
        stats.add_problem("Empty output from agent".to_string());
        stats.add_problem(String::new());
        assert_eq!(
            summarize(&config, "host1", &stats, None),
            (State::Crit, "Empty output from agent, ".to_string())
        );

        let mut stats = RunStats::default();
        stats.error_sections.insert("df".to_string());
        stats.error_sections.insert("mem".to_string());
        stats.num_success = 3;
        assert_eq!(
            summarize(&config, "host1", &stats, Some("1.2.8")),
            (State::Warn, "Missing agent sections: df, mem - ".to_string())
        );
    }
}
