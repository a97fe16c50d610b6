pub mod checks;
pub mod client;
pub mod collectors;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod models;
pub mod storage;
pub mod utils;

use crate::checks::builtin::register_builtin_checks;
use crate::checks::CheckRegistry;
use crate::client::submit::Submitter;
use crate::collectors::snmp::SnmpwalkCommand;
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::executor::{run_host, HostSummary};
use anyhow::Context;
use log::{debug, error, info};

/// Checks one host with the builtin plugins and returns its summary.
pub async fn run(
    config: &AppConfig,
    hostname: &str,
    ipaddress: Option<&str>,
) -> anyhow::Result<HostSummary> {
    info!("Checking host {}", hostname);

    match check_host(config, hostname, ipaddress).await {
        Ok(summary) => {
            debug!("Host {} done: {}", hostname, summary.state);
            Ok(summary)
        }
        Err(e) => {
            error!("Application error: {e:#}");
            // Print chain of error causes
            let mut source = e.source();
            while let Some(e) = source {
                error!("Caused by: {e}");
                source = e.source();
            }
            Err(e).context("Application failed to run")
        }
    }
}

async fn check_host(
    config: &AppConfig,
    hostname: &str,
    ipaddress: Option<&str>,
) -> anyhow::Result<HostSummary> {
    let mut registry = CheckRegistry::new();
    register_builtin_checks(&mut registry);

    let mut submitter =
        Submitter::from_config(config).context("Failed to set up check submission")?;
    let ipaddress = ipaddress
        .map(str::to_string)
        .or_else(|| config.address_of(hostname).map(str::to_string));

    let mut ctx = RunContext::new(config);
    Ok(run_host(
        config,
        &registry,
        &SnmpwalkCommand,
        &mut ctx,
        &mut submitter,
        hostname,
        ipaddress.as_deref(),
        None,
    )
    .await)
}
