use crate::error::FetchError;
use crate::models::{SectionData, Table};
use async_trait::async_trait;
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub struct SnmpTarget {
    pub hostname: String,
    pub ipaddress: String,
    pub community: String,
}

/// A table below `base`; each column is an OID suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct OidGroup {
    pub base: String,
    pub columns: Vec<String>,
}

impl OidGroup {
    pub fn new(base: &str, columns: &[&str]) -> Self {
        Self {
            base: base.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// SNMP data definition of a check type.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpInfo {
    Single(OidGroup),
    /// One table per group. A failing group fails the whole definition.
    Multi(Vec<OidGroup>),
}

#[async_trait]
pub trait SnmpWalker: Send + Sync {
    /// Returns `(oid, value)` pairs below `oid`, OIDs in numeric dotted form.
    async fn walk(&self, target: &SnmpTarget, oid: &str) -> Result<Vec<(String, String)>, FetchError>;
}

/// Walks by calling the net-snmp `snmpwalk` command.
#[derive(Debug, Clone, Default)]
pub struct SnmpwalkCommand;

fn parse_walk_output(output: &str) -> Vec<(String, String)> {
    let Ok(re) = Regex::new(r"^\.?([0-9.]+)\s*=\s*(.*)$") else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            let oid = format!(".{}", caps.get(1)?.as_str());
            let value = caps.get(2)?.as_str().trim();
            if value.starts_with("No Such") || value.starts_with("No more variables") {
                return None;
            }
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((oid, value.to_string()))
        })
        .collect()
}

#[async_trait]
impl SnmpWalker for SnmpwalkCommand {
    async fn walk(&self, target: &SnmpTarget, oid: &str) -> Result<Vec<(String, String)>, FetchError> {
        let start = Instant::now();
        let output = Command::new("snmpwalk")
            .args(["-v2c", "-c", target.community.as_str(), "-On", "-OQ", "-Oe"])
            .arg(&target.ipaddress)
            .arg(oid)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Snmp(format!("Cannot execute snmpwalk: {}", e)))?;
        debug!("snmpwalk {} took: {} ms", oid, start.elapsed().as_millis());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Snmp(format!(
                "SNMP Error on {}: {}",
                target.ipaddress,
                stderr.trim()
            )));
        }
        Ok(parse_walk_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn join_oid(base: &str, column: &str) -> String {
    let base = if base.starts_with('.') {
        base.to_string()
    } else {
        format!(".{}", base)
    };
    if column.is_empty() {
        base
    } else {
        format!("{}.{}", base, column)
    }
}

/// One row per index below the first column, columns in declared order.
pub async fn get_snmp_table(
    walker: &dyn SnmpWalker,
    target: &SnmpTarget,
    group: &OidGroup,
) -> Result<Table, FetchError> {
    let mut rows: IndexMap<String, Vec<String>> = IndexMap::new();
    for (position, column) in group.columns.iter().enumerate() {
        let oid = join_oid(&group.base, column);
        let prefix = format!("{}.", oid);
        let values = walker.walk(target, &oid).await?;

        let mut by_index: IndexMap<String, String> = IndexMap::new();
        for (found, value) in values {
            if let Some(index) = found.strip_prefix(&prefix) {
                by_index.insert(index.to_string(), value);
            }
        }

        if position == 0 {
            for (index, value) in by_index {
                rows.insert(index, vec![value]);
            }
        } else {
            for (index, row) in rows.iter_mut() {
                row.push(by_index.get(index).cloned().unwrap_or_default());
            }
        }
    }
    Ok(rows.into_values().collect())
}

pub async fn get_snmp_info(
    walker: &dyn SnmpWalker,
    target: &SnmpTarget,
    info: &SnmpInfo,
) -> Result<SectionData, FetchError> {
    match info {
        SnmpInfo::Single(group) => Ok(SectionData::Table(
            get_snmp_table(walker, target, group).await?,
        )),
        SnmpInfo::Multi(groups) => {
            let mut tables = Vec::with_capacity(groups.len());
            for group in groups {
                tables.push(get_snmp_table(walker, target, group).await?);
            }
            Ok(SectionData::Tables(tables))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves walks from a fixed OID map. Unknown hosts time out.
    #[derive(Default)]
    pub(crate) struct FakeWalker {
        pub oids: HashMap<String, Vec<(String, String)>>,
        pub failing_hosts: Vec<String>,
        pub calls: AtomicUsize,
    }

    impl FakeWalker {
        pub fn with(mut self, oid: &str, values: &[(&str, &str)]) -> Self {
            self.oids.insert(
                oid.to_string(),
                values
                    .iter()
                    .map(|(o, v)| (o.to_string(), v.to_string()))
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl SnmpWalker for FakeWalker {
        async fn walk(&self, target: &SnmpTarget, oid: &str) -> Result<Vec<(String, String)>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_hosts.contains(&target.hostname) {
                return Err(FetchError::Snmp(format!(
                    "Timeout: No Response from {}",
                    target.ipaddress
                )));
            }
            Ok(self.oids.get(oid).cloned().unwrap_or_default())
        }
    }

    fn target() -> SnmpTarget {
        SnmpTarget {
            hostname: "switch1".to_string(),
            ipaddress: "10.0.0.2".to_string(),
            community: "public".to_string(),
        }
    }

    #[test]
    fn test_parse_walk_output() {
        let output = ".1.3.6.1.2.1.2.2.1.2.1 = \"lo\"\n.1.3.6.1.2.1.2.2.1.2.2 = eth0\n.1.3.6.1.2.1.2.2.1.9 = No Such Object available on this agent at this OID\n";
        assert_eq!(
            parse_walk_output(output),
            vec![
                (".1.3.6.1.2.1.2.2.1.2.1".to_string(), "lo".to_string()),
                (".1.3.6.1.2.1.2.2.1.2.2".to_string(), "eth0".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_table_rows_follow_first_column() {
        let walker = FakeWalker::default()
            .with(".1.3.6.1.2.1.2.2.1.2", &[
                (".1.3.6.1.2.1.2.2.1.2.1", "lo"),
                (".1.3.6.1.2.1.2.2.1.2.2", "eth0"),
            ])
            .with(".1.3.6.1.2.1.2.2.1.8", &[(".1.3.6.1.2.1.2.2.1.8.2", "1")]);
        let group = OidGroup::new(".1.3.6.1.2.1.2.2.1", &["2", "8"]);

        let table = get_snmp_table(&walker, &target(), &group).await.unwrap();
        assert_eq!(
            table,
            vec![
                vec!["lo".to_string(), String::new()],
                vec!["eth0".to_string(), "1".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_group_discards_everything() {
        let walker = FakeWalker {
            failing_hosts: vec!["switch1".to_string()],
            ..FakeWalker::default()
        };
        let info = SnmpInfo::Multi(vec![
            OidGroup::new(".1.3.6.1.2.1.1", &["1"]),
            OidGroup::new(".1.3.6.1.2.1.2", &["1"]),
        ]);
        let err = get_snmp_info(&walker, &target(), &info).await.unwrap_err();
        assert!(matches!(err, FetchError::Snmp(_)));
        assert_eq!(walker.calls.load(Ordering::SeqCst), 1);
    }
}
