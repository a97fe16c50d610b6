//! Interface to the check plugins.
//!
//! Plugins are registered by check type (`df`, `df.inodes`). Section level
//! properties (parse function, extra sections, node info, SNMP definition)
//! are looked up under the plugin registered for the section name.

pub mod builtin;

use crate::collectors::snmp::SnmpInfo;
use crate::error::CheckError;
use crate::executor::item_state::ItemState;
use crate::models::check::section_of;
use crate::models::{CheckOutcome, Info, SectionData};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type CheckFn =
    Arc<dyn Fn(Option<&str>, &Value, &Info, &mut ItemState) -> Result<CheckOutcome, CheckError> + Send + Sync>;

pub type ParseFn = Arc<dyn Fn(&SectionData) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CheckPlugin {
    pub check_fn: Option<CheckFn>,
    pub parse_fn: Option<ParseFn>,
    pub extra_sections: Vec<String>,
    /// Prepend the node name to every row.
    pub node_info: bool,
    pub snmp_info: Option<SnmpInfo>,
    /// Run the check even if SNMP delivered no data.
    pub handle_empty_info: bool,
}

impl CheckPlugin {
    pub fn new<F>(check_fn: F) -> Self
    where
        F: Fn(Option<&str>, &Value, &Info, &mut ItemState) -> Result<CheckOutcome, CheckError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            check_fn: Some(Arc::new(check_fn)),
            ..Self::default()
        }
    }

    pub fn with_parse_function<F>(mut self, parse_fn: F) -> Self
    where
        F: Fn(&SectionData) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.parse_fn = Some(Arc::new(parse_fn));
        self
    }

    pub fn with_extra_sections(mut self, sections: &[&str]) -> Self {
        self.extra_sections = sections.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_node_info(mut self) -> Self {
        self.node_info = true;
        self
    }

    pub fn with_snmp_info(mut self, snmp_info: SnmpInfo) -> Self {
        self.snmp_info = Some(snmp_info);
        self
    }

    pub fn handling_empty_info(mut self) -> Self {
        self.handle_empty_info = true;
        self
    }
}

#[derive(Clone, Default)]
pub struct CheckRegistry {
    plugins: HashMap<String, CheckPlugin>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check_type: &str, plugin: CheckPlugin) {
        self.plugins.insert(check_type.to_string(), plugin);
    }

    pub fn get(&self, check_type: &str) -> Option<&CheckPlugin> {
        self.plugins.get(check_type)
    }

    pub fn check_function(&self, check_type: &str) -> Option<&CheckFn> {
        self.get(check_type)?.check_fn.as_ref()
    }

    pub fn parse_function(&self, section: &str) -> Option<&ParseFn> {
        self.get(section)?.parse_fn.as_ref()
    }

    pub fn extra_sections(&self, section: &str) -> &[String] {
        self.get(section)
            .map(|p| p.extra_sections.as_slice())
            .unwrap_or_default()
    }

    pub fn has_node_info(&self, section: &str) -> bool {
        self.get(section).is_some_and(|p| p.node_info)
    }

    /// SNMP definition of the section a check type reads.
    pub fn snmp_info(&self, check_type: &str) -> Option<&SnmpInfo> {
        self.get(section_of(check_type))?.snmp_info.as_ref()
    }

    pub fn is_snmp_check(&self, check_type: &str) -> bool {
        self.snmp_info(check_type).is_some()
    }

    pub fn handles_empty_info(&self, check_type: &str) -> bool {
        self.get(check_type).is_some_and(|p| p.handle_empty_info)
    }
}
