use crate::error::CheckError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum State {
    Ok = 0,
    Warn = 1,
    Crit = 2,
    Unknown = 3,
}

impl State {
    pub fn from_code(code: i64) -> Option<State> {
        match code {
            0 => Some(State::Ok),
            1 => Some(State::Warn),
            2 => Some(State::Crit),
            3 => Some(State::Unknown),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn short_name(self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warn => "WARN",
            State::Crit => "CRIT",
            State::Unknown => "UNKNOWN",
        }
    }

    /// Suffix appended to sub-result texts.
    pub fn marker(self) -> &'static str {
        match self {
            State::Ok => "",
            State::Warn => "(!)",
            State::Crit => "(!!)",
            State::Unknown => "(?)",
        }
    }

    /// CRIT dominates everything, otherwise OK < WARN < UNKNOWN.
    pub fn worst(self, other: State) -> State {
        if self == State::Crit || other == State::Crit {
            State::Crit
        } else {
            self.max(other)
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PerfValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PerfValue {
    pub fn render(&self) -> String {
        match self {
            PerfValue::Int(v) => v.to_string(),
            PerfValue::Float(v) => {
                let text = format!("{:.6}", v);
                text.trim_end_matches('0').trim_end_matches('.').to_string()
            }
            PerfValue::Text(v) => v.clone(),
        }
    }
}

impl From<i64> for PerfValue {
    fn from(v: i64) -> Self {
        PerfValue::Int(v)
    }
}

impl From<f64> for PerfValue {
    fn from(v: f64) -> Self {
        PerfValue::Float(v)
    }
}

/// One performance metric: `name=value;warn;crit;min;max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: Option<PerfValue>,
    pub warn: Option<PerfValue>,
    pub crit: Option<PerfValue>,
    pub min: Option<PerfValue>,
    pub max: Option<PerfValue>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: impl Into<PerfValue>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            warn: None,
            crit: None,
            min: None,
            max: None,
        }
    }

    pub fn with_levels(mut self, warn: Option<PerfValue>, crit: Option<PerfValue>) -> Self {
        self.warn = warn;
        self.crit = crit;
        self
    }

    pub fn with_bounds(mut self, min: Option<PerfValue>, max: Option<PerfValue>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn render(&self) -> String {
        let field = |v: &Option<PerfValue>| v.as_ref().map(PerfValue::render).unwrap_or_default();
        format!(
            "{}={};{};{};{};{}",
            self.name,
            field(&self.value),
            field(&self.warn),
            field(&self.crit),
            field(&self.min),
            field(&self.max)
        )
    }
}

/// Metrics plus an optional trailing check command label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Perfdata {
    pub metrics: Vec<Metric>,
    pub check_command: Option<String>,
}

impl Perfdata {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self {
            metrics,
            check_command: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// A single `(state, text, perfdata)` as produced by a check routine.
#[derive(Debug, Clone, PartialEq)]
pub struct SubResult {
    pub state: State,
    pub text: Option<String>,
    pub perfdata: Option<Perfdata>,
}

impl SubResult {
    pub fn new(state: State, text: impl Into<String>) -> Self {
        Self {
            state,
            text: Some(text.into()),
            perfdata: None,
        }
    }

    pub fn with_perfdata(mut self, perfdata: Perfdata) -> Self {
        self.perfdata = Some(perfdata);
        self
    }

    /// A sub-result that only carries metrics.
    pub fn perf_only(perfdata: Perfdata) -> Self {
        Self {
            state: State::Ok,
            text: None,
            perfdata: Some(perfdata),
        }
    }
}

/// The three return shapes of a check routine.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Single(SubResult),
    NotFound,
    Many(Vec<SubResult>),
}

/// Canonical check result.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub state: State,
    pub text: String,
    pub perfdata: Option<Perfdata>,
}

impl CheckResult {
    pub fn new(state: State, text: impl Into<String>) -> Self {
        Self {
            state,
            text: text.into(),
            perfdata: None,
        }
    }

    pub fn item_not_found(is_snmp: bool) -> Self {
        let text = if is_snmp {
            "Item not found in SNMP data"
        } else {
            "Item not found in agent output"
        };
        Self {
            state: State::Unknown,
            text: text.to_string(),
            perfdata: Some(Perfdata::default()),
        }
    }

    pub fn unimplemented() -> Self {
        Self::new(State::Unknown, "UNKNOWN - Check not implemented")
    }
}

impl CheckOutcome {
    /// Normalizes whatever the routine returned into the canonical triple.
    pub fn sanitize(self, is_snmp: bool) -> Result<CheckResult, CheckError> {
        match self {
            CheckOutcome::Single(sub) => {
                let text = sub.text.ok_or_else(|| {
                    CheckError::Failed(anyhow::anyhow!("Invalid infotext from check: \"None\""))
                })?;
                Ok(CheckResult {
                    state: sub.state,
                    text,
                    perfdata: sub.perfdata,
                })
            }
            CheckOutcome::NotFound => Ok(CheckResult::item_not_found(is_snmp)),
            CheckOutcome::Many(subs) => Ok(Self::sanitize_many(subs, is_snmp)),
        }
    }

    fn sanitize_many(mut subs: Vec<SubResult>, is_snmp: bool) -> CheckResult {
        if subs.is_empty() {
            return CheckResult::item_not_found(is_snmp);
        }

        if subs.len() == 1 {
            let sub = subs.remove(0);
            return CheckResult {
                state: sub.state,
                text: sub.text.unwrap_or_default(),
                perfdata: sub.perfdata,
            };
        }

        let mut state = State::Ok;
        let mut texts = Vec::new();
        let mut perfdata = Perfdata::default();
        for sub in subs {
            if let Some(text) = sub.text {
                texts.push(format!("{}{}", text, sub.state.marker()));
                state = state.worst(sub.state);
            }
            if let Some(perf) = sub.perfdata {
                perfdata.metrics.extend(perf.metrics);
                if perf.check_command.is_some() {
                    perfdata.check_command = perf.check_command;
                }
            }
        }

        CheckResult {
            state,
            text: texts.join(", "),
            perfdata: Some(perfdata),
        }
    }
}
