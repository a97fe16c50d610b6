use crate::checks::{CheckPlugin, CheckRegistry};
use crate::error::CheckError;
use crate::executor::item_state::ItemState;
use crate::models::{
    CheckOutcome, Info, Metric, PerfValue, Perfdata, SectionData, State, SubResult,
};
use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

/// Registers the plugins the binary ships with.
pub fn register_builtin_checks(registry: &mut CheckRegistry) {
    registry.register("local", CheckPlugin::new(check_local));
    registry.register(
        "uptime",
        CheckPlugin::new(check_uptime).with_parse_function(parse_uptime),
    );
}

fn parse_perf_value(text: &str) -> Option<PerfValue> {
    if text.is_empty() {
        return None;
    }
    let numeric: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    if let Ok(v) = numeric.parse::<i64>() {
        return Some(PerfValue::Int(v));
    }
    numeric.parse::<f64>().ok().map(PerfValue::Float)
}

fn parse_local_perfdata(text: &str) -> Perfdata {
    if text == "-" {
        return Perfdata::default();
    }
    let metrics = text
        .split('|')
        .filter_map(|entry| {
            let (name, values) = entry.split_once('=')?;
            let mut fields = values.split(';').map(parse_perf_value);
            let value = fields.next().flatten()?;
            let mut metric = Metric::new(name, value);
            metric.warn = fields.next().flatten();
            metric.crit = fields.next().flatten();
            metric.min = fields.next().flatten();
            metric.max = fields.next().flatten();
            Some(metric)
        })
        .collect();
    Perfdata::new(metrics)
}

/// Local checks: `<state> <item> <perfdata> <text...>`.
fn check_local(
    item: Option<&str>,
    _params: &Value,
    info: &Info,
    _state: &mut ItemState,
) -> Result<CheckOutcome, CheckError> {
    let rows = info
        .rows()
        .ok_or_else(|| anyhow!("Unexpected shape of section local"))?;
    let Some(row) = rows
        .iter()
        .find(|row| row.len() >= 3 && Some(row[1].as_str()) == item)
    else {
        return Ok(CheckOutcome::NotFound);
    };

    let state = row[0]
        .parse::<i64>()
        .ok()
        .and_then(State::from_code)
        .unwrap_or(State::Unknown);
    let text = if row.len() > 3 {
        row[3..].join(" ")
    } else {
        String::new()
    };
    let perfdata = parse_local_perfdata(&row[2]);

    Ok(CheckOutcome::Single(
        SubResult::new(state, text).with_perfdata(perfdata),
    ))
}

fn parse_uptime(data: &SectionData) -> anyhow::Result<Value> {
    let SectionData::Table(rows) = data else {
        return Err(anyhow!("Unexpected shape of section uptime"));
    };
    let first = rows
        .first()
        .and_then(|row| row.first())
        .ok_or_else(|| anyhow!("Empty uptime section"))?;
    let seconds: f64 = first
        .parse()
        .with_context(|| format!("Invalid uptime '{}'", first))?;
    Ok(json!({ "uptime_sec": seconds }))
}

fn format_uptime(seconds: i64) -> String {
    let days = seconds / 86400;
    let rest = seconds % 86400;
    format!(
        "{} days, {:02}:{:02}:{:02}",
        days,
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    )
}

/// Uptime with optional lower levels `params.min = [warn, crit]` in seconds.
fn check_uptime(
    _item: Option<&str>,
    params: &Value,
    info: &Info,
    _state: &mut ItemState,
) -> Result<CheckOutcome, CheckError> {
    let Info::Parsed(parsed) = info else {
        return Err(anyhow!("Uptime section was not parsed").into());
    };
    let seconds = parsed["uptime_sec"]
        .as_f64()
        .ok_or_else(|| anyhow!("Missing uptime"))?;

    let since = Utc::now() - Duration::seconds(seconds as i64);
    let mut text = format!(
        "Up since {}, uptime: {}",
        since.format("%a %b %d %H:%M:%S %Y"),
        format_uptime(seconds as i64)
    );

    let levels = params["min"]
        .as_array()
        .and_then(|l| Some((l.first()?.as_f64()?, l.get(1)?.as_f64()?)));
    let state = match levels {
        Some((_, crit)) if seconds < crit => State::Crit,
        Some((warn, _)) if seconds < warn => State::Warn,
        _ => State::Ok,
    };
    if let Some((warn, crit)) = levels {
        if state != State::Ok {
            text.push_str(&format!(
                " (warn/crit below {}/{})",
                format_uptime(warn as i64),
                format_uptime(crit as i64)
            ));
        }
    }

    Ok(CheckOutcome::Single(
        SubResult::new(state, text)
            .with_perfdata(Perfdata::new(vec![Metric::new("uptime", seconds)])),
    ))
}
