use crate::models::{CacheInfo, ParsedAgentOutput, PersistedSection, Row};
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Instant;

fn option_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^(]*)(?:\((.*)\))?$").ok())
        .as_ref()
}

/// Options of a `<<<name:opt(args):...>>>` header.
#[derive(Debug, Default, Clone, PartialEq)]
struct SectionOptions {
    separator: Option<char>,
    nostrip: bool,
    persist_until: Option<i64>,
    cached: Option<CacheInfo>,
    encoding: Option<String>,
}

impl SectionOptions {
    fn parse<'a>(parts: impl Iterator<Item = &'a str>) -> Self {
        let mut options = SectionOptions::default();
        for part in parts {
            let Some(caps) = option_regex().and_then(|re| re.captures(part)) else {
                continue;
            };
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let args = caps.get(2).map(|m| m.as_str());
            match (name, args) {
                ("sep", Some(args)) => {
                    options.separator = args
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .and_then(char::from_u32);
                }
                ("nostrip", _) => options.nostrip = true,
                ("persist", Some(args)) => options.persist_until = args.trim().parse().ok(),
                ("cached", Some(args)) => {
                    let mut values = args.split(',').map(|v| v.trim().parse::<i64>());
                    if let (Some(Ok(at)), Some(Ok(interval))) = (values.next(), values.next()) {
                        options.cached = Some(CacheInfo::new(at, interval));
                    }
                }
                ("encoding", Some(args)) => options.encoding = Some(args.to_string()),
                _ => debug!("Ignoring unknown section option {}", part),
            }
        }
        options
    }
}

/// Decodes one line. Without an explicit encoding UTF-8 is tried first and
/// latin-1 used as fallback.
fn decode_line(raw: &[u8], encoding: Option<&str>) -> String {
    let latin1 = |bytes: &[u8]| bytes.iter().map(|&b| b as char).collect::<String>();
    match encoding.map(|e| e.to_lowercase()) {
        Some(e) if matches!(e.as_str(), "latin1" | "latin-1" | "iso-8859-1" | "cp1252") => {
            latin1(raw)
        }
        _ => match std::str::from_utf8(raw) {
            Ok(s) => s.to_string(),
            Err(_) => latin1(raw),
        },
    }
}

fn split_row(line: &str, separator: Option<char>) -> Row {
    match separator {
        Some(sep) => line.split(sep).map(str::to_string).collect(),
        None => line.split_whitespace().map(str::to_string).collect(),
    }
}

/// Splits raw agent output into sections, piggyback blocks for other hosts,
/// sections to persist and per-section cache info.
///
/// `translate` maps piggyback host names found in the output to the host
/// names they are filed under. `now` is the time the data was received.
pub fn parse_info<F>(raw: &[u8], hostname: &str, translate: F, now: i64) -> ParsedAgentOutput
where
    F: Fn(&str) -> String,
{
    let start = Instant::now();
    let mut parsed = ParsedAgentOutput::default();
    let mut piggyback_host: Option<String> = None;
    let mut current: Option<String> = None;
    let mut options = SectionOptions::default();
    let mut persist_until: IndexMap<String, i64> = IndexMap::new();

    for raw_line in raw.split(|&b| b == b'\n') {
        let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
        let line = String::from_utf8_lossy(raw_line);
        let stripped = line.trim();

        if stripped.len() >= 8 && stripped.starts_with("<<<<") && stripped.ends_with(">>>>") {
            let target = &stripped[4..stripped.len() - 4];
            piggyback_host = if target.is_empty() {
                None
            } else {
                let target = translate(target).replace(' ', "_");
                (target != hostname).then_some(target)
            };
        } else if let Some(target) = &piggyback_host {
            if !raw_line.is_empty() {
                parsed
                    .piggybacked
                    .entry(target.clone())
                    .or_default()
                    .push(raw_line.to_vec());
            }
        } else if stripped.len() >= 6 && stripped.starts_with("<<<") && stripped.ends_with(">>>") {
            let header = &stripped[3..stripped.len() - 3];
            let mut parts = header.split(':');
            let name = parts.next().unwrap_or("").to_string();
            options = SectionOptions::parse(parts);

            parsed.sections.entry(name.clone()).or_default();

            if let Some(until) = options.persist_until {
                parsed
                    .cache_info
                    .insert(name.clone(), CacheInfo::new(now, until - now));
                persist_until.insert(name.clone(), until);
            }
            if let Some(cached) = options.cached {
                parsed.cache_info.insert(name.clone(), cached);
            }
            current = Some(name);
        } else if !stripped.is_empty() {
            let Some(section) = current.as_ref().and_then(|n| parsed.sections.get_mut(n)) else {
                continue;
            };
            let decoded = decode_line(raw_line, options.encoding.as_deref());
            let text = if options.nostrip {
                decoded.as_str()
            } else {
                decoded.trim()
            };
            section.push(split_row(text, options.separator));
        }
    }

    for (name, until) in persist_until {
        let rows = parsed.sections.get(&name).cloned().unwrap_or_default();
        parsed.persisted.insert(
            name,
            PersistedSection {
                cached_at: now,
                until,
                rows,
            },
        );
    }

    debug!("parse_info took: {} ms", start.elapsed().as_millis());
    parsed
}
