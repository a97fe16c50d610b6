use crate::models::section::SectionData;
use serde::Deserialize;

/// One schedulable check on a host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckInstance {
    pub check_type: String,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    pub description: String,
    #[serde(default)]
    pub aggregation: Option<String>,
    /// Time period in which the check is active.
    #[serde(default)]
    pub period: Option<String>,
}

impl CheckInstance {
    pub fn new(check_type: &str, item: Option<&str>, description: &str) -> Self {
        Self {
            check_type: check_type.to_string(),
            item: item.map(str::to_string),
            params: serde_json::Value::Null,
            description: description.to_string(),
            aggregation: None,
            period: None,
        }
    }

    /// `foo.bar` reads the section `foo`.
    pub fn section_name(&self) -> &str {
        section_of(&self.check_type)
    }
}

pub fn section_of(check_type: &str) -> &str {
    check_type.split('.').next().unwrap_or(check_type)
}

/// What a check routine receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Info {
    Data(SectionData),
    Parsed(serde_json::Value),
    /// Main section followed by the declared extra sections.
    Bundle(Vec<Option<Info>>),
}

impl Info {
    /// True for sections that were fetched but hold nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Info::Data(data) => data.is_empty(),
            Info::Parsed(serde_json::Value::Array(v)) => v.is_empty(),
            Info::Parsed(serde_json::Value::Object(m)) => m.is_empty(),
            Info::Parsed(_) => false,
            Info::Bundle(_) => false,
        }
    }

    pub fn rows(&self) -> Option<&crate::models::section::Table> {
        match self {
            Info::Data(SectionData::Table(rows)) => Some(rows),
            _ => None,
        }
    }
}

/// Section data resolved for a check, with parse failures deferred.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionInfo {
    Missing,
    Available(Info),
    ParseFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_name_strips_subcheck() {
        let check = CheckInstance::new("df.inodes", Some("/"), "Filesystem /");
        assert_eq!(check.section_name(), "df");
        assert_eq!(section_of("uptime"), "uptime");
    }

    #[test]
    fn test_empty_info_shapes() {
        assert!(Info::Data(SectionData::empty()).is_empty());
        assert!(Info::Parsed(serde_json::json!({})).is_empty());
        assert!(!Info::Parsed(serde_json::json!(0)).is_empty());
    }
}
