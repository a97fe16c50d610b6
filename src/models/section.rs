use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Row = Vec<String>;
pub type Table = Vec<Row>;

/// Raw data of one section as delivered by a source.
///
/// Agent sections and single-group SNMP tables are a flat `Table`. SNMP
/// definitions made of several OID groups produce one table per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionData {
    Table(Table),
    Tables(Vec<Table>),
}

impl SectionData {
    pub fn empty() -> Self {
        SectionData::Table(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SectionData::Table(rows) => rows.is_empty(),
            SectionData::Tables(tables) => tables.is_empty(),
        }
    }

    /// Prepends `node` as first column of every row. Hosts outside a
    /// cluster are tagged with an empty column.
    pub fn with_node(self, node: Option<&str>) -> Self {
        let tag = node.unwrap_or("").to_string();
        let tag_rows = |rows: Table| -> Table {
            rows.into_iter()
                .map(|row| {
                    let mut tagged = Vec::with_capacity(row.len() + 1);
                    tagged.push(tag.clone());
                    tagged.extend(row);
                    tagged
                })
                .collect()
        };
        match self {
            SectionData::Table(rows) => SectionData::Table(tag_rows(rows)),
            SectionData::Tables(tables) => {
                SectionData::Tables(tables.into_iter().map(tag_rows).collect())
            }
        }
    }

    /// Concatenates `other` onto `self`. Mismatching shapes keep `self`
    /// and append `other` as additional tables.
    pub fn extend(&mut self, other: SectionData) {
        match other {
            SectionData::Table(more) => match self {
                SectionData::Table(rows) => rows.extend(more),
                SectionData::Tables(tables) => tables.push(more),
            },
            SectionData::Tables(more) => {
                if let SectionData::Tables(tables) = self {
                    tables.extend(more);
                    return;
                }
                let mut tables = Vec::with_capacity(more.len() + 1);
                if let SectionData::Table(rows) = self {
                    if !rows.is_empty() {
                        tables.push(std::mem::take(rows));
                    }
                }
                tables.extend(more);
                *self = SectionData::Tables(tables);
            }
        }
    }
}

/// Age information about a section: when it was produced and how long the
/// producer considers it valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cached_at: i64,
    pub cache_interval: i64,
}

impl CacheInfo {
    pub fn new(cached_at: i64, cache_interval: i64) -> Self {
        Self {
            cached_at,
            cache_interval,
        }
    }

    /// Oldest timestamp and widest interval of both.
    pub fn merge(self, other: CacheInfo) -> CacheInfo {
        CacheInfo {
            cached_at: self.cached_at.min(other.cached_at),
            cache_interval: self.cache_interval.max(other.cache_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSection {
    pub cached_at: i64,
    pub until: i64,
    pub rows: Table,
}

/// Everything extracted from one agent payload.
#[derive(Debug, Default, Clone)]
pub struct ParsedAgentOutput {
    pub sections: IndexMap<String, Table>,
    /// Raw lines addressed to other hosts, passed on undecoded.
    pub piggybacked: IndexMap<String, Vec<Vec<u8>>>,
    pub persisted: IndexMap<String, PersistedSection>,
    pub cache_info: IndexMap<String, CacheInfo>,
}
