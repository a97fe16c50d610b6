pub mod check;
pub mod result;
pub mod section;

pub use check::{CheckInstance, Info, SectionInfo};
pub use result::{CheckOutcome, CheckResult, Metric, PerfValue, Perfdata, State, SubResult};
pub use section::{CacheInfo, ParsedAgentOutput, PersistedSection, Row, SectionData, Table};
