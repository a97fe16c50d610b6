use std::path::PathBuf;
use thiserror::Error;

/// Failures of the data acquisition pipeline.
///
/// An empty message means the problem has already been reported once for
/// this host during the current run and should not be repeated.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Agent(String),

    #[error("{0}")]
    Snmp(String),

    /// Not a failure: the check must not run or report in this cycle.
    #[error("check skipped")]
    Skip,

    #[error("Timeout while fetching data")]
    Timeout,

    #[error("{0}")]
    General(String),
}

impl FetchError {
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_silent(&self) -> bool {
        match self {
            FetchError::Agent(msg) | FetchError::Snmp(msg) | FetchError::General(msg) => {
                msg.is_empty()
            }
            _ => false,
        }
    }
}

/// Failures raised from inside a check routine.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A counter has no usable previous value yet. The result is pending.
    #[error("{0}")]
    CounterWrapped(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid setting {0:?} for check_submission. Must be 'pipe' or 'file'")]
    InvalidMode(String),

    #[error("Missing core command pipe '{0}'")]
    MissingPipe(PathBuf),

    #[error("Error writing to command pipe: {0}")]
    Pipe(std::io::Error),

    #[error("Cannot create check result file in {path}: {source}")]
    ResultFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Keepalive channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
