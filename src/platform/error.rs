//! Error type shared by the reproduction engine.

use std::path::PathBuf;

pub type ReproResult<T> = Result<T, ReproError>;

#[derive(Debug, thiserror::Error)]
pub enum ReproError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no sanitizer configured for job {job_type}; a sanitizer must be provided with each job definition")]
    SanitizerNotProvided { job_type: String },

    #[error("malformed {variable}: segment {segment:?} is not a key=value pair")]
    MalformedOptions { variable: String, segment: String },

    #[error("malformed fuzzer argument {0:?}; expected -key=value")]
    MalformedArgument(String),

    #[error("malformed gesture {0:?}; expected <type>,<payload> or Trigger:<seconds>")]
    MalformedGesture(String),

    #[error("the job {0} is not supported; add it to the [jobs] table or pass --flavor and --sanitizer")]
    JobTypeNotSupported(String),

    #[error("testcase error: {0}")]
    Testcase(String),

    #[error("{binary} is not found; please install blackbox (e.g. `apt-get install blackbox`) or run with --disable-xvfb")]
    WindowManagerNotInstalled { binary: String },

    #[error("{binary} is not found; please install it or ensure it is on PATH")]
    ToolNotInstalled { binary: String },

    #[error("missing resource {}", .0.display())]
    MissingResource(PathBuf),

    #[error("signature service error: {0}")]
    Signature(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("interrupted")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReproError {
    /// Missing host tooling; the user has to install something before retrying.
    pub fn is_installation_error(&self) -> bool {
        matches!(
            self,
            Self::WindowManagerNotInstalled { .. } | Self::ToolNotInstalled { .. } | Self::MissingResource(_)
        )
    }
}
