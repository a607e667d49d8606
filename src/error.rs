//! Error kinds shared by every pipeline stage.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("audio format error: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("insufficient quota: need {required} characters, {available} available")]
    InsufficientQuota { required: u64, available: u64 },
}

impl Error {
    /// Short name of the error kind, as shown to the user.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFoundError",
            Self::Network(_) => "NetworkError",
            Self::Upstream(_) => "UpstreamError",
            Self::Format(_) => "FormatError",
            Self::Io(_) => "IOError",
            Self::Timeout(_) => "TimeoutError",
            Self::Config(_) => "ConfigError",
            Self::InsufficientQuota { .. } => "InsufficientQuota",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() || e.is_status() {
            Self::Upstream(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => Self::Io(io),
            other => Self::Format(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Normalize,
    Quota,
    Preview,
    Synthesize,
    Assemble,
    Cache,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Normalize => write!(f, "normalize"),
            Self::Quota => write!(f, "quota"),
            Self::Preview => write!(f, "preview"),
            Self::Synthesize => write!(f, "synthesize"),
            Self::Assemble => write!(f, "assemble"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

/// An [`Error`] tagged with the stage it came from.
#[derive(Debug, Error)]
#[error("{stage} stage failed ({}): {source}", .source.kind())]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

/// Attach a [`Stage`] to a crate [`Result`].
pub trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}
