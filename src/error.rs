use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("missing configuration value {0}")]
    ConfigMissing(String),

    #[error("invalid configuration value {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    #[error("weather source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed weather response: {0}")]
    MalformedResponse(String),

    #[error("time-series write failed: {0}")]
    SinkWriteFailed(String),
}

impl IngestError {
    pub fn config_invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Stage of a cycle, used to attribute failures in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Flatten,
    Timestamp,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Flatten => "flatten",
            Stage::Timestamp => "timestamp",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct CycleError {
    pub stage: Stage,
    #[source]
    pub source: IngestError,
}

impl CycleError {
    pub fn at(stage: Stage) -> impl FnOnce(IngestError) -> Self {
        move |source| Self { stage, source }
    }
}
