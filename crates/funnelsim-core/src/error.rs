//! Error types for configuration, generation and event-log I/O

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Channel, Device, Plan, Stage, UtcDateTime};

/// Result type for configuration loading and validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for operations that touch the event log
pub type FunnelResult<T> = Result<T, FunnelError>;

/// A categorical value that does not name a known variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Configuration errors. Raised before any generation begins.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML could not be parsed into a configuration
    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON could not be parsed into a configuration
    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("user_count must be at least 1, got {0}")]
    InvalidUserCount(u64),

    /// Probability or rate outside [0, 1] (never clamped)
    #[error("{field} must be a probability within [0, 1], got {value}")]
    ProbabilityOutOfRange { field: String, value: f64 },

    #[error("weight for {field} must be finite and non-negative, got {value}")]
    InvalidWeight { field: String, value: f64 },

    /// Every weight in a categorical distribution is zero
    #[error("{0} has no category with a positive weight")]
    EmptyDistribution(String),

    #[error("signup is the entry stage and cannot carry a transition probability")]
    EntryStageRule,

    /// No stage probability rule covers a segment
    #[error("no stage probability for channel={channel}, device={device}, stage={stage}")]
    MissingProbability {
        channel: Channel,
        device: Device,
        stage: Stage,
    },

    #[error("payment_failure_rate has no entry for device {0}")]
    MissingPaymentFailureRate(Device),

    #[error("{field} range is empty: min {min} > max {max}")]
    InvalidRange { field: String, min: u32, max: u32 },

    #[error("payment_retry.max_retries must be at most {cap}, got {value}")]
    RetryCapExceeded { value: u32, cap: u32 },

    #[error("plans.{plan}.monthly_price must be finite and non-negative, got {value}")]
    InvalidPrice { plan: Plan, value: f64 },

    /// The latest possible event would fall outside the representable date range
    #[error(
        "timing allows events up to {minutes} minutes after {start_date}, \
         beyond the supported date range"
    )]
    TimelineOverflow { start_date: UtcDateTime, minutes: u64 },
}

/// Errors surfaced while generating, persisting or reading event logs
#[derive(Error, Debug)]
pub enum FunnelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Temporary file could not be moved onto its final path
    #[error("Failed to finalize {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The header line does not match the expected schema
    #[error("{path}: unexpected header '{found}', expected '{expected}'")]
    Header {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    /// A data row could not be parsed
    #[error("{path}:{line}: {message}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        message: String,
    },
}
