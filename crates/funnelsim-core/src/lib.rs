//! Core types shared across all funnelsim crates
//!
//! - **Types**: users, events, channels, devices and funnel stages
//! - **Config**: the generator configuration and its calibrated defaults
//! - **Model**: the validated configuration, resolved into lookup tables
//! - **Event log**: CSV codec for events, users and subscriptions, with atomic finalize

pub mod config;
pub mod error;
pub mod event_log;
pub mod model;
pub mod sampling;
pub mod types;

pub use config::{
    DayRange, GeneratorConfig, MinuteRange, PaymentRetryConfig, PlanConfig, StageProbabilityRule,
    TimingConfig, MAX_RETRY_CAP,
};
pub use error::{ConfigError, ConfigResult, FunnelError, FunnelResult, UnknownVariant};
pub use event_log::{persist_all, read_csv, write_csv, AtomicCsvWriter, CsvRow, SealedCsv};
pub use model::{FunnelModel, ProbabilityTable};
pub use sampling::WeightedChoice;
pub use types::*;

// Re-export external dependencies
pub use chrono;
