//! Descriptive analytics over a generated event log
//!
//! Everything here works from [`EventRow`](funnelsim_core::EventRow)s read
//! back from disk. Outcomes are derived, never stored.

pub mod audit;
pub mod outcome;
pub mod report;

pub use audit::{audit_event_log, AuditReport, Violation, ViolationKind};
pub use outcome::{derive_outcomes, FunnelOutcome};
pub use report::{
    FunnelReport, PaymentStats, PlanRevenue, ReportOptions, RevenueBasis, RevenueEstimate,
    SegmentBreakdown, StageConversion, StageOpportunity,
};
