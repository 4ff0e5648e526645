//! Consistency checks over a persisted event log

use std::collections::BTreeMap;
use std::fmt;

use funnelsim_core::{Channel, Device, EventRow, EventType, Stage, UtcDateTime};
use serde::Serialize;

/// Rule broken by a user's event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ViolationKind {
    /// An event is older than the one before it
    TimestampRegression {
        previous: UtcDateTime,
        found: UtcDateTime,
    },
    /// A stage was entered before the stage it depends on
    MissingPrecedingStage { stage: Stage, requires: Stage },
    DuplicateSignup,
    DuplicateSubscription,
    /// More failed payment attempts than `max_retries + 1` allows
    RetryCapExceeded { failures: u32, allowed: u32 },
    /// Channel or device differs between rows of the same user
    SegmentChanged,
    /// Payment or churn event before the user started a trial
    CheckoutWithoutTrial { event: EventType },
    /// Subscription without a payment attempt before it
    SubscriptionWithoutPayment,
}

impl ViolationKind {
    /// Dense slot for once-per-user reporting
    fn slot(&self) -> usize {
        match self {
            ViolationKind::TimestampRegression { .. } => 0,
            ViolationKind::MissingPrecedingStage { .. } => 1,
            ViolationKind::DuplicateSignup => 2,
            ViolationKind::DuplicateSubscription => 3,
            ViolationKind::RetryCapExceeded { .. } => 4,
            ViolationKind::SegmentChanged => 5,
            ViolationKind::CheckoutWithoutTrial { .. } => 6,
            ViolationKind::SubscriptionWithoutPayment => 7,
        }
    }
}

const KIND_COUNT: usize = 8;

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::TimestampRegression { previous, found } => {
                write!(f, "timestamp {} is before previous event at {}", found, previous)
            }
            ViolationKind::MissingPrecedingStage { stage, requires } => {
                write!(f, "{} reached without {}", stage, requires)
            }
            ViolationKind::DuplicateSignup => write!(f, "more than one signup"),
            ViolationKind::DuplicateSubscription => write!(f, "more than one subscription"),
            ViolationKind::RetryCapExceeded { failures, allowed } => {
                write!(f, "{} payment failures, at most {} allowed", failures, allowed)
            }
            ViolationKind::SegmentChanged => write!(f, "channel or device changed"),
            ViolationKind::CheckoutWithoutTrial { event } => {
                write!(f, "{} before trial_start", event)
            }
            ViolationKind::SubscriptionWithoutPayment => {
                write!(f, "subscription without a payment attempt")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub user_id: u64,
    pub kind: ViolationKind,
}

/// Result of [`audit_event_log`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub users_checked: u64,
    pub events_checked: u64,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

struct UserState {
    channel: Channel,
    device: Device,
    last_timestamp: UtcDateTime,
    seen: [bool; 5],
    signups: u32,
    subscriptions: u32,
    payment_attempts: u32,
    failures: u32,
    reported: [bool; KIND_COUNT],
}

impl UserState {
    fn new(row: &EventRow) -> Self {
        Self {
            channel: row.channel,
            device: row.device,
            last_timestamp: row.timestamp,
            seen: [false; 5],
            signups: 0,
            subscriptions: 0,
            payment_attempts: 0,
            failures: 0,
            reported: [false; KIND_COUNT],
        }
    }

    /// Observe one row, returning every rule it breaks
    fn observe(&mut self, row: &EventRow, max_failures: Option<u32>) -> Vec<ViolationKind> {
        let mut found = Vec::new();

        if row.channel != self.channel || row.device != self.device {
            found.push(ViolationKind::SegmentChanged);
        }

        if row.timestamp < self.last_timestamp {
            found.push(ViolationKind::TimestampRegression {
                previous: self.last_timestamp,
                found: row.timestamp,
            });
        }
        self.last_timestamp = self.last_timestamp.max(row.timestamp);

        if let Some(stage) = row.event_type.stage() {
            if let Some(requires) = stage.previous() {
                if !self.seen[requires.index()] {
                    found.push(ViolationKind::MissingPrecedingStage { stage, requires });
                }
            }
            self.seen[stage.index()] = true;
        }

        match row.event_type {
            EventType::PaymentAttempt | EventType::PaymentFailure | EventType::Churn
                if !self.seen[Stage::Trial.index()] =>
            {
                found.push(ViolationKind::CheckoutWithoutTrial {
                    event: row.event_type,
                });
            }
            _ => {}
        }

        match row.event_type {
            EventType::Signup => {
                self.signups += 1;
                if self.signups > 1 {
                    found.push(ViolationKind::DuplicateSignup);
                }
            }
            EventType::Subscription => {
                self.subscriptions += 1;
                if self.subscriptions > 1 {
                    found.push(ViolationKind::DuplicateSubscription);
                }
                if self.payment_attempts == 0 {
                    found.push(ViolationKind::SubscriptionWithoutPayment);
                }
            }
            EventType::PaymentAttempt => self.payment_attempts += 1,
            EventType::PaymentFailure => {
                self.failures += 1;
                if let Some(allowed) = max_failures {
                    if self.failures > allowed {
                        found.push(ViolationKind::RetryCapExceeded {
                            failures: self.failures,
                            allowed,
                        });
                    }
                }
            }
            _ => {}
        }

        // Each kind of violation is reported once per user
        found.retain(|kind| !std::mem::replace(&mut self.reported[kind.slot()], true));
        found
    }
}

/// Check per-user ordering, stage precedence and payment bounds.
///
/// Rows are taken in file order. `max_retries` enables the retry cap check.
/// Each kind of violation is reported at most once per user, at its first
/// offending row.
pub fn audit_event_log(rows: &[EventRow], max_retries: Option<u32>) -> AuditReport {
    let max_failures = max_retries.map(|retries| retries.saturating_add(1));
    let mut states: BTreeMap<u64, UserState> = BTreeMap::new();
    let mut violations = Vec::new();

    for row in rows {
        let state = states
            .entry(row.user_id)
            .or_insert_with(|| UserState::new(row));
        violations.extend(
            state
                .observe(row, max_failures)
                .into_iter()
                .map(|kind| Violation {
                    user_id: row.user_id,
                    kind,
                }),
        );
    }

    AuditReport {
        users_checked: states.len() as u64,
        events_checked: rows.len() as u64,
        violations,
    }
}
