//! Per-user funnel outcomes derived from the event log
//!
//! Outcomes are never stored. They are recomputed from event rows, so they
//! always agree with the log they came from.

use std::collections::BTreeMap;

use funnelsim_core::{Channel, Device, EventRow, EventType, Stage, UtcDateTime};
use serde::Serialize;

/// How far one user got, derived from their events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunnelOutcome {
    pub user_id: u64,
    pub channel: Channel,
    pub device: Device,
    /// Earliest entry timestamp per stage, indexed by `Stage::index`
    pub reached_at: [Option<UtcDateTime>; 5],
    pub payment_attempts: u32,
    pub payment_failures: u32,
    pub churned: bool,
}

impl FunnelOutcome {
    fn new(row: &EventRow) -> Self {
        Self {
            user_id: row.user_id,
            channel: row.channel,
            device: row.device,
            reached_at: [None; 5],
            payment_attempts: 0,
            payment_failures: 0,
            churned: false,
        }
    }

    fn apply(&mut self, row: &EventRow) {
        if let Some(stage) = row.event_type.stage() {
            let slot = &mut self.reached_at[stage.index()];
            if slot.map_or(true, |existing| row.timestamp < existing) {
                *slot = Some(row.timestamp);
            }
        }

        match row.event_type {
            EventType::PaymentAttempt => self.payment_attempts += 1,
            EventType::PaymentFailure => self.payment_failures += 1,
            EventType::Churn => self.churned = true,
            _ => {}
        }
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.reached_at[stage.index()].is_some()
    }

    pub fn reached_at(&self, stage: Stage) -> Option<UtcDateTime> {
        self.reached_at[stage.index()]
    }

    /// Deepest stage with an entry event
    pub fn furthest_stage(&self) -> Stage {
        Stage::ALL
            .into_iter()
            .rev()
            .find(|stage| self.reached(*stage))
            .unwrap_or(Stage::Signup)
    }

    /// Seconds between entering the previous stage and entering `stage`
    pub fn seconds_from_previous(&self, stage: Stage) -> Option<i64> {
        let previous = self.reached_at(stage.previous()?)?;
        let current = self.reached_at(stage)?;
        Some(current.signed_duration_since(previous).num_seconds())
    }
}

/// One outcome per user, ordered by user id
pub fn derive_outcomes(rows: &[EventRow]) -> Vec<FunnelOutcome> {
    let mut by_user: BTreeMap<u64, FunnelOutcome> = BTreeMap::new();
    for row in rows {
        by_user
            .entry(row.user_id)
            .or_insert_with(|| FunnelOutcome::new(row))
            .apply(row);
    }
    by_user.into_values().collect()
}
