//! Conversion tables, segment breakdowns and revenue estimates
//!
//! All rates are percentages in `0.0..=100.0`.

use funnelsim_core::{Channel, Device, EventRow, Plan, Stage, Subscription};
use serde::Serialize;
use tracing::debug;

use crate::outcome::{derive_outcomes, FunnelOutcome};

const MONTHS_PER_YEAR: f64 = 12.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64) * 100.0
}

/// Options for [`FunnelReport::build`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Flat monthly price per subscription. Takes precedence over a
    /// subscriptions table when both are given.
    pub monthly_price: Option<f64>,
    /// Percentage-point improvement used for opportunity sizing
    pub uplift_points: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            monthly_price: None,
            uplift_points: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageConversion {
    pub stage: Stage,
    pub users: u64,
    /// Percentage of the previous stage that reached this one
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
    /// Percentage of all signups that reached this stage
    pub overall_rate: f64,
    pub average_hours_from_previous: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentBreakdown {
    pub segment: String,
    pub users: u64,
    /// Users per stage, in `Stage::ALL` order
    pub stage_users: Vec<u64>,
    /// Activated users as a percentage of segment signups
    pub activation_rate: f64,
    /// Subscribers as a percentage of segment signups
    pub paid_conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStats {
    pub device: Device,
    pub trial_users: u64,
    pub users_with_failure: u64,
    pub failure_rate: f64,
    pub churned_users: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOpportunity {
    pub stage: Stage,
    pub uplift_points: f64,
    pub additional_subscribers: f64,
    pub additional_arr: f64,
}

/// Where subscription revenue figures come from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RevenueBasis {
    /// Every subscriber pays the same monthly price
    FlatPrice { monthly_price: f64 },
    /// Per-subscriber plan and MRR from the subscriptions table
    PlanMix,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanRevenue {
    pub plan: Plan,
    pub subscribers: u64,
    pub cancelled: u64,
    /// MRR of subscribers on this plan that have not cancelled
    pub mrr: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueEstimate {
    pub basis: RevenueBasis,
    pub subscribers: u64,
    pub cancelled: u64,
    /// Monthly recurring revenue retained after cancellations
    pub mrr: f64,
    pub arr: f64,
    /// Retained MRR per new subscriber, used to price opportunities
    pub average_mrr: f64,
    /// Empty for a flat price
    pub plans: Vec<PlanRevenue>,
    pub opportunities: Vec<StageOpportunity>,
}

/// Descriptive analytics over a set of funnel outcomes
#[derive(Debug, Clone, Serialize)]
pub struct FunnelReport {
    pub total_users: u64,
    pub stages: Vec<StageConversion>,
    pub by_channel: Vec<SegmentBreakdown>,
    pub by_device: Vec<SegmentBreakdown>,
    pub payments: Vec<PaymentStats>,
    pub revenue: Option<RevenueEstimate>,
}

impl FunnelReport {
    /// Derive outcomes from event-log rows, then build the report
    pub fn from_rows(rows: &[EventRow], options: &ReportOptions) -> Self {
        Self::build(&derive_outcomes(rows), options)
    }

    /// Derive outcomes from event-log rows and price revenue from the
    /// subscriptions table, unless `options` carries a flat price
    pub fn from_dataset(
        rows: &[EventRow],
        subscriptions: &[Subscription],
        options: &ReportOptions,
    ) -> Self {
        Self::build_with(&derive_outcomes(rows), Some(subscriptions), options)
    }

    pub fn build(outcomes: &[FunnelOutcome], options: &ReportOptions) -> Self {
        Self::build_with(outcomes, None, options)
    }

    fn build_with(
        outcomes: &[FunnelOutcome],
        subscriptions: Option<&[Subscription]>,
        options: &ReportOptions,
    ) -> Self {
        let total_users = outcomes.len() as u64;
        let stages = stage_conversions(outcomes);

        let by_channel = Channel::ALL
            .into_iter()
            .map(|channel| {
                segment_breakdown(
                    channel.to_string(),
                    outcomes.iter().filter(|o| o.channel == channel),
                )
            })
            .filter(|b| b.users > 0)
            .collect();

        let by_device = Device::ALL
            .into_iter()
            .map(|device| {
                segment_breakdown(
                    device.to_string(),
                    outcomes.iter().filter(|o| o.device == device),
                )
            })
            .filter(|b| b.users > 0)
            .collect();

        let payments = Device::ALL
            .into_iter()
            .map(|device| payment_stats(device, outcomes))
            .collect();

        let revenue = match (options.monthly_price, subscriptions) {
            (Some(price), _) => Some(flat_price_revenue(&stages, price, options.uplift_points)),
            (None, Some(subscriptions)) => {
                Some(plan_mix_revenue(&stages, subscriptions, options.uplift_points))
            }
            (None, None) => None,
        };

        debug!(
            "Built funnel report over {} users ({} stages)",
            total_users,
            stages.len()
        );

        Self {
            total_users,
            stages,
            by_channel,
            by_device,
            payments,
            revenue,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageConversion> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Users who reached `stage`
    pub fn users_at(&self, stage: Stage) -> u64 {
        self.stage(stage).map_or(0, |s| s.users)
    }
}

fn stage_conversions(outcomes: &[FunnelOutcome]) -> Vec<StageConversion> {
    let total = outcomes.len() as u64;
    let mut previous_users = total;
    let mut conversions = Vec::with_capacity(Stage::ALL.len());

    for stage in Stage::ALL {
        let users = outcomes.iter().filter(|o| o.reached(stage)).count() as u64;
        let conversion_rate = percent(users, previous_users);

        let durations: Vec<i64> = outcomes
            .iter()
            .filter_map(|o| o.seconds_from_previous(stage))
            .filter(|seconds| *seconds >= 0)
            .collect();
        let average_hours_from_previous = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64 / SECONDS_PER_HOUR
        };

        conversions.push(StageConversion {
            stage,
            users,
            conversion_rate,
            drop_off_rate: if previous_users > 0 {
                100.0 - conversion_rate
            } else {
                0.0
            },
            overall_rate: percent(users, total),
            average_hours_from_previous,
        });
        previous_users = users;
    }

    conversions
}

fn segment_breakdown<'a, I>(segment: String, outcomes: I) -> SegmentBreakdown
where
    I: Iterator<Item = &'a FunnelOutcome>,
{
    let mut stage_users = vec![0u64; Stage::ALL.len()];
    let mut users = 0;
    for outcome in outcomes {
        users += 1;
        for stage in Stage::ALL {
            if outcome.reached(stage) {
                stage_users[stage.index()] += 1;
            }
        }
    }

    SegmentBreakdown {
        segment,
        users,
        activation_rate: percent(stage_users[Stage::Activation.index()], users),
        paid_conversion_rate: percent(stage_users[Stage::Subscription.index()], users),
        stage_users,
    }
}

fn payment_stats(device: Device, outcomes: &[FunnelOutcome]) -> PaymentStats {
    let trial: Vec<&FunnelOutcome> = outcomes
        .iter()
        .filter(|o| o.device == device && o.reached(Stage::Trial))
        .collect();
    let trial_users = trial.len() as u64;
    let users_with_failure = trial.iter().filter(|o| o.payment_failures > 0).count() as u64;
    let churned_users = trial.iter().filter(|o| o.churned).count() as u64;

    PaymentStats {
        device,
        trial_users,
        users_with_failure,
        failure_rate: percent(users_with_failure, trial_users),
        churned_users,
    }
}

fn users_at(stages: &[StageConversion], stage: Stage) -> u64 {
    stages
        .iter()
        .find(|s| s.stage == stage)
        .map_or(0, |s| s.users)
}

fn flat_price_revenue(
    stages: &[StageConversion],
    monthly_price: f64,
    uplift_points: f64,
) -> RevenueEstimate {
    let subscribers = users_at(stages, Stage::Subscription);
    let mrr = subscribers as f64 * monthly_price;

    RevenueEstimate {
        basis: RevenueBasis::FlatPrice { monthly_price },
        subscribers,
        cancelled: 0,
        mrr,
        arr: mrr * MONTHS_PER_YEAR,
        average_mrr: monthly_price,
        plans: Vec::new(),
        opportunities: opportunities(stages, monthly_price, uplift_points),
    }
}

fn plan_mix_revenue(
    stages: &[StageConversion],
    subscriptions: &[Subscription],
    uplift_points: f64,
) -> RevenueEstimate {
    let plans: Vec<PlanRevenue> = Plan::ALL
        .into_iter()
        .map(|plan| {
            let on_plan = subscriptions.iter().filter(|s| s.plan == plan);
            PlanRevenue {
                plan,
                subscribers: on_plan.clone().count() as u64,
                cancelled: on_plan.clone().filter(|s| !s.is_active()).count() as u64,
                mrr: on_plan.filter(|s| s.is_active()).map(|s| s.mrr).sum(),
            }
        })
        .filter(|p| p.subscribers > 0)
        .collect();

    let mrr: f64 = plans.iter().map(|p| p.mrr).sum();
    let average_mrr = if subscriptions.is_empty() {
        0.0
    } else {
        mrr / subscriptions.len() as f64
    };

    RevenueEstimate {
        basis: RevenueBasis::PlanMix,
        subscribers: users_at(stages, Stage::Subscription),
        cancelled: plans.iter().map(|p| p.cancelled).sum(),
        mrr,
        arr: mrr * MONTHS_PER_YEAR,
        average_mrr,
        plans,
        opportunities: opportunities(stages, average_mrr, uplift_points),
    }
}

/// Per-stage opportunity sizing.
///
/// Raising the conversion into a stage by `uplift_points` (capped at 100%)
/// while holding every downstream rate constant yields
/// `previous_users * uplift * (subscribers / stage_users)` extra subscribers.
fn opportunities(
    stages: &[StageConversion],
    average_mrr: f64,
    uplift_points: f64,
) -> Vec<StageOpportunity> {
    let subscribers = users_at(stages, Stage::Subscription);
    let annual_value = average_mrr * MONTHS_PER_YEAR;

    Stage::TRANSITIONS
        .into_iter()
        .filter_map(|stage| {
            let previous_users = users_at(stages, stage.previous()?);
            let stage_users = users_at(stages, stage);
            if previous_users == 0 {
                return None;
            }

            let current_rate = stage_users as f64 / previous_users as f64;
            let improved_rate = (current_rate + uplift_points / 100.0).min(1.0);
            let downstream = if stage_users > 0 {
                subscribers as f64 / stage_users as f64
            } else {
                0.0
            };
            let additional_subscribers =
                previous_users as f64 * (improved_rate - current_rate) * downstream;

            Some(StageOpportunity {
                stage,
                uplift_points,
                additional_subscribers,
                additional_arr: additional_subscribers * annual_value,
            })
        })
        .collect()
}
