//! Validated, resolved form of a [`GeneratorConfig`]

use chrono::Duration;
use tracing::debug;

use crate::config::{DayRange, GeneratorConfig, MinuteRange, MAX_RETRY_CAP};
use crate::error::{ConfigError, ConfigResult};
use crate::sampling::WeightedChoice;
use crate::types::{Channel, Device, Plan, Stage, UtcDateTime};

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;

fn check_probability(field: impl Into<String>, value: f64) -> ConfigResult<f64> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ProbabilityOutOfRange {
            field: field.into(),
            value,
        });
    }
    Ok(value)
}

fn check_range(field: &str, range: MinuteRange) -> ConfigResult<MinuteRange> {
    if range.min > range.max {
        return Err(ConfigError::InvalidRange {
            field: field.to_string(),
            min: range.min,
            max: range.max,
        });
    }
    Ok(range)
}

fn check_price(plan: Plan, value: f64) -> ConfigResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidPrice { plan, value });
    }
    Ok(value)
}

/// Upper bound on the minutes between `start_date` and a journey's last timestamp
fn horizon_minutes(
    signup_window_days: u32,
    max_gap_hours: u32,
    step: MinuteRange,
    retry: MinuteRange,
    max_retries: u32,
    cancellation_days: DayRange,
) -> u64 {
    let signup = u64::from(signup_window_days)
        .saturating_add(1)
        .saturating_mul(MINUTES_PER_DAY);
    let session = u64::from(max_gap_hours)
        .saturating_mul(MINUTES_PER_HOUR)
        .saturating_add(u64::from(step.max));
    let attempt = u64::from(step.max).saturating_add(u64::from(retry.max));
    let cancellation = u64::from(cancellation_days.max).saturating_mul(MINUTES_PER_DAY);

    signup
        .saturating_add(session.saturating_mul(Stage::TRANSITIONS.len() as u64))
        .saturating_add(attempt.saturating_mul(u64::from(max_retries) + 1))
        .saturating_add(u64::from(step.max))
        .saturating_add(cancellation)
}

/// Dense (channel, device, stage) → probability lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    values: [[[f64; Stage::TRANSITIONS.len()]; Device::ALL.len()]; Channel::ALL.len()],
}

impl ProbabilityTable {
    /// Resolve rules so that the most specific match wins; later rules win ties
    pub fn resolve(rules: &[crate::config::StageProbabilityRule]) -> ConfigResult<Self> {
        for (idx, rule) in rules.iter().enumerate() {
            if rule.stage == Stage::Signup {
                return Err(ConfigError::EntryStageRule);
            }
            check_probability(
                format!("stage_probabilities[{}].probability", idx),
                rule.probability,
            )?;
        }

        let mut values = [[[0.0; Stage::TRANSITIONS.len()]; Device::ALL.len()]; Channel::ALL.len()];
        for channel in Channel::ALL {
            for device in Device::ALL {
                for stage in Stage::TRANSITIONS {
                    let mut best: Option<(u8, f64)> = None;
                    for rule in rules.iter().filter(|r| r.matches(channel, device, stage)) {
                        let specificity = rule.specificity();
                        if best.map_or(true, |(s, _)| specificity >= s) {
                            best = Some((specificity, rule.probability));
                        }
                    }

                    let (_, probability) = best.ok_or(ConfigError::MissingProbability {
                        channel,
                        device,
                        stage,
                    })?;
                    values[channel.index()][device.index()][stage.index() - 1] = probability;
                }
            }
        }

        Ok(Self { values })
    }

    /// Probability of entering `stage` from the stage before it. Signup is always 1.
    pub fn get(&self, channel: Channel, device: Device, stage: Stage) -> f64 {
        match stage {
            Stage::Signup => 1.0,
            _ => self.values[channel.index()][device.index()][stage.index() - 1],
        }
    }
}

/// Everything the generator needs, checked and normalized once
#[derive(Debug, Clone)]
pub struct FunnelModel {
    pub user_count: u64,
    pub seed: u64,
    pub channels: WeightedChoice<Channel>,
    pub devices: WeightedChoice<Device>,
    pub probabilities: ProbabilityTable,
    payment_failure: [f64; Device::ALL.len()],
    pub max_retries: u32,
    pub abandon_probability: f64,
    pub start_date: UtcDateTime,
    pub signup_window_days: u32,
    pub session_gaps: WeightedChoice<u32>,
    pub step_minutes: MinuteRange,
    pub retry_minutes: MinuteRange,
    pub plans: WeightedChoice<Plan>,
    plan_prices: [f64; Plan::ALL.len()],
    cancellation: [f64; Plan::ALL.len()],
    pub cancellation_days: DayRange,
}

impl FunnelModel {
    /// Validate a configuration. Nothing is clamped: out-of-range values are errors.
    pub fn from_config(config: &GeneratorConfig) -> ConfigResult<Self> {
        if config.user_count == 0 {
            return Err(ConfigError::InvalidUserCount(config.user_count));
        }

        let channels = WeightedChoice::new(
            "channel_mix",
            config.channel_mix.iter().map(|(c, w)| (*c, *w)),
        )?;
        let devices = WeightedChoice::new(
            "device_mix",
            config.device_mix.iter().map(|(d, w)| (*d, *w)),
        )?;
        let probabilities = ProbabilityTable::resolve(&config.stage_probabilities)?;

        let mut payment_failure = [0.0; Device::ALL.len()];
        for device in Device::ALL {
            let rate = config
                .payment_failure_rate
                .get(&device)
                .copied()
                .ok_or(ConfigError::MissingPaymentFailureRate(device))?;
            payment_failure[device.index()] =
                check_probability(format!("payment_failure_rate.{}", device), rate)?;
        }

        let retry = &config.payment_retry;
        if retry.max_retries > MAX_RETRY_CAP {
            return Err(ConfigError::RetryCapExceeded {
                value: retry.max_retries,
                cap: MAX_RETRY_CAP,
            });
        }
        let abandon_probability = check_probability(
            "payment_retry.abandon_probability",
            retry.abandon_probability,
        )?;

        let timing = &config.timing;
        let session_gaps = WeightedChoice::new(
            "timing.session_gap_hours",
            timing.session_gap_hours.iter().map(|(h, w)| (*h, *w)),
        )?;
        let step_minutes = check_range("timing.step_minutes", timing.step_minutes)?;
        let retry_minutes = check_range("timing.retry_minutes", timing.retry_minutes)?;
        let cancellation_days = timing.cancellation_days;
        if cancellation_days.min > cancellation_days.max {
            return Err(ConfigError::InvalidRange {
                field: "timing.cancellation_days".to_string(),
                min: cancellation_days.min,
                max: cancellation_days.max,
            });
        }

        let plans = WeightedChoice::new(
            "plans",
            config.plans.iter().map(|(plan, c)| (*plan, c.weight)),
        )?;
        let mut plan_prices = [0.0; Plan::ALL.len()];
        let mut cancellation = [0.0; Plan::ALL.len()];
        for (plan, plan_config) in &config.plans {
            plan_prices[plan.index()] = check_price(*plan, plan_config.monthly_price)?;
            cancellation[plan.index()] = check_probability(
                format!("plans.{}.cancellation_probability", plan),
                plan_config.cancellation_probability,
            )?;
        }

        // Every journey must stay inside chrono's date range
        let horizon = horizon_minutes(
            timing.signup_window_days,
            session_gaps.categories().iter().copied().max().unwrap_or(0),
            step_minutes,
            retry_minutes,
            retry.max_retries,
            cancellation_days,
        );
        i64::try_from(horizon)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|span| timing.start_date.checked_add_signed(span))
            .ok_or(ConfigError::TimelineOverflow {
                start_date: timing.start_date,
                minutes: horizon,
            })?;

        debug!(
            "Validated config: {} users, seed {}, {} stage rules",
            config.user_count,
            config.random_seed,
            config.stage_probabilities.len()
        );

        Ok(Self {
            user_count: config.user_count,
            seed: config.random_seed,
            channels,
            devices,
            probabilities,
            payment_failure,
            max_retries: retry.max_retries,
            abandon_probability,
            start_date: timing.start_date,
            signup_window_days: timing.signup_window_days,
            session_gaps,
            step_minutes,
            retry_minutes,
            plans,
            plan_prices,
            cancellation,
            cancellation_days,
        })
    }

    /// Per-attempt payment failure probability for a device
    pub fn payment_failure_rate(&self, device: Device) -> f64 {
        self.payment_failure[device.index()]
    }

    /// Probability that checkout ends in an authorized payment.
    ///
    /// Attempt `k + 1` happens only after `k` failures the user did not
    /// abandon, so this is `(1 - f) * sum((f * (1 - a))^k)` over the allowed attempts.
    pub fn authorization_probability(&self, device: Device) -> f64 {
        let failure = self.payment_failure_rate(device);
        let retry = failure * (1.0 - self.abandon_probability);
        let reach: f64 = (0..=self.max_retries)
            .map(|k| retry.powi(k as i32))
            .sum();
        reach * (1.0 - failure)
    }

    pub fn plan_price(&self, plan: Plan) -> f64 {
        self.plan_prices[plan.index()]
    }

    pub fn cancellation_probability(&self, plan: Plan) -> f64 {
        self.cancellation[plan.index()]
    }

    /// Probability of entering `stage`
    pub fn stage_probability(&self, channel: Channel, device: Device, stage: Stage) -> f64 {
        self.probabilities.get(channel, device, stage)
    }

    /// Share of all users expected to be in a (channel, device) segment
    pub fn segment_weight(&self, channel: Channel, device: Device) -> f64 {
        self.channels.probability(channel) * self.devices.probability(device)
    }
}
