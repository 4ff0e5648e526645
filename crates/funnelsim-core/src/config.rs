//! Generator configuration
//!
//! A [`GeneratorConfig`] can be loaded from YAML or JSON. Every field has a
//! default, so a file only needs to name what it changes. Defaults are
//! calibrated so that roughly 84% of signups start onboarding and roughly
//! 70.6% of those activate.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::FunnelModel;
use crate::types::{Channel, Device, Plan, Stage, UtcDateTime};

/// Hard ceiling for `payment_retry.max_retries`
pub const MAX_RETRY_CAP: u32 = 10;

fn default_user_count() -> u64 {
    20_000
}

fn default_random_seed() -> u64 {
    42
}

fn default_channel_mix() -> BTreeMap<Channel, f64> {
    BTreeMap::from([
        (Channel::Organic, 0.30),
        (Channel::PaidSearch, 0.20),
        (Channel::PaidSocial, 0.25),
        (Channel::Partner, 0.15),
        (Channel::Referral, 0.10),
    ])
}

fn default_device_mix() -> BTreeMap<Device, f64> {
    BTreeMap::from([(Device::Web, 0.70), (Device::Mobile, 0.30)])
}

fn default_payment_failure_rate() -> BTreeMap<Device, f64> {
    BTreeMap::from([(Device::Web, 0.055), (Device::Mobile, 0.137)])
}

fn default_stage_probabilities() -> Vec<StageProbabilityRule> {
    // (channel, onboarding, activation on web, trial, subscription)
    const BY_CHANNEL: [(Channel, f64, f64, f64, f64); 5] = [
        (Channel::Referral, 0.90, 0.81, 0.65, 0.47),
        (Channel::Organic, 0.88, 0.77, 0.65, 0.45),
        (Channel::PaidSearch, 0.85, 0.73, 0.62, 0.42),
        (Channel::Partner, 0.82, 0.69, 0.62, 0.42),
        (Channel::PaidSocial, 0.78, 0.635, 0.60, 0.37),
    ];
    const MOBILE_ACTIVATION_PENALTY: f64 = 0.05;

    let mut rules = Vec::new();
    for (channel, onboarding, activation, trial, subscription) in BY_CHANNEL {
        rules.push(StageProbabilityRule::for_channel(channel, Stage::Onboarding, onboarding));
        rules.push(StageProbabilityRule::for_channel(channel, Stage::Activation, activation));
        rules.push(StageProbabilityRule::for_segment(
            channel,
            Device::Mobile,
            Stage::Activation,
            activation - MOBILE_ACTIVATION_PENALTY,
        ));
        rules.push(StageProbabilityRule::for_channel(channel, Stage::Trial, trial));
        rules.push(StageProbabilityRule::for_channel(
            channel,
            Stage::Subscription,
            subscription,
        ));
    }
    rules
}

fn default_max_retries() -> u32 {
    2
}

fn default_abandon_probability() -> f64 {
    0.65
}

fn default_plans() -> BTreeMap<Plan, PlanConfig> {
    BTreeMap::from([
        (
            Plan::Starter,
            PlanConfig {
                weight: 0.35,
                monthly_price: 29.0,
                cancellation_probability: 0.30,
            },
        ),
        (
            Plan::Pro,
            PlanConfig {
                weight: 0.50,
                monthly_price: 79.0,
                cancellation_probability: 0.18,
            },
        ),
        (
            Plan::Business,
            PlanConfig {
                weight: 0.15,
                monthly_price: 199.0,
                cancellation_probability: 0.10,
            },
        ),
    ])
}

fn default_start_date() -> UtcDateTime {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn default_signup_window_days() -> u32 {
    90
}

fn default_session_gap_hours() -> BTreeMap<u32, f64> {
    BTreeMap::from([
        (0, 0.20),
        (1, 0.20),
        (3, 0.20),
        (8, 0.15),
        (24, 0.18),
        (48, 0.07),
    ])
}

fn default_step_minutes() -> MinuteRange {
    MinuteRange { min: 1, max: 30 }
}

fn default_retry_minutes() -> MinuteRange {
    MinuteRange { min: 3, max: 25 }
}

fn default_cancellation_days() -> DayRange {
    DayRange { min: 30, max: 75 }
}

/// Complete generator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    /// Number of users to simulate
    #[serde(default = "default_user_count")]
    pub user_count: u64,

    /// Seed for every stochastic decision
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Acquisition channel weights (need not sum to 1)
    #[serde(default = "default_channel_mix")]
    pub channel_mix: BTreeMap<Channel, f64>,

    /// Device weights (need not sum to 1)
    #[serde(default = "default_device_mix")]
    pub device_mix: BTreeMap<Device, f64>,

    /// Transition probability rules; the most specific match wins
    #[serde(default = "default_stage_probabilities")]
    pub stage_probabilities: Vec<StageProbabilityRule>,

    /// Per-attempt payment failure probability by device
    #[serde(default = "default_payment_failure_rate")]
    pub payment_failure_rate: BTreeMap<Device, f64>,

    #[serde(default)]
    pub payment_retry: PaymentRetryConfig,

    /// Plans a converting trial can pick, with their mix and cancellation odds
    #[serde(default = "default_plans")]
    pub plans: BTreeMap<Plan, PlanConfig>,

    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            user_count: default_user_count(),
            random_seed: default_random_seed(),
            channel_mix: default_channel_mix(),
            device_mix: default_device_mix(),
            stage_probabilities: default_stage_probabilities(),
            payment_failure_rate: default_payment_failure_rate(),
            payment_retry: PaymentRetryConfig::default(),
            plans: default_plans(),
            timing: TimingConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file. `.json` is read as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Serialize configuration to YAML string
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the configuration and resolve it into sampling structures
    pub fn validate(&self) -> ConfigResult<FunnelModel> {
        FunnelModel::from_config(self)
    }
}

/// Probability of entering `stage`, optionally scoped to a channel and/or device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageProbabilityRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,

    pub stage: Stage,

    pub probability: f64,
}

impl StageProbabilityRule {
    /// Rule applying to every segment
    pub fn any(stage: Stage, probability: f64) -> Self {
        Self {
            channel: None,
            device: None,
            stage,
            probability,
        }
    }

    pub fn for_channel(channel: Channel, stage: Stage, probability: f64) -> Self {
        Self {
            channel: Some(channel),
            ..Self::any(stage, probability)
        }
    }

    pub fn for_device(device: Device, stage: Stage, probability: f64) -> Self {
        Self {
            device: Some(device),
            ..Self::any(stage, probability)
        }
    }

    pub fn for_segment(channel: Channel, device: Device, stage: Stage, probability: f64) -> Self {
        Self {
            channel: Some(channel),
            device: Some(device),
            stage,
            probability,
        }
    }

    /// Whether this rule covers the given segment and stage
    pub fn matches(&self, channel: Channel, device: Device, stage: Stage) -> bool {
        self.stage == stage
            && self.channel.map_or(true, |c| c == channel)
            && self.device.map_or(true, |d| d == device)
    }

    /// channel+device (3) > channel (2) > device (1) > neither (0)
    pub fn specificity(&self) -> u8 {
        match (self.channel.is_some(), self.device.is_some()) {
            (true, true) => 3,
            (true, false) => 2,
            (false, true) => 1,
            (false, false) => 0,
        }
    }
}

/// Bounded payment retry behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRetryConfig {
    /// Retries allowed after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Probability that a user gives up right after a failed attempt
    #[serde(default = "default_abandon_probability")]
    pub abandon_probability: f64,
}

impl Default for PaymentRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            abandon_probability: default_abandon_probability(),
        }
    }
}

/// One subscription plan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlanConfig {
    /// Relative share of new subscriptions
    pub weight: f64,
    pub monthly_price: f64,
    /// Probability that a subscriber on this plan later cancels
    pub cancellation_probability: f64,
}

/// Inclusive range of whole minutes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinuteRange {
    pub min: u32,
    pub max: u32,
}

/// Inclusive range of whole days
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayRange {
    pub min: u32,
    pub max: u32,
}

/// Clock settings for signup dates and inter-event delays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Earliest possible signup timestamp
    #[serde(default = "default_start_date")]
    pub start_date: UtcDateTime,

    /// Signups are spread over `start_date + 0..=signup_window_days` days
    #[serde(default = "default_signup_window_days")]
    pub signup_window_days: u32,

    /// Weighted session gap before each stage, in hours
    #[serde(default = "default_session_gap_hours")]
    pub session_gap_hours: BTreeMap<u32, f64>,

    /// Delay between consecutive steps within a session
    #[serde(default = "default_step_minutes")]
    pub step_minutes: MinuteRange,

    /// Delay between a failed payment and the next action
    #[serde(default = "default_retry_minutes")]
    pub retry_minutes: MinuteRange,

    /// Days between a subscription and its cancellation
    #[serde(default = "default_cancellation_days")]
    pub cancellation_days: DayRange,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            signup_window_days: default_signup_window_days(),
            session_gap_hours: default_session_gap_hours(),
            step_minutes: default_step_minutes(),
            retry_minutes: default_retry_minutes(),
            cancellation_days: default_cancellation_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_yaml_keeps_defaults() {
        let yaml = r#"
user_count: 1000
random_seed: 7
channel_mix:
  organic: 1.0
stage_probabilities:
  - stage: onboarding
    probability: 0.8
  - stage: activation
    probability: 0.8
  - channel: organic
    device: mobile
    stage: activation
    probability: 0.5
  - stage: trial
    probability: 0.8
  - stage: subscription
    probability: 0.8
"#;

        let config = GeneratorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.user_count, 1000);
        assert_eq!(config.random_seed, 7);
        assert_eq!(config.channel_mix.len(), 1);
        assert_eq!(config.stage_probabilities.len(), 5);
        assert_eq!(config.stage_probabilities[2].specificity(), 3);
        assert_eq!(config.device_mix, default_device_mix());
        assert_eq!(config.payment_retry.max_retries, 2);
        assert_eq!(config.timing.signup_window_days, 90);
        assert_eq!(config.plans, default_plans());
        assert_eq!(config.timing.cancellation_days, default_cancellation_days());
    }

    #[test]
    fn test_plans_from_yaml() {
        let yaml = r#"
plans:
  pro:
    weight: 1.0
    monthly_price: 99.0
    cancellation_probability: 0.2
timing:
  cancellation_days: {min: 10, max: 20}
"#;
        let config = GeneratorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.plans.len(), 1);
        assert_eq!(config.plans[&Plan::Pro].monthly_price, 99.0);
        assert_eq!(config.timing.cancellation_days, DayRange { min: 10, max: 20 });
    }

    #[test]
    fn test_negative_user_count_fails_to_parse() {
        let err = GeneratorConfig::from_yaml("user_count: -5").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_yaml_round_trip_preserves_config() {
        let config = GeneratorConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = GeneratorConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_json_config() {
        let json = r#"{
            "user_count": 10,
            "payment_failure_rate": {"web": 0.1, "mobile": 0.2},
            "timing": {"session_gap_hours": {"0": 1.0}}
        }"#;
        let config = GeneratorConfig::from_json(json).unwrap();
        assert_eq!(config.user_count, 10);
        assert_eq!(config.payment_failure_rate[&Device::Mobile], 0.2);
        assert_eq!(config.timing.session_gap_hours.len(), 1);
        assert_eq!(config.timing.step_minutes, default_step_minutes());
    }

    #[test]
    fn test_rule_matching_and_specificity() {
        let rule = StageProbabilityRule::for_device(Device::Mobile, Stage::Trial, 0.3);
        assert!(rule.matches(Channel::Organic, Device::Mobile, Stage::Trial));
        assert!(!rule.matches(Channel::Organic, Device::Web, Stage::Trial));
        assert!(!rule.matches(Channel::Organic, Device::Mobile, Stage::Activation));
        assert_eq!(rule.specificity(), 1);
        assert_eq!(StageProbabilityRule::any(Stage::Trial, 0.3).specificity(), 0);
    }

    #[test]
    fn test_default_rules_cover_every_segment() {
        let rules = default_stage_probabilities();
        for channel in Channel::ALL {
            for device in Device::ALL {
                for stage in Stage::TRANSITIONS {
                    assert!(
                        rules.iter().any(|r| r.matches(channel, device, stage)),
                        "no default for {} {} {}",
                        channel,
                        device,
                        stage
                    );
                }
            }
        }
    }
}
