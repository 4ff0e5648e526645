//! Domain types shared by the generator and the analytics layer

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownVariant;

/// Standard datetime type used across all funnelsim crates
pub type UtcDateTime = DateTime<Utc>;

/// Format a timestamp the way it is stored in CSV files (RFC 3339, whole seconds, `Z`)
pub fn format_timestamp(ts: &UtcDateTime) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp written by [`format_timestamp`]
pub fn parse_timestamp(value: &str) -> Result<UtcDateTime, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

/// Acquisition channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Referral,
    Organic,
    PaidSearch,
    Partner,
    PaidSocial,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Referral,
        Channel::Organic,
        Channel::PaidSearch,
        Channel::Partner,
        Channel::PaidSocial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Referral => "referral",
            Channel::Organic => "organic",
            Channel::PaidSearch => "paid_search",
            Channel::Partner => "partner",
            Channel::PaidSocial => "paid_social",
        }
    }

    /// Dense index, used by lookup tables
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("channel", s))
    }
}

/// Device the user signed up from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Web,
    Mobile,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Web, Device::Mobile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Web => "web",
            Device::Mobile => "mobile",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Device::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("device", s))
    }
}

/// Funnel stage, in journey order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Signup,
    Onboarding,
    Activation,
    Trial,
    Subscription,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Signup,
        Stage::Onboarding,
        Stage::Activation,
        Stage::Trial,
        Stage::Subscription,
    ];

    /// Stages entered through a probabilistic transition (everything after signup)
    pub const TRANSITIONS: [Stage; 4] = [
        Stage::Onboarding,
        Stage::Activation,
        Stage::Trial,
        Stage::Subscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Signup => "signup",
            Stage::Onboarding => "onboarding",
            Stage::Activation => "activation",
            Stage::Trial => "trial",
            Stage::Subscription => "subscription",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage that must be reached before this one
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Signup => None,
            Stage::Onboarding => Some(Stage::Signup),
            Stage::Activation => Some(Stage::Onboarding),
            Stage::Trial => Some(Stage::Activation),
            Stage::Subscription => Some(Stage::Trial),
        }
    }

    /// Event that marks a user entering this stage
    pub fn entry_event(&self) -> EventType {
        match self {
            Stage::Signup => EventType::Signup,
            Stage::Onboarding => EventType::OnboardingStart,
            Stage::Activation => EventType::Activation,
            Stage::Trial => EventType::TrialStart,
            Stage::Subscription => EventType::Subscription,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("stage", s))
    }
}

/// Event types written to the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Signup,
    OnboardingStart,
    Activation,
    TrialStart,
    Subscription,
    PaymentAttempt,
    PaymentFailure,
    Churn,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::Signup,
        EventType::OnboardingStart,
        EventType::Activation,
        EventType::TrialStart,
        EventType::Subscription,
        EventType::PaymentAttempt,
        EventType::PaymentFailure,
        EventType::Churn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Signup => "signup",
            EventType::OnboardingStart => "onboarding_start",
            EventType::Activation => "activation",
            EventType::TrialStart => "trial_start",
            EventType::Subscription => "subscription",
            EventType::PaymentAttempt => "payment_attempt",
            EventType::PaymentFailure => "payment_failure",
            EventType::Churn => "churn",
        }
    }

    /// Stage this event marks entry into, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EventType::Signup => Some(Stage::Signup),
            EventType::OnboardingStart => Some(Stage::Onboarding),
            EventType::Activation => Some(Stage::Activation),
            EventType::TrialStart => Some(Stage::Trial),
            EventType::Subscription => Some(Stage::Subscription),
            EventType::PaymentAttempt | EventType::PaymentFailure | EventType::Churn => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("event type", s))
    }
}

/// Subscription plan chosen when a trial converts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Starter,
    Pro,
    Business,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Starter, Plan::Pro, Plan::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Business => "business",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Plan::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("plan", s))
    }
}

/// A simulated user. Fixed once sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub channel: Channel,
    pub device: Device,
    pub signup_at: UtcDateTime,
}

/// A single event in a user's stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: u64,
    pub event_type: EventType,
    pub timestamp: UtcDateTime,
    /// Position within the user's stream, starting at 0
    pub sequence: u32,
}

/// One row of the persisted event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub user_id: u64,
    pub channel: Channel,
    pub device: Device,
    pub event_type: EventType,
    pub timestamp: UtcDateTime,
}

impl EventRow {
    pub fn new(user: &User, event: &Event) -> Self {
        Self {
            user_id: user.id,
            channel: user.channel,
            device: user.device,
            event_type: event.event_type,
            timestamp: event.timestamp,
        }
    }
}

/// A paid subscription, one per subscribed user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: u64,
    pub plan: Plan,
    /// Monthly recurring revenue
    pub mrr: f64,
    /// Timestamp of the user's `subscription` event
    pub started_at: UtcDateTime,
    /// Set when the subscriber later cancels
    pub cancelled_at: Option<UtcDateTime>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.cancelled_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_round_trip_through_strings() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
        for device in Device::ALL {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
        for plan in Plan::ALL {
            assert_eq!(plan.as_str().parse::<Plan>().unwrap(), plan);
        }
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let err = "Paid Search".parse::<Channel>().unwrap_err();
        assert!(err.to_string().contains("channel"));
        assert!("tablet".parse::<Device>().is_err());
    }

    #[test]
    fn test_stage_precedence_chain() {
        assert_eq!(Stage::Signup.previous(), None);
        for window in Stage::ALL.windows(2) {
            assert_eq!(window[1].previous(), Some(window[0]));
        }
        for stage in Stage::ALL {
            assert_eq!(stage.entry_event().stage(), Some(stage));
        }
        assert_eq!(EventType::PaymentFailure.stage(), None);
    }

    #[test]
    fn test_timestamp_format_is_stable() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap();
        let formatted = format_timestamp(&ts);
        assert_eq!(formatted, "2024-03-09T08:15:00Z");
        assert_eq!(parse_timestamp(&formatted).unwrap(), ts);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Channel::PaidSocial).unwrap();
        assert_eq!(json, "\"paid_social\"");
        let stage: Stage = serde_json::from_str("\"trial\"").unwrap();
        assert_eq!(stage, Stage::Trial);
    }
}
