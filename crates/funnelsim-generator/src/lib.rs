//! Synthetic SaaS funnel event generator
//!
//! Simulates users moving through signup → onboarding → activation → trial →
//! subscription, with per-(channel, device) transition probabilities and a
//! bounded payment retry loop. Output is a pure function of the
//! configuration and its seed.

pub mod dataset;
pub mod generator;
pub mod journey;

pub use dataset::{write_dataset, DatasetSummary, EVENTS_FILE, SUBSCRIPTIONS_FILE, USERS_FILE};
pub use generator::FunnelGenerator;
pub use journey::UserJourney;
