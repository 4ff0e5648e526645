//! Synthetic funnel event generator
//!
//! Every user gets their own `ChaCha8Rng`, seeded from the configured seed
//! and switched to stream `user_id`. A user's events therefore depend only
//! on (configuration, seed, user id), and users can be simulated in any
//! order or split across workers without changing a single byte of output.

use chrono::Duration;
use funnelsim_core::{
    ConfigResult, EventRow, EventType, FunnelModel, GeneratorConfig, Stage, Subscription, User,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::journey::{JourneyRecorder, UserJourney};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Stages decided before checkout; subscription is decided inside it
const PRE_CHECKOUT_STAGES: [Stage; 3] = [Stage::Onboarding, Stage::Activation, Stage::Trial];

/// Produces user journeys from a validated [`FunnelModel`]
#[derive(Debug, Clone)]
pub struct FunnelGenerator {
    model: FunnelModel,
}

impl FunnelGenerator {
    /// Validate `config` and build a generator. Fails before anything is generated.
    pub fn new(config: &GeneratorConfig) -> ConfigResult<Self> {
        Ok(Self::from_model(config.validate()?))
    }

    pub fn from_model(model: FunnelModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &FunnelModel {
        &self.model
    }

    pub fn user_count(&self) -> u64 {
        self.model.user_count
    }

    /// Lazily simulate users `1..=user_count` in id order
    pub fn journeys(&self) -> impl Iterator<Item = UserJourney> + '_ {
        (1..=self.model.user_count).map(move |user_id| self.simulate_user(user_id))
    }

    /// Simulate every user
    pub fn generate(&self) -> Vec<UserJourney> {
        self.journeys().collect()
    }

    /// Every event-log row, grouped by user in id order
    pub fn event_rows(&self) -> Vec<EventRow> {
        self.journeys()
            .flat_map(|journey| journey.rows().collect::<Vec<_>>())
            .collect()
    }

    /// Simulate one user. Pure in (model, user_id).
    pub fn simulate_user(&self, user_id: u64) -> UserJourney {
        let mut rng = self.user_rng(user_id);
        let user = self.sample_user(user_id, &mut rng);
        let mut journey = JourneyRecorder::start(user);

        for stage in PRE_CHECKOUT_STAGES {
            if !self.advances(&mut rng, journey.user(), stage) {
                return journey.finish();
            }
            let delay = self.session_delay(&mut rng);
            journey.advance_minutes(delay);
            journey.record(stage.entry_event());
        }

        self.checkout(&mut rng, &mut journey);
        journey.finish()
    }

    fn user_rng(&self, user_id: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.model.seed);
        rng.set_stream(user_id);
        rng
    }

    fn sample_user(&self, user_id: u64, rng: &mut ChaCha8Rng) -> User {
        let channel = self.model.channels.sample(rng);
        let device = self.model.devices.sample(rng);
        let day = rng.gen_range(0..=self.model.signup_window_days);
        let minute = rng.gen_range(0..MINUTES_PER_DAY);

        User {
            id: user_id,
            channel,
            device,
            signup_at: self.model.start_date
                + Duration::days(i64::from(day))
                + Duration::minutes(i64::from(minute)),
        }
    }

    fn advances(&self, rng: &mut ChaCha8Rng, user: &User, stage: Stage) -> bool {
        let p = self
            .model
            .stage_probability(user.channel, user.device, stage);
        rng.gen_bool(p)
    }

    fn step_delay(&self, rng: &mut ChaCha8Rng) -> u32 {
        let range = self.model.step_minutes;
        rng.gen_range(range.min..=range.max)
    }

    fn retry_delay(&self, rng: &mut ChaCha8Rng) -> u32 {
        let range = self.model.retry_minutes;
        rng.gen_range(range.min..=range.max)
    }

    /// Session gap followed by an in-session step
    fn session_delay(&self, rng: &mut ChaCha8Rng) -> u32 {
        let gap_hours = self.model.session_gaps.sample(rng);
        gap_hours
            .saturating_mul(60)
            .saturating_add(self.step_delay(rng))
    }

    /// Payment attempts for a trial user, bounded by `max_retries`.
    ///
    /// Ends in a subscription decision after an authorized attempt, or in
    /// churn once the user gives up or runs out of retries.
    fn checkout(&self, rng: &mut ChaCha8Rng, journey: &mut JourneyRecorder) {
        let device = journey.user().device;
        let failure_rate = self.model.payment_failure_rate(device);
        let max_attempts = self.model.max_retries + 1;

        for attempt in 1..=max_attempts {
            let delay = self.step_delay(rng);
            journey.advance_minutes(delay);
            journey.record(EventType::PaymentAttempt);

            if !rng.gen_bool(failure_rate) {
                if self.advances(rng, journey.user(), Stage::Subscription) {
                    let delay = self.step_delay(rng);
                    journey.advance_minutes(delay);
                    journey.record(EventType::Subscription);
                    self.subscribe(rng, journey);
                }
                return;
            }

            let delay = self.retry_delay(rng);
            journey.advance_minutes(delay);
            journey.record(EventType::PaymentFailure);

            let out_of_retries = attempt == max_attempts;
            if out_of_retries || rng.gen_bool(self.model.abandon_probability) {
                debug!(
                    "User {} churned after {} failed payment attempt(s)",
                    journey.user().id,
                    attempt
                );
                let delay = self.step_delay(rng);
                journey.advance_minutes(delay);
                journey.record(EventType::Churn);
                return;
            }
        }
    }

    /// Pick a plan for a new subscriber and decide whether they later cancel
    fn subscribe(&self, rng: &mut ChaCha8Rng, journey: &mut JourneyRecorder) {
        let plan = self.model.plans.sample(rng);
        let started_at = journey.clock();

        let cancelled_at = if rng.gen_bool(self.model.cancellation_probability(plan)) {
            let days = self.model.cancellation_days;
            let after = rng.gen_range(days.min..=days.max);
            Some(started_at + Duration::days(i64::from(after)))
        } else {
            None
        };

        journey.attach_subscription(Subscription {
            user_id: journey.user().id,
            plan,
            mrr: self.model.plan_price(plan),
            started_at,
            cancelled_at,
        });
    }
}
