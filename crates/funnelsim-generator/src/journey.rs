//! A single user's chronological event stream

use chrono::Duration;
use funnelsim_core::{Event, EventRow, EventType, Stage, Subscription, User, UtcDateTime};

/// A simulated user together with every event they produced, in order
#[derive(Debug, Clone, PartialEq)]
pub struct UserJourney {
    pub user: User,
    pub events: Vec<Event>,
    /// Present when the journey ends in a subscription
    pub subscription: Option<Subscription>,
}

impl UserJourney {
    /// Events flattened into event-log rows
    pub fn rows(&self) -> impl Iterator<Item = EventRow> + '_ {
        self.events.iter().map(|event| EventRow::new(&self.user, event))
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.count(stage.entry_event()) > 0
    }

    /// Deepest stage with an entry event
    pub fn furthest_stage(&self) -> Stage {
        Stage::ALL
            .into_iter()
            .rev()
            .find(|stage| self.reached(*stage))
            .unwrap_or(Stage::Signup)
    }
}

/// Appends events on a clock that only moves forward
pub(crate) struct JourneyRecorder {
    user: User,
    clock: UtcDateTime,
    events: Vec<Event>,
    subscription: Option<Subscription>,
}

impl JourneyRecorder {
    /// Starts the stream with the user's signup event
    pub(crate) fn start(user: User) -> Self {
        let clock = user.signup_at;
        let mut recorder = Self {
            user,
            clock,
            events: Vec::with_capacity(8),
            subscription: None,
        };
        recorder.record(EventType::Signup);
        recorder
    }

    pub(crate) fn user(&self) -> &User {
        &self.user
    }

    pub(crate) fn clock(&self) -> UtcDateTime {
        self.clock
    }

    pub(crate) fn attach_subscription(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    pub(crate) fn advance_minutes(&mut self, minutes: u32) {
        self.clock += Duration::minutes(i64::from(minutes));
    }

    pub(crate) fn record(&mut self, event_type: EventType) {
        let sequence = self.events.len() as u32;
        self.events.push(Event {
            user_id: self.user.id,
            event_type,
            timestamp: self.clock,
            sequence,
        });
    }

    pub(crate) fn finish(self) -> UserJourney {
        UserJourney {
            user: self.user,
            events: self.events,
            subscription: self.subscription,
        }
    }
}
