//! Writes a generated dataset to disk

use std::path::{Path, PathBuf};

use funnelsim_core::{persist_all, AtomicCsvWriter, EventRow, FunnelResult, Subscription, User};
use tracing::info;

use crate::generator::FunnelGenerator;
use crate::journey::UserJourney;

pub const EVENTS_FILE: &str = "events.csv";
pub const USERS_FILE: &str = "users.csv";
pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.csv";

/// What was written by [`write_dataset`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    pub users: u64,
    pub events: u64,
    pub subscriptions: u64,
    /// Subscriptions that are later cancelled
    pub cancellations: u64,
    pub events_path: PathBuf,
    pub users_path: PathBuf,
    pub subscriptions_path: PathBuf,
}

impl DatasetSummary {
    /// Subscriptions as a share of all users
    pub fn paid_conversion_rate(&self) -> f64 {
        if self.users == 0 {
            return 0.0;
        }
        self.subscriptions as f64 / self.users as f64
    }
}

/// Stream every journey into `events.csv`, `users.csv` and
/// `subscriptions.csv` under `output_dir`.
///
/// `on_user` is called once per simulated user, e.g. to drive a progress bar.
/// All three tables are flushed and synced before any of them is renamed
/// into place. They are published users first and event log last, and a
/// failed rename removes the tables already published by this run.
pub fn write_dataset<F>(
    generator: &FunnelGenerator,
    output_dir: &Path,
    mut on_user: F,
) -> FunnelResult<DatasetSummary>
where
    F: FnMut(&UserJourney),
{
    std::fs::create_dir_all(output_dir)?;
    let events_path = output_dir.join(EVENTS_FILE);
    let users_path = output_dir.join(USERS_FILE);
    let subscriptions_path = output_dir.join(SUBSCRIPTIONS_FILE);

    let mut events = AtomicCsvWriter::<EventRow>::create(&events_path)?;
    let mut users = AtomicCsvWriter::<User>::create(&users_path)?;
    let mut subscriptions = AtomicCsvWriter::<Subscription>::create(&subscriptions_path)?;
    let mut cancellations = 0;

    for journey in generator.journeys() {
        users.write_row(&journey.user)?;
        for row in journey.rows() {
            events.write_row(&row)?;
        }
        if let Some(subscription) = &journey.subscription {
            subscriptions.write_row(subscription)?;
            if !subscription.is_active() {
                cancellations += 1;
            }
        }
        on_user(&journey);
    }

    let user_count = users.rows_written();
    let event_count = events.rows_written();
    let subscription_count = subscriptions.rows_written();
    persist_all(vec![users.seal()?, subscriptions.seal()?, events.seal()?])?;

    info!(
        "Wrote {} users, {} events and {} subscriptions to {}",
        user_count,
        event_count,
        subscription_count,
        output_dir.display()
    );

    Ok(DatasetSummary {
        users: user_count,
        events: event_count,
        subscriptions: subscription_count,
        cancellations,
        events_path,
        users_path,
        subscriptions_path,
    })
}
