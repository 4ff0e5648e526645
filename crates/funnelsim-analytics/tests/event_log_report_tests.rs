use chrono::{Duration, TimeZone, Utc};
use funnelsim_analytics::{audit_event_log, FunnelReport, ReportOptions, RevenueBasis};
use funnelsim_core::{
    read_csv, write_csv, Channel, Device, EventRow, EventType, Plan, Stage, Subscription,
};
use tempfile::TempDir;

fn rows() -> Vec<EventRow> {
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let event = |user_id, device, event_type, minutes| EventRow {
        user_id,
        channel: Channel::PaidSearch,
        device,
        event_type,
        timestamp: t0 + Duration::minutes(minutes),
    };

    vec![
        event(0, Device::Web, EventType::Signup, 0),
        event(0, Device::Web, EventType::OnboardingStart, 120),
        event(0, Device::Web, EventType::Activation, 240),
        event(0, Device::Web, EventType::TrialStart, 300),
        event(0, Device::Web, EventType::PaymentAttempt, 310),
        event(0, Device::Web, EventType::Subscription, 311),
        event(1, Device::Mobile, EventType::Signup, 60),
        event(1, Device::Mobile, EventType::OnboardingStart, 90),
        event(1, Device::Mobile, EventType::Activation, 95),
        event(1, Device::Mobile, EventType::TrialStart, 100),
        event(1, Device::Mobile, EventType::PaymentAttempt, 101),
        event(1, Device::Mobile, EventType::PaymentFailure, 110),
        event(1, Device::Mobile, EventType::Churn, 115),
        event(2, Device::Mobile, EventType::Signup, 30),
    ]
}

#[test]
fn test_report_from_persisted_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.csv");
    let written = rows();
    assert_eq!(write_csv(&path, written.iter()).unwrap(), 14);

    let read: Vec<EventRow> = read_csv(&path).unwrap();
    assert_eq!(read, written);

    let audit = audit_event_log(&read, Some(2));
    assert!(audit.is_clean(), "{:?}", audit.violations);
    assert_eq!(audit.users_checked, 3);

    let options = ReportOptions {
        monthly_price: Some(49.0),
        ..ReportOptions::default()
    };
    let report = FunnelReport::from_rows(&read, &options);
    assert_eq!(report.total_users, 3);
    assert_eq!(report.users_at(Stage::Trial), 2);
    assert_eq!(report.users_at(Stage::Subscription), 1);

    let mobile = &report.payments[Device::Mobile.index()];
    assert_eq!(mobile.trial_users, 1);
    assert_eq!(mobile.users_with_failure, 1);
    assert_eq!(mobile.churned_users, 1);

    let revenue = report.revenue.as_ref().unwrap();
    assert!((revenue.arr - 49.0 * 12.0).abs() < 1e-9);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stages"][0]["stage"], "signup");
    assert_eq!(json["by_channel"][0]["segment"], "paid_search");
}

#[test]
fn test_plan_mix_revenue_from_persisted_subscriptions() {
    let dir = TempDir::new().unwrap();
    let events_path = dir.path().join("events.csv");
    let subscriptions_path = dir.path().join("subscriptions.csv");

    let started_at = Utc.with_ymd_and_hms(2024, 3, 1, 14, 11, 0).unwrap();
    let subscriptions = vec![Subscription {
        user_id: 0,
        plan: Plan::Pro,
        mrr: 79.0,
        started_at,
        cancelled_at: None,
    }];
    write_csv(&events_path, rows().iter()).unwrap();
    write_csv(&subscriptions_path, subscriptions.iter()).unwrap();

    let events: Vec<EventRow> = read_csv(&events_path).unwrap();
    let read: Vec<Subscription> = read_csv(&subscriptions_path).unwrap();
    assert_eq!(read, subscriptions);

    let report = FunnelReport::from_dataset(&events, &read, &ReportOptions::default());
    let revenue = report.revenue.as_ref().unwrap();
    assert_eq!(revenue.basis, RevenueBasis::PlanMix);
    assert_eq!(revenue.subscribers, 1);
    assert!((revenue.arr - 79.0 * 12.0).abs() < 1e-9);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["revenue"]["basis"]["type"], "plan_mix");
    assert_eq!(json["revenue"]["plans"][0]["plan"], "pro");
}
