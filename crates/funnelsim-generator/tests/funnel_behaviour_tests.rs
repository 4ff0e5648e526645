use funnelsim_analytics::{audit_event_log, derive_outcomes, FunnelReport, ReportOptions};
use funnelsim_core::{
    Channel, Device, EventType, GeneratorConfig, Stage, StageProbabilityRule,
};
use funnelsim_generator::FunnelGenerator;
use std::collections::BTreeMap;

fn uniform_organic(user_count: u64, p: f64) -> GeneratorConfig {
    GeneratorConfig {
        user_count,
        random_seed: 42,
        channel_mix: BTreeMap::from([(Channel::Organic, 1.0)]),
        stage_probabilities: Stage::TRANSITIONS
            .into_iter()
            .map(|stage| StageProbabilityRule::any(stage, p))
            .collect(),
        ..GeneratorConfig::default()
    }
}

#[test]
fn test_default_config_passes_audit() {
    let config = GeneratorConfig {
        user_count: 5_000,
        ..GeneratorConfig::default()
    };
    let generator = FunnelGenerator::new(&config).unwrap();
    let rows = generator.event_rows();

    let report = audit_event_log(&rows, Some(config.payment_retry.max_retries));
    assert!(report.is_clean(), "{:?}", &report.violations[..report.violations.len().min(5)]);
    assert_eq!(report.users_checked, 5_000);
}

#[test]
fn test_payment_bounds_hold_per_user() {
    let mut config = uniform_organic(3_000, 1.0);
    config.payment_failure_rate = BTreeMap::from([(Device::Web, 0.6), (Device::Mobile, 0.6)]);
    config.payment_retry.abandon_probability = 0.0;
    let generator = FunnelGenerator::new(&config).unwrap();

    let mut churned = 0;
    for journey in generator.journeys() {
        let attempts = journey.count(EventType::PaymentAttempt);
        let failures = journey.count(EventType::PaymentFailure);
        assert!(journey.count(EventType::Subscription) <= 1);
        assert!(attempts >= 1 && attempts <= 3, "{} attempts", attempts);
        assert!(failures <= attempts);
        if journey.count(EventType::Churn) == 1 {
            churned += 1;
            assert_eq!(failures, 3);
            assert_eq!(journey.count(EventType::Subscription), 0);
        }
    }
    // 0.6^3 of trial users exhaust their retries
    let share = churned as f64 / 3_000.0;
    assert!((share - 0.216).abs() < 0.03, "churn share {}", share);
}

#[test]
fn test_uniform_organic_scenario() {
    let mut config = uniform_organic(1_000, 0.8);
    config.payment_failure_rate = BTreeMap::from([(Device::Web, 0.0), (Device::Mobile, 0.0)]);
    let rows = FunnelGenerator::new(&config).unwrap().event_rows();

    let report = FunnelReport::from_rows(&rows, &ReportOptions::default());
    assert_eq!(report.total_users, 1_000);
    assert!(report.by_channel.iter().all(|b| b.segment == "organic"));

    // 1000 * 0.8^4
    let subscribers = report.users_at(Stage::Subscription) as i64;
    assert!((subscribers - 410).abs() <= 45, "{} subscribers", subscribers);

    for stage in Stage::TRANSITIONS {
        let conversion = report.stage(stage).unwrap().conversion_rate;
        assert!((conversion - 80.0).abs() < 7.0, "{} at {}%", stage, conversion);
    }
}

#[test]
fn test_default_rates_match_calibration() {
    let config = GeneratorConfig::default();
    let generator = FunnelGenerator::new(&config).unwrap();
    let model = generator.model();
    let outcomes = derive_outcomes(&generator.event_rows());

    let mut expected_onboarding = 0.0;
    let mut expected_activated = 0.0;
    for channel in Channel::ALL {
        for device in Device::ALL {
            let weight = model.segment_weight(channel, device);
            let onboarding = model.stage_probability(channel, device, Stage::Onboarding);
            let activation = model.stage_probability(channel, device, Stage::Activation);
            expected_onboarding += weight * onboarding;
            expected_activated += weight * onboarding * activation;
        }
    }
    let expected_activation = expected_activated / expected_onboarding;

    let total = outcomes.len() as f64;
    let onboarded = outcomes.iter().filter(|o| o.reached(Stage::Onboarding)).count() as f64;
    let activated = outcomes.iter().filter(|o| o.reached(Stage::Activation)).count() as f64;

    let onboarding_rate = onboarded / total;
    let activation_rate = activated / onboarded;
    assert!(
        (onboarding_rate - expected_onboarding).abs() < 0.02,
        "onboarding {} vs {}",
        onboarding_rate,
        expected_onboarding
    );
    assert!(
        (activation_rate - expected_activation).abs() < 0.02,
        "activation {} vs {}",
        activation_rate,
        expected_activation
    );
    assert!((onboarding_rate - 0.842).abs() < 0.02);
}

#[test]
fn test_late_stage_rates_match_calibration() {
    let generator = FunnelGenerator::new(&GeneratorConfig::default()).unwrap();
    let model = generator.model();
    let outcomes = derive_outcomes(&generator.event_rows());

    // Subscription is only decided after an authorized payment, so its
    // target is p(subscription) scaled by the checkout success odds
    let mut activated = 0.0;
    let mut trial = 0.0;
    let mut subscribed = 0.0;
    for channel in Channel::ALL {
        for device in Device::ALL {
            let p = |stage| model.stage_probability(channel, device, stage);
            let reach_activation = model.segment_weight(channel, device)
                * p(Stage::Onboarding)
                * p(Stage::Activation);
            let reach_trial = reach_activation * p(Stage::Trial);
            activated += reach_activation;
            trial += reach_trial;
            subscribed +=
                reach_trial * model.authorization_probability(device) * p(Stage::Subscription);
        }
    }
    let expected_trial = trial / activated;
    let expected_subscription = subscribed / trial;

    let count = |stage| outcomes.iter().filter(|o| o.reached(stage)).count() as f64;
    let trial_rate = count(Stage::Trial) / count(Stage::Activation);
    let subscription_rate = count(Stage::Subscription) / count(Stage::Trial);

    assert!(
        (trial_rate - expected_trial).abs() < 0.02,
        "trial {} vs {}",
        trial_rate,
        expected_trial
    );
    assert!(
        (subscription_rate - expected_subscription).abs() < 0.02,
        "subscription {} vs {}",
        subscription_rate,
        expected_subscription
    );
}

#[test]
fn test_payment_failure_rate_by_device() {
    let generator = FunnelGenerator::new(&GeneratorConfig::default()).unwrap();
    let report = FunnelReport::from_rows(&generator.event_rows(), &ReportOptions::default());

    for (stats, expected, tolerance) in [
        (&report.payments[Device::Web.index()], 5.5, 2.0),
        (&report.payments[Device::Mobile.index()], 13.7, 3.0),
    ] {
        assert!(stats.trial_users > 1_000);
        assert!(
            (stats.failure_rate - expected).abs() < tolerance,
            "{} failure rate {}%",
            stats.device,
            stats.failure_rate
        );
    }
}
