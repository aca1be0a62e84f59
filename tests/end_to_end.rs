//! End-to-end scenarios through the public API

use chrono::{Duration, NaiveDate};
use deviation_flux::features::Sex;
use deviation_flux::store::StateStore;
use deviation_flux::{
    fuse, DailyEntry, DailyObservation, DeviationLabel, DeviationProcessor, FileStateStore,
    FusionInput, GlobalFeatures, LocalBaselineTracker, MemoryStateStore, Phase, UserProfile,
    UserTrackerState,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn steady_day() -> DailyObservation {
    DailyObservation {
        sleep_midpoint_min: 700.0,
        sleep_duration_min: 420.0,
        mean_med_time_min: 480.0,
        activity_load: 300.0,
    }
}

#[test]
fn identical_days_hold_a_flat_signal_across_reloads() {
    let dir = TempDir::new().unwrap();
    let tracker = LocalBaselineTracker::default();

    // Reopen the store every day, as a daily batch job would
    for day in 1..=40u32 {
        let mut store = FileStateStore::open(dir.path()).unwrap();
        let state = store.load("steady").unwrap();
        let (next, result) = tracker.update(&state, steady_day()).unwrap();
        store.save("steady", &next).unwrap();

        assert_eq!(result.day, day);
        assert_eq!(result.daily_deviation, 0.0);
        assert_eq!(result.cumulative_deviation, 0.0);
        assert_eq!(result.ready, day > 7);
    }

    let store = FileStateStore::open(dir.path()).unwrap();
    let state = store.load("steady").unwrap();
    assert_eq!(state.days_observed, 40);
    assert_eq!(state.baseline.map(DailyObservation::from), Some(steady_day()));
}

#[test]
fn sustained_drift_eventually_flips_the_fused_label() {
    let tracker = LocalBaselineTracker::default();
    let mut state = UserTrackerState::new("drifter");
    for _ in 0..7 {
        state = tracker.update(&state, steady_day()).unwrap().0;
    }

    // Medication taken 45 minutes late every day: +0.35 per day
    let late = DailyObservation {
        mean_med_time_min: 525.0,
        ..steady_day()
    };

    let mut labels = Vec::new();
    for _ in 0..10 {
        let (next, result) = tracker.update(&state, late).unwrap();
        state = next;
        let fused = fuse(&FusionInput {
            global_deviation: 0.0,
            local_cumulative_deviation: result.cumulative_deviation,
            local_signal_ready: result.ready,
            days_since_account_creation: 120,
        });
        labels.push(fused.final_deviation);
    }

    assert_eq!(labels[0], DeviationLabel::Stable);
    assert_eq!(labels[3], DeviationLabel::Stable);
    assert_eq!(labels[4], DeviationLabel::Up);
    assert!(labels[4..].iter().all(|l| *l == DeviationLabel::Up));
}

#[test]
fn processor_reports_gated_local_signal_during_warmup() {
    let mut processor =
        DeviationProcessor::new(MemoryStateStore::new(), |f: &GlobalFeatures| {
            if f.mean_med_time_min > 600.0 {
                1.0
            } else {
                0.0
            }
        });

    let profile = UserProfile {
        age: Some(58),
        sex: Some(Sex::Female),
    };
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

    for i in 0..3 {
        let entry = DailyEntry {
            user_id: "late-doser".to_string(),
            behavioral_date: start + Duration::days(i),
            sleep_start_min: Some(1380.0),
            wake_min: Some(420.0),
            sleep_midpoint_min: None,
            sleep_duration_min: None,
            medication_times_min: vec![660.0, 780.0],
            activity_duration_min: Some(30.0),
            activity_met: Some(3.0),
        };

        let report = processor.process_day(&entry, &profile, i as u32).unwrap();

        assert_eq!(report.local.phase, Phase::Baseline);
        assert_eq!(report.global.deviation, DeviationLabel::Up);
        assert_eq!(report.fusion.effective_local_deviation, 0.0);
        assert!((report.fusion.final_deviation_score - 0.9).abs() < 1e-12);
        assert_eq!(report.fusion.final_deviation, DeviationLabel::Stable);
    }

    let state = processor.store().load("late-doser").unwrap();
    assert_eq!(state.days_observed, 3);
    assert_eq!(state.history[0].sleep_midpoint_min, 180.0);
    assert_eq!(state.history[0].mean_med_time_min, 720.0);
}
