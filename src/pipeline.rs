//! Pipeline orchestration
//!
//! This module provides the daily entry point. It runs both layers and fuses
//! them:
//! 1. FeatureDeriver - Daily entry + profile to observation and model inputs
//! 2. StateStore - Load the user's tracker state
//! 3. LocalBaselineTracker - Advance the state by one day
//! 4. GlobalEstimator - Population z-score, discretized
//! 5. Fusion - Account-age weighted blend
//! 6. StateStore - Persist the new state (only after every step succeeded)

use crate::baseline::LocalBaselineTracker;
use crate::error::DeviationError;
use crate::features::{DailyEntry, FeatureDeriver, UserProfile};
use crate::fusion::fuse;
use crate::global::{assess, GlobalAssessment, GlobalEstimator};
use crate::store::StateStore;
use crate::types::{DailyObservation, DailyResult, FusionInput, FusionOutput};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

/// Whole days between account creation and `today`.
pub fn days_since_account_creation(
    created: NaiveDate,
    today: NaiveDate,
) -> Result<u32, DeviationError> {
    let days = (today - created).num_days();
    u32::try_from(days).map_err(|_| {
        DeviationError::AccountAge(format!(
            "account created on {created} is after the evaluation date {today}"
        ))
    })
}

/// Everything computed for one user-day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub user_id: String,
    pub behavioral_date: NaiveDate,
    pub local: DailyResult,
    pub global: GlobalAssessment,
    pub fusion: FusionOutput,
    pub explanation: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defaults_applied: Vec<&'static str>,
}

/// Stateful processor wiring the store, both layers and fusion together.
///
/// Callers must serialize updates per user: at most one `process_day` per user
/// per day.
pub struct DeviationProcessor<S, E> {
    store: S,
    estimator: E,
    tracker: LocalBaselineTracker,
    deriver: FeatureDeriver,
}

impl<S: StateStore, E: GlobalEstimator> DeviationProcessor<S, E> {
    pub fn new(store: S, estimator: E) -> Self {
        Self {
            store,
            estimator,
            tracker: LocalBaselineTracker::default(),
            deriver: FeatureDeriver::default(),
        }
    }

    pub fn with_tracker(mut self, tracker: LocalBaselineTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_deriver(mut self, deriver: FeatureDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the local layer only and persist the result
    pub fn update_local(
        &mut self,
        user_id: &str,
        observation: DailyObservation,
    ) -> Result<DailyResult, DeviationError> {
        let state = self.store.load(user_id)?;
        let (next, result) = self.tracker.update(&state, observation)?;
        self.store.save(user_id, &next)?;
        Ok(result)
    }

    /// Process one day's entry end to end
    pub fn process_day(
        &mut self,
        entry: &DailyEntry,
        profile: &UserProfile,
        days_since_account_creation: u32,
    ) -> Result<DailyReport, DeviationError> {
        let derived = self.deriver.derive(entry, profile)?;

        let state = self.store.load(&entry.user_id)?;
        let (next, local) = self.tracker.update(&state, derived.observation)?;

        let global = assess(&self.estimator, &derived.global)?;

        let fusion = fuse(&FusionInput {
            global_deviation: global.deviation.into(),
            local_cumulative_deviation: local.cumulative_deviation,
            local_signal_ready: local.ready,
            days_since_account_creation,
        });

        self.store.save(&entry.user_id, &next)?;

        info!(
            user_id = %entry.user_id,
            date = %entry.behavioral_date,
            phase = local.phase.as_str(),
            z = global.z,
            final_deviation = fusion.final_deviation.value(),
            "daily deviation processed"
        );

        Ok(DailyReport {
            user_id: entry.user_id.clone(),
            behavioral_date: entry.behavioral_date,
            explanation: fusion.explanation(),
            local,
            global,
            fusion,
            defaults_applied: derived.defaults_applied,
        })
    }
}
