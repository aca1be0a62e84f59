//! Local baseline tracking
//!
//! This module maintains a per-user behavioral baseline and turns each day's
//! observation into a daily and cumulative deviation signal. The tracker is a
//! pure `(state, observation) -> (state', result)` transformation; loading and
//! saving state is the caller's concern (see [`crate::store`]).
//!
//! Lifecycle of a user:
//! - Warm-up: the first `min_baseline_days` observations only accumulate history.
//! - The day that completes the window builds the baseline from per-feature
//!   medians but is not itself evaluated against it.
//! - Active: every later day is scored, accumulated with decay, and nudges the
//!   baseline when it looks normal.

use crate::error::DeviationError;
use crate::types::{Baseline, DailyObservation, DailyResult, Feature, Phase, UserTrackerState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Observations required before a baseline is built
pub const MIN_BASELINE_DAYS: u32 = 7;

/// Learning rate used when a normal day nudges the baseline
pub const BASELINE_ADAPT_ALPHA: f64 = 0.02;

/// Per-day decay applied to the cumulative deviation
pub const DEVIATION_DECAY: f64 = 0.95;

/// Days with `|daily_deviation|` below this adapt the baseline
pub const ADAPT_GATE: f64 = 0.5;

/// Sleep midpoint tolerance (minutes)
pub const SLEEP_MIDPOINT_TOLERANCE: f64 = 60.0;
/// Sleep duration tolerance (minutes). Tracked but not part of the deviation formula.
pub const SLEEP_DURATION_TOLERANCE: f64 = 90.0;
/// Medication timing tolerance (minutes)
pub const MED_TIME_TOLERANCE: f64 = 45.0;
/// Activity load tolerance (load units)
pub const ACTIVITY_LOAD_TOLERANCE: f64 = 50.0;

pub const SLEEP_WEIGHT: f64 = 0.4;
pub const MED_WEIGHT: f64 = 0.35;
/// Applied with a negative sign: more activity than usual pulls the signal down
pub const ACTIVITY_WEIGHT: f64 = 0.25;

/// Tolerance used to normalize a feature's distance from baseline
pub fn tolerance(feature: Feature) -> f64 {
    match feature {
        Feature::SleepMidpointMin => SLEEP_MIDPOINT_TOLERANCE,
        Feature::SleepDurationMin => SLEEP_DURATION_TOLERANCE,
        Feature::MeanMedTimeMin => MED_TIME_TOLERANCE,
        Feature::ActivityLoad => ACTIVITY_LOAD_TOLERANCE,
    }
}

/// Tunable tracker parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    pub min_baseline_days: u32,
    pub decay: f64,
    pub adapt_alpha: f64,
    pub adapt_gate: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            min_baseline_days: MIN_BASELINE_DAYS,
            decay: DEVIATION_DECAY,
            adapt_alpha: BASELINE_ADAPT_ALPHA,
            adapt_gate: ADAPT_GATE,
        }
    }
}

impl TrackerParams {
    pub fn validate(&self) -> Result<(), DeviationError> {
        if self.min_baseline_days == 0 {
            return Err(DeviationError::Config(
                "tracker.min_baseline_days must be at least 1".to_string(),
            ));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(DeviationError::Config(format!(
                "tracker.decay must be in (0, 1], got {}",
                self.decay
            )));
        }
        if !(0.0..=1.0).contains(&self.adapt_alpha) {
            return Err(DeviationError::Config(format!(
                "tracker.adapt_alpha must be in [0, 1], got {}",
                self.adapt_alpha
            )));
        }
        if !(self.adapt_gate > 0.0 && self.adapt_gate.is_finite()) {
            return Err(DeviationError::Config(format!(
                "tracker.adapt_gate must be positive, got {}",
                self.adapt_gate
            )));
        }
        Ok(())
    }
}

/// Per-user baseline tracker
#[derive(Debug, Clone, Default)]
pub struct LocalBaselineTracker {
    params: TrackerParams,
}

impl LocalBaselineTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Check the persisted-state invariants.
    pub fn validate_state(&self, state: &UserTrackerState) -> Result<(), DeviationError> {
        if state.days_observed as usize != state.history.len() {
            return Err(DeviationError::invalid_state(
                &state.user_id,
                format!(
                    "days_observed is {} but history holds {} entries",
                    state.days_observed,
                    state.history.len()
                ),
            ));
        }

        if !state.cumulative_deviation.is_finite() {
            return Err(DeviationError::invalid_state(
                &state.user_id,
                "cumulative_deviation is not finite",
            ));
        }

        if let Some((index, (feature, value))) = state
            .history
            .iter()
            .enumerate()
            .find_map(|(i, obs)| obs.first_non_finite().map(|bad| (i, bad)))
        {
            return Err(DeviationError::invalid_state(
                &state.user_id,
                format!(
                    "history[{index}].{} is not finite ({value})",
                    feature.as_str()
                ),
            ));
        }

        let min_days = self.params.min_baseline_days;
        match &state.baseline {
            Some(baseline) => {
                if state.history.len() < min_days as usize {
                    return Err(DeviationError::invalid_state(
                        &state.user_id,
                        format!(
                            "baseline present after {} days, needs {min_days}",
                            state.history.len()
                        ),
                    ));
                }
                if let Some(feature) = Feature::ALL
                    .iter()
                    .find(|&&f| !baseline.get(f).is_finite())
                {
                    return Err(DeviationError::invalid_state(
                        &state.user_id,
                        format!("baseline.{} is not finite", feature.as_str()),
                    ));
                }
            }
            None => {
                if state.days_observed >= min_days {
                    return Err(DeviationError::invalid_state(
                        &state.user_id,
                        format!(
                            "no baseline after {} days, expected one from day {min_days}",
                            state.days_observed
                        ),
                    ));
                }
                if state.cumulative_deviation != 0.0 {
                    return Err(DeviationError::invalid_state(
                        &state.user_id,
                        "cumulative_deviation is non-zero before a baseline exists",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Process one day's observation.
    ///
    /// The input state is never modified; on error the caller still holds the
    /// last valid state.
    pub fn update(
        &self,
        state: &UserTrackerState,
        observation: DailyObservation,
    ) -> Result<(UserTrackerState, DailyResult), DeviationError> {
        self.validate_state(state)?;

        let day = state.days_observed.checked_add(1).ok_or_else(|| {
            DeviationError::invalid_state(&state.user_id, "days_observed overflow")
        })?;

        if let Some((feature, value)) = observation.first_non_finite() {
            return Err(DeviationError::NonFiniteFeature {
                user_id: state.user_id.clone(),
                day: day.to_string(),
                field: feature.as_str().to_string(),
                value,
            });
        }

        let mut next = state.clone();
        next.days_observed = day;
        next.history.push(observation);

        let mut phase = Phase::Baseline;
        let mut daily = 0.0;

        match next.baseline {
            None => {
                if next.days_observed >= self.params.min_baseline_days {
                    let baseline = compute_baseline(&next.history).ok_or_else(|| {
                        DeviationError::invalid_state(&next.user_id, "empty history")
                    })?;
                    info!(
                        user_id = %next.user_id,
                        day,
                        sleep_midpoint_min = baseline.sleep_midpoint_min,
                        mean_med_time_min = baseline.mean_med_time_min,
                        activity_load = baseline.activity_load,
                        "baseline established"
                    );
                    next.baseline = Some(baseline);
                }
            }
            Some(baseline) => {
                phase = Phase::Active;
                daily = daily_deviation(&observation, &baseline);
                next.cumulative_deviation = self.params.decay * next.cumulative_deviation + daily;

                if daily.abs() < self.params.adapt_gate {
                    next.baseline = Some(adapt_baseline(
                        &baseline,
                        &observation,
                        self.params.adapt_alpha,
                    ));
                }
            }
        }

        debug!(
            user_id = %next.user_id,
            day,
            phase = phase.as_str(),
            daily_deviation = daily,
            cumulative_deviation = next.cumulative_deviation,
            "local tracker updated"
        );

        let result = DailyResult {
            user_id: next.user_id.clone(),
            day,
            phase,
            daily_deviation: daily,
            cumulative_deviation: next.cumulative_deviation,
            ready: phase == Phase::Active,
        };

        Ok((next, result))
    }
}

/// Per-feature median of the history; `None` for an empty history
pub fn compute_baseline(history: &[DailyObservation]) -> Option<Baseline> {
    let mut baseline = Baseline::from(*history.first()?);
    for feature in Feature::ALL {
        let mut values: Vec<f64> = history.iter().map(|obs| obs.get(feature)).collect();
        baseline.set(feature, median(&mut values)?);
    }
    Some(baseline)
}

/// Weighted, tolerance-normalized distance of today from the baseline.
///
/// Sleep duration is deliberately absent from the formula.
pub fn daily_deviation(today: &DailyObservation, baseline: &Baseline) -> f64 {
    let d_sleep =
        (today.sleep_midpoint_min - baseline.sleep_midpoint_min) / SLEEP_MIDPOINT_TOLERANCE;
    let d_med = (today.mean_med_time_min - baseline.mean_med_time_min) / MED_TIME_TOLERANCE;
    let d_act = (today.activity_load - baseline.activity_load) / ACTIVITY_LOAD_TOLERANCE;

    SLEEP_WEIGHT * d_sleep + MED_WEIGHT * d_med - ACTIVITY_WEIGHT * d_act
}

/// Exponential smoothing of every tracked feature toward today.
///
/// Written as `b + alpha * (t - b)`, equal to `(1 - alpha) * b + alpha * t`, so a
/// day that matches the baseline leaves it bit-for-bit unchanged.
pub fn adapt_baseline(baseline: &Baseline, today: &DailyObservation, alpha: f64) -> Baseline {
    let mut updated = *baseline;
    for feature in Feature::ALL {
        let current = baseline.get(feature);
        updated.set(feature, current + alpha * (today.get(feature) - current));
    }
    updated
}

/// Median with the two middle values averaged for even lengths
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
