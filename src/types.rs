//! Core types for Deviation Flux
//!
//! This module defines the records that flow between the local baseline tracker,
//! the global estimator boundary, and the fusion engine.

use serde::{Deserialize, Serialize};

/// Behavioral feature tracked by the local layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    SleepMidpointMin,
    SleepDurationMin,
    MeanMedTimeMin,
    ActivityLoad,
}

impl Feature {
    /// Every tracked feature, in persisted field order
    pub const ALL: [Feature; 4] = [
        Feature::SleepMidpointMin,
        Feature::SleepDurationMin,
        Feature::MeanMedTimeMin,
        Feature::ActivityLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::SleepMidpointMin => "sleep_midpoint_min",
            Feature::SleepDurationMin => "sleep_duration_min",
            Feature::MeanMedTimeMin => "mean_med_time_min",
            Feature::ActivityLoad => "activity_load",
        }
    }
}

/// One user's behavioral snapshot for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    /// Midpoint of the main sleep period (minutes after midnight)
    pub sleep_midpoint_min: f64,
    /// Sleep duration (minutes)
    pub sleep_duration_min: f64,
    /// Mean medication time of day (minutes after midnight)
    pub mean_med_time_min: f64,
    /// Activity duration multiplied by MET
    pub activity_load: f64,
}

impl DailyObservation {
    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::SleepMidpointMin => self.sleep_midpoint_min,
            Feature::SleepDurationMin => self.sleep_duration_min,
            Feature::MeanMedTimeMin => self.mean_med_time_min,
            Feature::ActivityLoad => self.activity_load,
        }
    }

    /// First tracked feature holding NaN or an infinity, if any
    pub fn first_non_finite(&self) -> Option<(Feature, f64)> {
        Feature::ALL
            .iter()
            .map(|&f| (f, self.get(f)))
            .find(|(_, v)| !v.is_finite())
    }
}

/// A user's personal reference value for every tracked feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub sleep_midpoint_min: f64,
    pub sleep_duration_min: f64,
    pub mean_med_time_min: f64,
    pub activity_load: f64,
}

impl Baseline {
    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::SleepMidpointMin => self.sleep_midpoint_min,
            Feature::SleepDurationMin => self.sleep_duration_min,
            Feature::MeanMedTimeMin => self.mean_med_time_min,
            Feature::ActivityLoad => self.activity_load,
        }
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        match feature {
            Feature::SleepMidpointMin => self.sleep_midpoint_min = value,
            Feature::SleepDurationMin => self.sleep_duration_min = value,
            Feature::MeanMedTimeMin => self.mean_med_time_min = value,
            Feature::ActivityLoad => self.activity_load = value,
        }
    }
}

impl From<DailyObservation> for Baseline {
    fn from(obs: DailyObservation) -> Self {
        Self {
            sleep_midpoint_min: obs.sleep_midpoint_min,
            sleep_duration_min: obs.sleep_duration_min,
            mean_med_time_min: obs.mean_med_time_min,
            activity_load: obs.activity_load,
        }
    }
}

impl From<Baseline> for DailyObservation {
    fn from(baseline: Baseline) -> Self {
        Self {
            sleep_midpoint_min: baseline.sleep_midpoint_min,
            sleep_duration_min: baseline.sleep_duration_min,
            mean_med_time_min: baseline.mean_med_time_min,
            activity_load: baseline.activity_load,
        }
    }
}

/// Persisted per-user state of the local baseline tracker.
///
/// Invariant: `days_observed == history.len()`. The baseline is absent until
/// the warm-up window completes and is only adapted afterwards, never cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTrackerState {
    #[serde(default)]
    pub user_id: String,
    pub days_observed: u32,
    pub history: Vec<DailyObservation>,
    pub baseline: Option<Baseline>,
    pub cumulative_deviation: f64,
}

impl UserTrackerState {
    /// Empty state for a user seen for the first time
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            days_observed: 0,
            history: Vec::new(),
            baseline: None,
            cumulative_deviation: 0.0,
        }
    }
}

/// Phase the tracker reported for a processed day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Warm-up: no deviation is computed
    Baseline,
    /// Baseline established: deviation is computed against it
    Active,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Baseline => "baseline",
            Phase::Active => "active",
        }
    }
}

/// Output of one local tracker update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyResult {
    pub user_id: String,
    /// 1-based index of the processed day
    pub day: u32,
    pub phase: Phase,
    pub daily_deviation: f64,
    pub cumulative_deviation: f64,
    pub ready: bool,
}

/// Three-way deviation label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum DeviationLabel {
    Down,
    Stable,
    Up,
}

impl DeviationLabel {
    pub fn value(&self) -> i8 {
        match self {
            DeviationLabel::Down => -1,
            DeviationLabel::Stable => 0,
            DeviationLabel::Up => 1,
        }
    }

    /// Risk category shown to end users
    pub fn category(&self) -> &'static str {
        match self {
            DeviationLabel::Down => "DOWN",
            DeviationLabel::Stable => "STABLE",
            DeviationLabel::Up => "UP",
        }
    }
}

impl From<DeviationLabel> for i8 {
    fn from(label: DeviationLabel) -> Self {
        label.value()
    }
}

impl From<DeviationLabel> for f64 {
    fn from(label: DeviationLabel) -> Self {
        f64::from(label.value())
    }
}

impl TryFrom<i8> for DeviationLabel {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(DeviationLabel::Down),
            0 => Ok(DeviationLabel::Stable),
            1 => Ok(DeviationLabel::Up),
            other => Err(format!("deviation label must be -1, 0 or 1, got {other}")),
        }
    }
}

/// Inputs to the fusion engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionInput {
    /// Discretized global deviation (-1, 0 or 1)
    pub global_deviation: f64,
    pub local_cumulative_deviation: f64,
    pub local_signal_ready: bool,
    pub days_since_account_creation: u32,
}

/// Trust split between the global and local layers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub global: f64,
    pub local: f64,
}

/// Fused deviation, recomputed on every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutput {
    pub days_since_account_creation: u32,
    pub weights: FusionWeights,
    pub global_deviation: f64,
    /// Local deviation actually used (0.0 while the local signal is not ready)
    pub effective_local_deviation: f64,
    pub final_deviation_score: f64,
    pub final_deviation: DeviationLabel,
}
