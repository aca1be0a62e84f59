//! Feature derivation
//!
//! This module turns a raw daily entry plus the user's profile into:
//! - the [`DailyObservation`] tracked by the local layer
//! - the [`GlobalFeatures`] row consumed by the population model
//!
//! Missing inputs are either rejected or replaced by documented defaults,
//! depending on [`MissingFieldPolicy`]. Substitutions are logged and reported.

use crate::error::DeviationError;
use crate::global::GlobalFeatures;
use crate::types::DailyObservation;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

const MINUTES_PER_DAY: f64 = 1440.0;

pub const DEFAULT_SLEEP_MIDPOINT_MIN: f64 = 720.0;
pub const DEFAULT_SLEEP_DURATION_MIN: f64 = 420.0;
pub const DEFAULT_ACTIVITY_DURATION_MIN: f64 = 0.0;
pub const DEFAULT_ACTIVITY_MET: f64 = 1.0;
pub const DEFAULT_MEAN_MED_TIME_MIN: f64 = 0.0;

/// What to do when an input field is absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Fail with `MissingPrecondition`
    #[default]
    Reject,
    /// Substitute the documented default and log it
    ApplyDefaults,
}

/// Biological sex as recorded in the user profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

/// Demographics used by the population model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
}

/// One day's raw behavioral log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    pub user_id: String,
    pub behavioral_date: NaiveDate,
    /// Sleep onset (minutes after midnight)
    #[serde(default)]
    pub sleep_start_min: Option<f64>,
    /// Wake time (minutes after midnight)
    #[serde(default)]
    pub wake_min: Option<f64>,
    #[serde(default)]
    pub sleep_midpoint_min: Option<f64>,
    #[serde(default)]
    pub sleep_duration_min: Option<f64>,
    /// Dose times (minutes after midnight)
    #[serde(default)]
    pub medication_times_min: Vec<f64>,
    #[serde(default)]
    pub activity_duration_min: Option<f64>,
    #[serde(default, rename = "activity_MET")]
    pub activity_met: Option<f64>,
}

/// Derived inputs for both layers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedFeatures {
    pub observation: DailyObservation,
    pub global: GlobalFeatures,
    /// Fields that were filled with defaults
    pub defaults_applied: Vec<&'static str>,
}

/// Derives observations and model inputs from daily entries
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureDeriver {
    policy: MissingFieldPolicy,
}

impl FeatureDeriver {
    pub fn new(policy: MissingFieldPolicy) -> Self {
        Self { policy }
    }

    pub fn derive(
        &self,
        entry: &DailyEntry,
        profile: &UserProfile,
    ) -> Result<DerivedFeatures, DeviationError> {
        let mut ctx = Resolver {
            entry,
            policy: self.policy,
            defaults_applied: Vec::new(),
        };

        let age = profile
            .age
            .ok_or_else(|| ctx.missing("age"))? as f64;

        let sex = match profile.sex {
            Some(Sex::Male) => 1.0,
            Some(Sex::Female) => 0.0,
            None => ctx.fallback("sex", 0.0)?,
        };

        let (sleep_midpoint_min, sleep_duration_min) = match (entry.sleep_start_min, entry.wake_min)
        {
            (Some(start), Some(wake)) => sleep_window(start, wake),
            _ => (
                ctx.resolve("sleep_midpoint_min", entry.sleep_midpoint_min, DEFAULT_SLEEP_MIDPOINT_MIN)?,
                ctx.resolve("sleep_duration_min", entry.sleep_duration_min, DEFAULT_SLEEP_DURATION_MIN)?,
            ),
        };

        let doses: Vec<f64> = entry
            .medication_times_min
            .iter()
            .copied()
            .filter(|t| t.is_finite())
            .collect();
        let dose_count = doses.len() as f64;
        let mean_med_time_min = if doses.is_empty() {
            ctx.fallback("mean_med_time_min", DEFAULT_MEAN_MED_TIME_MIN)?
        } else {
            doses.iter().sum::<f64>() / dose_count
        };

        let activity_duration_min = ctx.resolve(
            "activity_duration_min",
            entry.activity_duration_min,
            DEFAULT_ACTIVITY_DURATION_MIN,
        )?;
        let activity_met = ctx.resolve("activity_MET", entry.activity_met, DEFAULT_ACTIVITY_MET)?;
        let activity_load = activity_duration_min * activity_met;

        let observation = DailyObservation {
            sleep_midpoint_min,
            sleep_duration_min,
            mean_med_time_min,
            activity_load,
        };

        let global = GlobalFeatures {
            age,
            sex,
            sleep_midpoint_min,
            sleep_duration_min,
            dose_count,
            mean_med_time_min,
            activity_duration_min,
            activity_met,
            activity_load,
        };

        Ok(DerivedFeatures {
            observation,
            global,
            defaults_applied: ctx.defaults_applied,
        })
    }
}

/// Sleep duration and midpoint from onset and wake times, wrapping past midnight.
///
/// `duration = (wake + 1440 - start) mod 1440`,
/// `midpoint = (start + floor(duration / 2)) mod 1440`.
pub fn sleep_window(start_min: f64, wake_min: f64) -> (f64, f64) {
    let duration = (wake_min + MINUTES_PER_DAY - start_min).rem_euclid(MINUTES_PER_DAY);
    let midpoint = (start_min + (duration / 2.0).floor()).rem_euclid(MINUTES_PER_DAY);
    (midpoint, duration)
}

struct Resolver<'a> {
    entry: &'a DailyEntry,
    policy: MissingFieldPolicy,
    defaults_applied: Vec<&'static str>,
}

impl Resolver<'_> {
    fn missing(&self, field: &str) -> DeviationError {
        DeviationError::MissingPrecondition {
            user_id: self.entry.user_id.clone(),
            day: self.entry.behavioral_date.to_string(),
            field: field.to_string(),
        }
    }

    fn resolve(
        &mut self,
        field: &'static str,
        value: Option<f64>,
        default: f64,
    ) -> Result<f64, DeviationError> {
        match value {
            Some(v) => Ok(v),
            None => self.fallback(field, default),
        }
    }

    fn fallback(&mut self, field: &'static str, default: f64) -> Result<f64, DeviationError> {
        match self.policy {
            MissingFieldPolicy::Reject => Err(self.missing(field)),
            MissingFieldPolicy::ApplyDefaults => {
                warn!(
                    user_id = %self.entry.user_id,
                    date = %self.entry.behavioral_date,
                    field,
                    default,
                    "missing field replaced with default"
                );
                self.defaults_applied.push(field);
                Ok(default)
            }
        }
    }
}
