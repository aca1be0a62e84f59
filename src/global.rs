//! Global (population) deviation estimator boundary
//!
//! The population model is consumed as a black box mapping a fixed 9-dimensional
//! feature vector to a z-score. This module owns the feature layout, the ±0.5
//! discretization of that z-score, and a linear estimator loadable from JSON.

use crate::error::DeviationError;
use crate::types::DeviationLabel;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// z-scores at or above this are labelled [`DeviationLabel::Up`]
pub const GLOBAL_UP_THRESHOLD: f64 = 0.5;
/// z-scores at or below this are labelled [`DeviationLabel::Down`]
pub const GLOBAL_DOWN_THRESHOLD: f64 = -0.5;

/// Number of inputs the population model expects
pub const GLOBAL_FEATURE_COUNT: usize = 9;

/// Feature names in model input order
pub const GLOBAL_FEATURE_NAMES: [&str; GLOBAL_FEATURE_COUNT] = [
    "age",
    "sex",
    "sleep_midpoint_min",
    "sleep_duration_min",
    "dose_count",
    "mean_med_time_min",
    "activity_duration_min",
    "activity_MET",
    "activity_load",
];

/// Input row for the population model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalFeatures {
    pub age: f64,
    /// 1 for male, 0 otherwise
    pub sex: f64,
    pub sleep_midpoint_min: f64,
    pub sleep_duration_min: f64,
    pub dose_count: f64,
    pub mean_med_time_min: f64,
    pub activity_duration_min: f64,
    #[serde(rename = "activity_MET")]
    pub activity_met: f64,
    pub activity_load: f64,
}

impl GlobalFeatures {
    /// Features in the order of [`GLOBAL_FEATURE_NAMES`]
    pub fn to_vector(&self) -> [f64; GLOBAL_FEATURE_COUNT] {
        [
            self.age,
            self.sex,
            self.sleep_midpoint_min,
            self.sleep_duration_min,
            self.dose_count,
            self.mean_med_time_min,
            self.activity_duration_min,
            self.activity_met,
            self.activity_load,
        ]
    }
}

/// Population-trained regression producing a z-score
pub trait GlobalEstimator {
    fn predict(&self, features: &GlobalFeatures) -> f64;
}

impl<F> GlobalEstimator for F
where
    F: Fn(&GlobalFeatures) -> f64,
{
    fn predict(&self, features: &GlobalFeatures) -> f64 {
        self(features)
    }
}

/// Discretize a population z-score: `z <= -0.5 → -1`, `z >= 0.5 → 1`, else `0`
pub fn discretize_z(z: f64) -> DeviationLabel {
    if z <= GLOBAL_DOWN_THRESHOLD {
        DeviationLabel::Down
    } else if z >= GLOBAL_UP_THRESHOLD {
        DeviationLabel::Up
    } else {
        DeviationLabel::Stable
    }
}

/// Global layer output for one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalAssessment {
    /// Raw population z-score
    pub z: f64,
    pub deviation: DeviationLabel,
}

/// Run the estimator and discretize its output.
pub fn assess<E: GlobalEstimator + ?Sized>(
    estimator: &E,
    features: &GlobalFeatures,
) -> Result<GlobalAssessment, DeviationError> {
    let z = estimator.predict(features);
    if !z.is_finite() {
        return Err(DeviationError::Model(format!(
            "estimator returned a non-finite z-score ({z})"
        )));
    }
    Ok(GlobalAssessment {
        z,
        deviation: discretize_z(z),
    })
}

/// Linear surrogate of the population model: `z = intercept + Σ coefᵢ·xᵢ`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearEstimator {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearEstimator {
    pub fn new(intercept: f64, coefficients: Vec<f64>) -> Result<Self, DeviationError> {
        let estimator = Self {
            intercept,
            coefficients,
        };
        estimator.validate()?;
        Ok(estimator)
    }

    /// Load model weights from a JSON file
    pub fn from_path(path: &Path) -> Result<Self, DeviationError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DeviationError::io(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, DeviationError> {
        let estimator: Self = serde_json::from_str(json)?;
        estimator.validate()?;
        Ok(estimator)
    }

    fn validate(&self) -> Result<(), DeviationError> {
        if self.coefficients.len() != GLOBAL_FEATURE_COUNT {
            return Err(DeviationError::Model(format!(
                "expected {} coefficients, got {}",
                GLOBAL_FEATURE_COUNT,
                self.coefficients.len()
            )));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(DeviationError::Model(
                "model weights must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl GlobalEstimator for LinearEstimator {
    fn predict(&self, features: &GlobalFeatures) -> f64 {
        features
            .to_vector()
            .iter()
            .zip(&self.coefficients)
            .fold(self.intercept, |acc, (x, c)| acc + x * c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> GlobalFeatures {
        GlobalFeatures {
            age: 40.0,
            sex: 1.0,
            sleep_midpoint_min: 180.0,
            sleep_duration_min: 420.0,
            dose_count: 2.0,
            mean_med_time_min: 600.0,
            activity_duration_min: 30.0,
            activity_met: 4.0,
            activity_load: 120.0,
        }
    }

    #[test]
    fn test_discretize_z_boundaries() {
        assert_eq!(discretize_z(-0.5), DeviationLabel::Down);
        assert_eq!(discretize_z(-0.4999), DeviationLabel::Stable);
        assert_eq!(discretize_z(0.4999), DeviationLabel::Stable);
        assert_eq!(discretize_z(0.5), DeviationLabel::Up);
    }

    #[test]
    fn test_closure_estimator() {
        let estimator = |f: &GlobalFeatures| f.age / 40.0;
        let assessment = assess(&estimator, &features()).unwrap();
        assert_eq!(assessment.z, 1.0);
        assert_eq!(assessment.deviation, DeviationLabel::Up);
    }

    #[test]
    fn test_non_finite_prediction_is_rejected() {
        let estimator = |_: &GlobalFeatures| f64::NAN;
        assert!(matches!(
            assess(&estimator, &features()),
            Err(DeviationError::Model(_))
        ));
    }

    #[test]
    fn test_linear_estimator_from_json() {
        let json = r#"{
            "intercept": -0.5,
            "coefficients": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.005]
        }"#;
        let estimator = LinearEstimator::from_json(json).unwrap();
        let z = estimator.predict(&features());
        assert!((z - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_linear_estimator_rejects_wrong_arity() {
        let err = LinearEstimator::new(0.0, vec![1.0; 3]).unwrap_err();
        assert!(err.to_string().contains("expected 9 coefficients"));
    }

    #[test]
    fn test_feature_vector_order() {
        let vector = features().to_vector();
        assert_eq!(vector[0], 40.0);
        assert_eq!(vector[7], 4.0);
        assert_eq!(vector[8], 120.0);

        let value = serde_json::to_value(features()).unwrap();
        assert_eq!(value["activity_MET"], 4.0);
    }
}
