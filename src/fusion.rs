//! Global/local fusion
//!
//! Blends the discretized global deviation with the local cumulative deviation
//! using weights that shift trust from the population prior to the personal
//! baseline as the account ages.

use crate::types::{DeviationLabel, FusionInput, FusionOutput, FusionWeights};
use tracing::debug;

/// Fused scores at or above this are labelled [`DeviationLabel::Up`]
pub const FUSION_UP_THRESHOLD: f64 = 1.5;
/// Fused scores at or below this are labelled [`DeviationLabel::Down`]
pub const FUSION_DOWN_THRESHOLD: f64 = -1.5;

/// One band of the account-age weight schedule (upper bound inclusive)
#[derive(Debug, Clone, Copy)]
pub struct WeightBand {
    pub max_days: u32,
    pub weights: FusionWeights,
}

/// Account-age weight schedule, checked in order
pub const WEIGHT_SCHEDULE: [WeightBand; 4] = [
    WeightBand {
        max_days: 20,
        weights: FusionWeights {
            global: 0.9,
            local: 0.1,
        },
    },
    WeightBand {
        max_days: 30,
        weights: FusionWeights {
            global: 0.8,
            local: 0.2,
        },
    },
    WeightBand {
        max_days: 60,
        weights: FusionWeights {
            global: 0.6,
            local: 0.4,
        },
    },
    WeightBand {
        max_days: 90,
        weights: FusionWeights {
            global: 0.3,
            local: 0.7,
        },
    },
];

/// Weights for accounts older than the last band
pub const MATURE_WEIGHTS: FusionWeights = FusionWeights {
    global: 0.0,
    local: 1.0,
};

/// Look up the fusion weights for an account age in days
pub fn weights_for(days_since_account_creation: u32) -> FusionWeights {
    WEIGHT_SCHEDULE
        .iter()
        .find(|band| days_since_account_creation <= band.max_days)
        .map(|band| band.weights)
        .unwrap_or(MATURE_WEIGHTS)
}

/// Map a fused score onto the three-way label
pub fn discretize_score(score: f64) -> DeviationLabel {
    if score <= FUSION_DOWN_THRESHOLD {
        DeviationLabel::Down
    } else if score >= FUSION_UP_THRESHOLD {
        DeviationLabel::Up
    } else {
        DeviationLabel::Stable
    }
}

/// Fuse both layers into one label. Pure: identical inputs give identical output.
///
/// The local deviation only contributes once the local signal is ready; before
/// that it is forced to 0.0 even though the schedule assigns it a weight.
pub fn fuse(input: &FusionInput) -> FusionOutput {
    let weights = weights_for(input.days_since_account_creation);

    let effective_local_deviation = if input.local_signal_ready {
        input.local_cumulative_deviation
    } else {
        0.0
    };

    let final_deviation_score =
        weights.global * input.global_deviation + weights.local * effective_local_deviation;
    let final_deviation = discretize_score(final_deviation_score);

    debug!(
        days = input.days_since_account_creation,
        w_global = weights.global,
        w_local = weights.local,
        score = final_deviation_score,
        label = final_deviation.value(),
        "fused deviation"
    );

    FusionOutput {
        days_since_account_creation: input.days_since_account_creation,
        weights,
        global_deviation: input.global_deviation,
        effective_local_deviation,
        final_deviation_score,
        final_deviation,
    }
}

impl FusionOutput {
    /// User-facing summary of the label and how much each layer was trusted
    pub fn explanation(&self) -> String {
        let risk = match self.final_deviation {
            DeviationLabel::Up => {
                "Your glucose levels show higher variability. Consider reviewing your daily routine."
            }
            DeviationLabel::Stable => {
                "Your glucose levels are stable. Keep maintaining your current routine."
            }
            DeviationLabel::Down => "Your glucose levels show improved stability. Great job!",
        };

        let global_pct = (self.weights.global * 100.0).round();
        let local_pct = (self.weights.local * 100.0).round();
        let weighting = if self.weights.global == 0.0 {
            "We're using your personal patterns (100%) to predict your glucose control."
                .to_string()
        } else if self.weights.global > self.weights.local {
            format!(
                "We're using population-based insights ({global_pct}%) with your personal data ({local_pct}%)."
            )
        } else {
            format!(
                "We're balancing population insights ({global_pct}%) with your personal patterns ({local_pct}%)."
            )
        };

        format!("{risk} {weighting}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn input(days: u32, global: f64, local: f64, ready: bool) -> FusionInput {
        FusionInput {
            global_deviation: global,
            local_cumulative_deviation: local,
            local_signal_ready: ready,
            days_since_account_creation: days,
        }
    }

    fn pair(w: FusionWeights) -> (f64, f64) {
        (w.global, w.local)
    }

    #[test]
    fn test_weight_schedule_boundaries() {
        assert_eq!(pair(weights_for(0)), (0.9, 0.1));
        assert_eq!(pair(weights_for(20)), (0.9, 0.1));
        assert_eq!(pair(weights_for(21)), (0.8, 0.2));
        assert_eq!(pair(weights_for(30)), (0.8, 0.2));
        assert_eq!(pair(weights_for(31)), (0.6, 0.4));
        assert_eq!(pair(weights_for(60)), (0.6, 0.4));
        assert_eq!(pair(weights_for(61)), (0.3, 0.7));
        assert_eq!(pair(weights_for(90)), (0.3, 0.7));
        assert_eq!(pair(weights_for(91)), (0.0, 1.0));
        assert_eq!(pair(weights_for(u32::MAX)), (0.0, 1.0));
    }

    #[test]
    fn test_global_share_never_increases_with_age() {
        let mut previous = f64::INFINITY;
        for days in 0..200 {
            let w = weights_for(days);
            assert!(w.global <= previous);
            previous = w.global;
        }
    }

    #[test]
    fn test_discretization_boundaries() {
        assert_eq!(discretize_score(1.5), DeviationLabel::Up);
        assert_eq!(discretize_score(1.4999), DeviationLabel::Stable);
        assert_eq!(discretize_score(-1.5), DeviationLabel::Down);
        assert_eq!(discretize_score(-1.4999), DeviationLabel::Stable);
        assert_eq!(discretize_score(0.0), DeviationLabel::Stable);
    }

    #[test]
    fn test_unready_local_signal_is_gated() {
        for local in [-50.0, -1.0, 0.0, 3.0, 1e6] {
            let out = fuse(&input(45, 1.0, local, false));
            assert_eq!(out.effective_local_deviation, 0.0);
            assert_eq!(out.final_deviation_score, out.weights.global * 1.0);
        }
    }

    #[test]
    fn test_ready_local_signal_contributes() {
        let out = fuse(&input(100, 0.0, 2.0, true));
        assert_eq!(pair(out.weights), (0.0, 1.0));
        assert_eq!(out.final_deviation_score, 2.0);
        assert_eq!(out.final_deviation, DeviationLabel::Up);

        let out = fuse(&input(75, -1.0, -2.0, true));
        assert!((out.final_deviation_score + 1.7).abs() < 1e-12);
        assert_eq!(out.final_deviation, DeviationLabel::Down);
    }

    #[test]
    fn test_global_alone_cannot_reach_threshold() {
        for days in [0, 25, 45, 80, 120] {
            for global in [-1.0, 0.0, 1.0] {
                let out = fuse(&input(days, global, 0.0, false));
                assert_eq!(out.final_deviation, DeviationLabel::Stable);
            }
        }
    }

    #[test]
    fn test_fuse_is_deterministic() {
        let fused = input(33, 1.0, 1.234, true);
        assert_eq!(fuse(&fused), fuse(&fused));
    }

    #[test]
    fn test_output_serialization() {
        let out = fuse(&input(10, 1.0, 0.0, false));
        let value = serde_json::to_value(&out).unwrap();

        assert_eq!(value["weights"]["global"], 0.9);
        assert_eq!(value["final_deviation"], 0);
        assert_eq!(value["days_since_account_creation"], 10);
    }

    #[test]
    fn test_explanation_mentions_weighting() {
        let early = fuse(&input(5, 0.0, 0.0, false)).explanation();
        assert!(early.contains("stable"));
        assert!(early.contains("population-based insights (90%)"));

        let mature = fuse(&input(200, 0.0, 3.0, true)).explanation();
        assert!(mature.contains("higher variability"));
        assert!(mature.contains("personal patterns (100%)"));
    }

    #[test]
    fn test_explanation_follows_weights_not_age_bands() {
        let late_band = fuse(&input(75, 0.0, 0.0, true)).explanation();
        assert!(late_band.contains("balancing population insights (30%)"));
        assert!(late_band.contains("personal patterns (70%)"));
    }
}
