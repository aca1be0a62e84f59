//! Deviation Flux - Per-user deviation tracking from daily behavioral telemetry
//!
//! Flux estimates a bounded deviation label for a user by combining two layers:
//!
//! - **Global layer**: a population-trained estimator mapping a 9-feature row to
//!   a z-score, discretized to {-1, 0, 1}
//! - **Local layer**: a per-user baseline tracker producing a daily and a
//!   decaying cumulative deviation once enough personal history exists
//!
//! Both are fused with weights that move trust from the population prior to the
//! personal baseline as the account ages.
//!
//! Pipeline: Daily entry → FeatureDeriver → LocalBaselineTracker + GlobalEstimator
//! → Fusion → DailyReport

pub mod baseline;
pub mod config;
pub mod error;
pub mod features;
pub mod fusion;
pub mod global;
pub mod pipeline;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::{LocalBaselineTracker, TrackerParams, MIN_BASELINE_DAYS};
pub use config::EngineConfig;
pub use error::DeviationError;
pub use features::{DailyEntry, FeatureDeriver, MissingFieldPolicy, UserProfile};
pub use fusion::fuse;
pub use global::{GlobalEstimator, GlobalFeatures, LinearEstimator};
pub use pipeline::{days_since_account_creation, DailyReport, DeviationProcessor};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
pub use types::{
    DailyObservation, DailyResult, DeviationLabel, FusionInput, FusionOutput, Phase,
    UserTrackerState,
};

/// Library version
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "deviation-flux";
