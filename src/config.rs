//! Engine configuration
//!
//! Loaded from `devflux.toml` in the working directory or a user-specified
//! path. Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! state_dir = "state"
//! model_path = "models/global.json"
//! missing_fields = "reject"
//!
//! [tracker]
//! min_baseline_days = 7
//! decay = 0.95
//! adapt_alpha = 0.02
//! adapt_gate = 0.5
//! ```

use crate::baseline::TrackerParams;
use crate::error::DeviationError;
use crate::features::MissingFieldPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name searched in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "devflux.toml";

/// Default directory for per-user tracker state
pub const DEFAULT_STATE_DIR: &str = "devflux-state";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one state file per user
    pub state_dir: PathBuf,
    /// JSON weights for the linear global estimator
    pub model_path: Option<PathBuf>,
    pub missing_fields: MissingFieldPolicy,
    pub tracker: TrackerParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            model_path: None,
            missing_fields: MissingFieldPolicy::default(),
            tracker: TrackerParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, DeviationError> {
        let content = std::fs::read_to_string(path).map_err(|e| DeviationError::io(path, e))?;
        Self::from_toml(&content)
            .map_err(|e| DeviationError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, DeviationError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DeviationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration: the explicit path if given, else `./devflux.toml`
    /// if present, else defaults.
    pub fn discover(explicit_path: Option<&Path>) -> Result<Self, DeviationError> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidate = Path::new(DEFAULT_CONFIG_FILE);
        if candidate.exists() {
            return Self::load(candidate);
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), DeviationError> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(DeviationError::Config(
                "state_dir must not be empty".to_string(),
            ));
        }
        self.tracker.validate()
    }

    pub fn to_toml(&self) -> Result<String, DeviationError> {
        toml::to_string_pretty(self).map_err(|e| DeviationError::Config(e.to_string()))
    }
}
