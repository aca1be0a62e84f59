//! Tracker state persistence
//!
//! The tracker itself never touches storage. Callers load a user's state, run
//! the update, and save the result through a [`StateStore`].
//!
//! [`FileStateStore`] publishes each state with write-then-swap:
//! 1) write `<user>.json.tmp`
//! 2) fsync temp
//! 3) rename temp -> `<user>.json`
//! 4) fsync directory
//!
//! A crash at any step leaves either the previous or the new state on disk,
//! never a half-written one.

use crate::baseline::LocalBaselineTracker;
use crate::error::DeviationError;
use crate::types::UserTrackerState;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persistence boundary for per-user tracker state
pub trait StateStore {
    /// Load a user's state; unknown users get a fresh empty state.
    fn load(&self, user_id: &str) -> Result<UserTrackerState, DeviationError>;

    /// Durably replace a user's state.
    fn save(&mut self, user_id: &str, state: &UserTrackerState) -> Result<(), DeviationError>;
}

/// Reject ids that could escape the state directory or collide after sanitizing
pub fn validate_user_id(user_id: &str) -> Result<(), DeviationError> {
    let valid = !user_id.is_empty()
        && user_id.len() <= 128
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DeviationError::InvalidUserId(user_id.to_string()))
    }
}

/// A state stamped with a user id may only live under that id
fn check_owner(user_id: &str, state: &UserTrackerState) -> Result<(), DeviationError> {
    if state.user_id.is_empty() || state.user_id == user_id {
        Ok(())
    } else {
        Err(DeviationError::invalid_state(
            user_id,
            format!("stored state belongs to user {}", state.user_id),
        ))
    }
}

/// Parse and check a stored state against the tracker invariants
fn decode_state(
    user_id: &str,
    json: &str,
    tracker: &LocalBaselineTracker,
) -> Result<UserTrackerState, DeviationError> {
    let mut state: UserTrackerState = serde_json::from_str(json)?;

    check_owner(user_id, &state)?;
    if state.user_id.is_empty() {
        state.user_id = user_id.to_string();
    }

    tracker.validate_state(&state)?;
    Ok(state)
}

/// One JSON file per user under a state directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
    tracker: LocalBaselineTracker,
}

impl FileStateStore {
    /// Open (and create if needed) a state directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DeviationError> {
        Self::with_tracker(dir, LocalBaselineTracker::default())
    }

    /// Open a directory whose states are validated with the given tracker's parameters
    pub fn with_tracker(
        dir: impl Into<PathBuf>,
        tracker: LocalBaselineTracker,
    ) -> Result<Self, DeviationError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| DeviationError::io(&dir, e))?;
        Ok(Self { dir, tracker })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{user_id}.json"))
    }

    fn temp_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{user_id}.json.tmp"))
    }

    /// User ids with a stored state, sorted
    pub fn users(&self) -> Result<Vec<String>, DeviationError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| DeviationError::io(&self.dir, e))?;
        let mut users = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DeviationError::io(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(user) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                if validate_user_id(user).is_ok() {
                    users.push(user.to_string());
                }
            }
        }
        users.sort();
        Ok(users)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, user_id: &str) -> Result<UserTrackerState, DeviationError> {
        validate_user_id(user_id)?;
        let path = self.state_path(user_id);

        if !path.exists() {
            debug!(user_id, "no stored state, starting fresh");
            return Ok(UserTrackerState::new(user_id));
        }

        let content = fs::read_to_string(&path).map_err(|e| DeviationError::io(&path, e))?;
        decode_state(user_id, &content, &self.tracker)
    }

    fn save(&mut self, user_id: &str, state: &UserTrackerState) -> Result<(), DeviationError> {
        validate_user_id(user_id)?;
        check_owner(user_id, state)?;
        self.tracker.validate_state(state)?;

        let payload = serde_json::to_vec_pretty(state)?;
        let temp_path = self.temp_path(user_id);
        let path = self.state_path(user_id);

        let mut temp_file =
            File::create(&temp_path).map_err(|e| DeviationError::io(&temp_path, e))?;
        temp_file
            .write_all(&payload)
            .map_err(|e| DeviationError::io(&temp_path, e))?;
        temp_file
            .sync_all()
            .map_err(|e| DeviationError::io(&temp_path, e))?;
        drop(temp_file);

        fs::rename(&temp_path, &path).map_err(|e| DeviationError::io(&path, e))?;
        sync_directory(&self.dir)?;

        debug!(user_id, days_observed = state.days_observed, "state saved");
        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> Result<(), DeviationError> {
    let handle = File::open(dir).map_err(|e| DeviationError::io(dir, e))?;
    handle.sync_all().map_err(|e| DeviationError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> Result<(), DeviationError> {
    Ok(())
}

/// In-memory store holding serialized snapshots
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    states: HashMap<String, String>,
    tracker: LocalBaselineTracker,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(tracker: LocalBaselineTracker) -> Self {
        Self {
            states: HashMap::new(),
            tracker,
        }
    }

    /// Seed a raw snapshot, bypassing validation
    pub fn insert_raw(&mut self, user_id: &str, json: impl Into<String>) {
        self.states.insert(user_id.to_string(), json.into());
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, user_id: &str) -> Result<UserTrackerState, DeviationError> {
        validate_user_id(user_id)?;
        match self.states.get(user_id) {
            Some(json) => decode_state(user_id, json, &self.tracker),
            None => Ok(UserTrackerState::new(user_id)),
        }
    }

    fn save(&mut self, user_id: &str, state: &UserTrackerState) -> Result<(), DeviationError> {
        validate_user_id(user_id)?;
        check_owner(user_id, state)?;
        self.tracker.validate_state(state)?;
        let json = serde_json::to_string(state)?;
        self.states.insert(user_id.to_string(), json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyObservation;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn observed_state(user_id: &str, days: u32) -> UserTrackerState {
        let tracker = LocalBaselineTracker::default();
        let mut state = UserTrackerState::new(user_id);
        for i in 0..days {
            let day = DailyObservation {
                sleep_midpoint_min: 700.0 + i as f64,
                sleep_duration_min: 420.0,
                mean_med_time_min: 480.0,
                activity_load: 300.0,
            };
            state = tracker.update(&state, day).unwrap().0;
        }
        state
    }

    #[test]
    fn test_unknown_user_gets_fresh_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();

        let state = store.load("new-user").unwrap();
        assert_eq!(state, UserTrackerState::new("new-user"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::open(dir.path()).unwrap();
        let state = observed_state("alice", 9);

        store.save("alice", &state).unwrap();
        assert!(store.state_path("alice").exists());
        assert!(!dir.path().join("alice.json.tmp").exists());

        assert_eq!(store.load("alice").unwrap(), state);
        assert_eq!(store.users().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::open(dir.path()).unwrap();

        store.save("bob", &observed_state("bob", 3)).unwrap();
        store.save("bob", &observed_state("bob", 8)).unwrap();

        assert_eq!(store.load("bob").unwrap().days_observed, 8);
    }

    #[test]
    fn test_corrupt_state_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        fs::write(
            dir.path().join("carol.json"),
            r#"{"days_observed": 2, "history": [], "baseline": null, "cumulative_deviation": 0.0}"#,
        )
        .unwrap();

        match store.load("carol").unwrap_err() {
            DeviationError::InvalidState { user_id, reason } => {
                assert_eq!(user_id, "carol");
                assert!(reason.contains("days_observed is 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_state_is_never_written() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::open(dir.path()).unwrap();
        let mut state = observed_state("dave", 2);
        state.days_observed = 5;

        assert!(store.save("dave", &state).is_err());
        assert!(!store.state_path("dave").exists());
    }

    #[test]
    fn test_state_of_another_user_is_rejected() {
        let mut store = MemoryStateStore::new();
        store.insert_raw(
            "erin",
            serde_json::to_string(&observed_state("frank", 1)).unwrap(),
        );
        assert!(matches!(
            store.load("erin"),
            Err(DeviationError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_state_is_not_saved_under_another_user() {
        let dir = TempDir::new().unwrap();
        let mut files = FileStateStore::open(dir.path()).unwrap();
        let mut memory = MemoryStateStore::new();
        let state = observed_state("frank", 2);

        for result in [files.save("erin", &state), memory.save("erin", &state)] {
            match result.unwrap_err() {
                DeviationError::InvalidState { user_id, reason } => {
                    assert_eq!(user_id, "erin");
                    assert_eq!(reason, "stored state belongs to user frank");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        assert!(!files.state_path("erin").exists());
        assert!(memory.is_empty());
        assert_eq!(memory.load("erin").unwrap(), UserTrackerState::new("erin"));
    }

    #[test]
    fn test_baseline_state_mismatch_is_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();

        let mut early = observed_state("ivan", 2);
        early.baseline = observed_state("ivan", 7).baseline;
        fs::write(
            store.state_path("ivan"),
            serde_json::to_string(&early).unwrap(),
        )
        .unwrap();

        let mut late = observed_state("jade", 9);
        late.baseline = None;
        late.cumulative_deviation = 0.0;
        fs::write(
            store.state_path("jade"),
            serde_json::to_string(&late).unwrap(),
        )
        .unwrap();

        for user in ["ivan", "jade"] {
            assert!(
                matches!(
                    store.load(user),
                    Err(DeviationError::InvalidState { .. })
                ),
                "{user} should be rejected"
            );
        }
    }

    #[test]
    fn test_legacy_state_without_user_id_is_adopted() {
        let mut store = MemoryStateStore::new();
        store.insert_raw(
            "gina",
            r#"{"days_observed": 0, "history": [], "baseline": null, "cumulative_deviation": 0.0}"#,
        );
        assert_eq!(store.load("gina").unwrap().user_id, "gina");
    }

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("user_01-a").is_ok());
        for bad in ["", "../etc", "a/b", "white space", "dot.json"] {
            assert!(validate_user_id(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStateStore::new();
        assert!(store.is_empty());

        let state = observed_state("hank", 7);
        store.save("hank", &state).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.load("hank").unwrap(), state);
    }
}
