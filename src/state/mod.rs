//! Analysis session state management.
//!
//! Owns the on-disk representation of one analysis session: a JSON
//! snapshot of the full [`AnalysisState`] plus a cache directory with
//! one artifact per completed phase. Every snapshot write goes through
//! a temp-file-then-rename sequence so a reader never observes a torn
//! file, even if the process dies mid-write.

use crate::phases::{AnalysisPhase, AnalysisState, PhaseProgress, PhaseStatus, PHASE_ORDER};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Directory created beneath the analyzed repository.
const STATE_DIR_NAME: &str = ".ruleforge";
/// Snapshot filename within the state directory.
const PROGRESS_FILE_NAME: &str = "progress.json";
/// Cache subdirectory within the state directory.
const CACHE_DIR_NAME: &str = "cache";

/// Snapshot writes during tight per-item loops are throttled: a save is
/// forced when `completed` reaches a multiple of this, or after
/// `SAVE_AFTER_SECS` since the phase started. A provided `total` always
/// persists, since totals are set once per phase and resume descriptors
/// depend on them. A crash between throttled saves loses at most a few
/// items' worth of counters, never completed-phase caches.
const SAVE_EVERY_COMPLETED: u64 = 10;
const SAVE_AFTER_SECS: i64 = 30;

/// Errors raised by the state manager.
#[derive(Debug, Error)]
pub enum StateError {
    /// A mutating operation was called with no active session.
    #[error("no active analysis session")]
    NoActiveSession,

    /// Committing to a resume failed: the snapshot is missing or
    /// unparseable at the point the caller explicitly asked for it.
    #[error("failed to resume analysis session: {reason}")]
    Resume { reason: String },

    /// The snapshot file exists but does not parse as a valid session.
    #[error("invalid state snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    /// Writing the snapshot or a cache artifact failed.
    #[error("failed to persist analysis state: {source}")]
    Persist {
        #[source]
        source: std::io::Error,
    },
}

/// Descriptor for an incomplete session found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub current_phase: AnalysisPhase,
    pub phase_description: String,
    pub completed_phases: Vec<AnalysisPhase>,
    pub total_files: u64,
    /// True iff every prerequisite cache file is present.
    pub can_resume: bool,
    pub missing_cache_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ResumeProgress>,
}

/// Progress counters carried in a resume descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeProgress {
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

/// Partial progress update; unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub completed: Option<u64>,
    pub failed: Option<u64>,
    pub total: Option<u64>,
    pub current_item: Option<String>,
}

/// Manages session persistence and resume for one repository directory.
pub struct StateManager {
    directory: PathBuf,
    progress_file: PathBuf,
    cache_dir: PathBuf,
    state: Mutex<Option<AnalysisState>>,
}

impl StateManager {
    /// Bind a state manager to a repository directory, creating the
    /// state and cache directories if they are absent.
    pub fn new(directory: &Path) -> Result<Self, StateError> {
        let directory = directory
            .canonicalize()
            .unwrap_or_else(|_| directory.to_path_buf());
        let state_dir = directory.join(STATE_DIR_NAME);
        let cache_dir = state_dir.join(CACHE_DIR_NAME);

        std::fs::create_dir_all(&cache_dir).map_err(|source| StateError::Persist { source })?;

        Ok(Self {
            progress_file: state_dir.join(PROGRESS_FILE_NAME),
            cache_dir,
            directory,
            state: Mutex::new(None),
        })
    }

    /// Start a brand-new session, discarding any prior in-memory state.
    /// All phases begin pending and the snapshot is persisted at once.
    pub async fn initialize_new_session(
        &self,
        analysis_options: BTreeMap<String, Value>,
    ) -> Result<String, StateError> {
        let mut guard = self.state.lock().await;

        let session_id = Uuid::new_v4().to_string();
        let state = AnalysisState::new(
            session_id.clone(),
            self.directory.display().to_string(),
            analysis_options,
        );

        self.persist(&state)?;
        *guard = Some(state);

        info!("Initialized new analysis session: {}", session_id);
        Ok(session_id)
    }

    /// Check whether an incomplete session is discoverable on disk.
    ///
    /// Advisory and non-throwing: a missing or unparseable snapshot, a
    /// non-resumable phase, or a phase that is not in progress all
    /// yield `None`.
    pub fn detect_incomplete_analysis(&self) -> Option<ResumeInfo> {
        if !self.progress_file.exists() {
            return None;
        }

        let state = match self.parse_snapshot() {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to parse existing progress file: {}", e);
                return None;
            }
        };

        let phase_state = state.phases.get(&state.current_phase)?;
        if !matches!(
            phase_state.status,
            PhaseStatus::InProgress | PhaseStatus::Failed
        ) {
            return None;
        }
        if !state.current_phase.can_resume_from() {
            return None;
        }

        let missing_cache_files: Vec<String> = state
            .current_phase
            .required_cache_files()
            .into_iter()
            .filter(|name| !self.cache_dir.join(name).exists())
            .map(String::from)
            .collect();

        Some(ResumeInfo {
            session_id: state.session_id.clone(),
            started_at: state.started_at,
            current_phase: state.current_phase,
            phase_description: state.current_phase.describe().to_string(),
            completed_phases: state.completed_phases.clone(),
            total_files: state.total_files,
            can_resume: missing_cache_files.is_empty(),
            missing_cache_files,
            progress: phase_state.progress.as_ref().map(|p| ResumeProgress {
                completed: p.completed,
                failed: p.failed,
                total: p.total,
                current_item: p.current_item.clone(),
            }),
        })
    }

    /// Commit to resuming: re-parse the snapshot and replace the
    /// in-memory state. Unlike detection, a failure here surfaces as a
    /// [`StateError::Resume`], since the caller explicitly asked for it.
    pub async fn resume_from_existing_state(&self) -> Result<AnalysisState, StateError> {
        let mut guard = self.state.lock().await;

        let state = self.parse_snapshot().map_err(|e| StateError::Resume {
            reason: e.to_string(),
        })?;

        info!("Resumed analysis session: {}", state.session_id);
        *guard = Some(state.clone());
        Ok(state)
    }

    /// Mark a phase as started and make it the current phase.
    pub async fn start_phase(&self, phase: AnalysisPhase) -> Result<(), StateError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StateError::NoActiveSession)?;

        state.current_phase = phase;
        if let Some(phase_state) = state.phases.get_mut(&phase) {
            phase_state.status = PhaseStatus::InProgress;
            phase_state.started_at = Some(Utc::now());
        }

        self.persist(state)?;
        debug!("Started phase: {}", phase);
        Ok(())
    }

    /// Mark a phase completed, optionally writing its cache artifact.
    /// Appending to `completed_phases` is idempotent.
    pub async fn complete_phase(
        &self,
        phase: AnalysisPhase,
        cache_data: Option<&Value>,
    ) -> Result<(), StateError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StateError::NoActiveSession)?;

        if let Some(phase_state) = state.phases.get_mut(&phase) {
            phase_state.status = PhaseStatus::Completed;
            phase_state.completed_at = Some(Utc::now());
        }

        if !state.completed_phases.contains(&phase) {
            state.completed_phases.push(phase);
        }

        if let (Some(data), Some(cache_file)) = (cache_data, phase.cache_file()) {
            let cache_path = self.cache_dir.join(cache_file);
            let payload = serde_json::to_vec_pretty(data).map_err(|e| StateError::Persist {
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            std::fs::write(&cache_path, payload)
                .map_err(|source| StateError::Persist { source })?;
            debug!("Saved cache data for phase {} to {}", phase, cache_path.display());
        }

        self.persist(state)?;
        debug!("Completed phase: {}", phase);
        Ok(())
    }

    /// Mark a phase failed and attach the error to its progress record.
    pub async fn fail_phase(
        &self,
        phase: AnalysisPhase,
        error_message: &str,
    ) -> Result<(), StateError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StateError::NoActiveSession)?;

        if let Some(phase_state) = state.phases.get_mut(&phase) {
            phase_state.status = PhaseStatus::Failed;
            phase_state
                .progress
                .get_or_insert_with(PhaseProgress::default)
                .error_message = Some(error_message.to_string());
        }

        self.persist(state)?;
        error!("Failed phase {}: {}", phase, error_message);
        Ok(())
    }

    /// Apply a partial progress update to a phase.
    ///
    /// Only provided fields change. When the phase is
    /// [`AnalysisPhase::FileAnalysis`] and `total` is given, the
    /// session-level file count follows. Persistence is throttled (see
    /// [`SAVE_EVERY_COMPLETED`]); the update always lands in memory.
    pub async fn update_progress(
        &self,
        phase: AnalysisPhase,
        update: ProgressUpdate,
    ) -> Result<(), StateError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StateError::NoActiveSession)?;

        let mut should_save = false;

        if phase == AnalysisPhase::FileAnalysis {
            if let Some(total) = update.total {
                state.total_files = total;
            }
        }

        if let Some(phase_state) = state.phases.get_mut(&phase) {
            let progress = phase_state
                .progress
                .get_or_insert_with(PhaseProgress::default);

            if let Some(completed) = update.completed {
                progress.completed = completed;
                if completed % SAVE_EVERY_COMPLETED == 0 {
                    should_save = true;
                }
            }
            if let Some(failed) = update.failed {
                progress.failed = failed;
            }
            if let Some(total) = update.total {
                progress.total = total;
                should_save = true;
            }
            if let Some(current_item) = update.current_item {
                progress.current_item = Some(current_item);
            }

            if !should_save {
                if let Some(started_at) = phase_state.started_at {
                    if (Utc::now() - started_at).num_seconds() > SAVE_AFTER_SECS {
                        should_save = true;
                    }
                }
            }
        }

        if should_save {
            self.persist(state)?;
        }
        Ok(())
    }

    /// Load a phase's cached output, or `None` when the phase has no
    /// cache artifact, the file is absent, or it fails to parse. A
    /// corrupt cache is a miss, never an error: the caller recomputes.
    pub fn load_cache_data(&self, phase: AnalysisPhase) -> Option<Value> {
        let cache_file = phase.cache_file()?;
        let cache_path = self.cache_dir.join(cache_file);
        if !cache_path.exists() {
            return None;
        }

        let data = std::fs::read(&cache_path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to load cache data for {}: {}", phase, e);
                None
            }
        }
    }

    /// Delete the snapshot and every cache artifact after a successful
    /// run. Deletion errors are logged, never raised: cleanup must not
    /// block program exit.
    pub async fn cleanup_completed_session(&self) {
        let _guard = self.state.lock().await;
        self.remove_session_files();
        info!("Cleaned up analysis session files");
    }

    /// Identical effect to [`Self::cleanup_completed_session`]; called
    /// when the user declines to resume an incomplete session.
    pub async fn cleanup_failed_session(&self) {
        let _guard = self.state.lock().await;
        self.remove_session_files();
        info!("Cleaned up abandoned analysis session files");
    }

    /// The in-memory session state, if one is active.
    pub async fn get_current_state(&self) -> Option<AnalysisState> {
        self.state.lock().await.clone()
    }

    /// Absolute path of the repository this manager is bound to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn remove_session_files(&self) {
        if self.progress_file.exists() {
            if let Err(e) = std::fs::remove_file(&self.progress_file) {
                warn!("Failed to remove progress file: {}", e);
            }
        }

        if self.cache_dir.exists() {
            match std::fs::read_dir(&self.cache_dir) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        if entry.path().is_file() {
                            if let Err(e) = std::fs::remove_file(entry.path()) {
                                warn!("Failed to remove cache file: {}", e);
                            }
                        }
                    }
                }
                Err(e) => warn!("Failed to read cache directory: {}", e),
            }
            if let Err(e) = std::fs::remove_dir(&self.cache_dir) {
                warn!("Failed to remove cache directory: {}", e);
            }
        }
    }

    /// Write the full state as JSON: temp file in the same directory,
    /// then an atomic rename over the snapshot path. A crash mid-write
    /// leaves the previous snapshot untouched.
    fn persist(&self, state: &AnalysisState) -> Result<(), StateError> {
        let payload = serde_json::to_vec_pretty(state).map_err(|e| StateError::Persist {
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let temp_file = self.progress_file.with_extension("json.tmp");
        if let Err(source) = std::fs::write(&temp_file, payload) {
            return Err(StateError::Persist { source });
        }

        if let Err(source) = std::fs::rename(&temp_file, &self.progress_file) {
            let _ = std::fs::remove_file(&temp_file);
            return Err(StateError::Persist { source });
        }

        Ok(())
    }

    /// Read and validate the snapshot file.
    fn parse_snapshot(&self) -> Result<AnalysisState, StateError> {
        let data =
            std::fs::read(&self.progress_file).map_err(|e| StateError::InvalidSnapshot {
                reason: format!("cannot read snapshot: {}", e),
            })?;

        let state: AnalysisState =
            serde_json::from_slice(&data).map_err(|e| StateError::InvalidSnapshot {
                reason: e.to_string(),
            })?;

        for phase in PHASE_ORDER {
            if !state.phases.contains_key(&phase) {
                return Err(StateError::InvalidSnapshot {
                    reason: format!("snapshot missing phase entry: {}", phase),
                });
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, StateManager) {
        let dir = TempDir::new().unwrap();
        let manager = StateManager::new(dir.path()).unwrap();
        (dir, manager)
    }

    fn read_snapshot(dir: &TempDir) -> AnalysisState {
        let path = dir.path().join(".ruleforge").join("progress.json");
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    fn cache_path(dir: &TempDir, name: &str) -> PathBuf {
        dir.path().join(".ruleforge").join("cache").join(name)
    }

    #[tokio::test]
    async fn initialize_creates_snapshot_with_all_phases_pending() {
        let (dir, manager) = manager();
        let session_id = manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();

        let snapshot = read_snapshot(&dir);
        assert_eq!(snapshot.session_id, session_id);
        assert_eq!(snapshot.current_phase, AnalysisPhase::Setup);
        assert_eq!(snapshot.phases.len(), PHASE_ORDER.len());
        assert!(snapshot
            .phases
            .values()
            .all(|p| p.status == PhaseStatus::Pending));
    }

    #[tokio::test]
    async fn mutating_call_without_session_fails() {
        let (_dir, manager) = manager();
        let err = manager.start_phase(AnalysisPhase::Setup).await.unwrap_err();
        assert!(matches!(err, StateError::NoActiveSession));
    }

    #[tokio::test]
    async fn detect_returns_none_without_snapshot() {
        let (_dir, manager) = manager();
        assert!(manager.detect_incomplete_analysis().is_none());
    }

    #[tokio::test]
    async fn detect_swallows_parse_errors() {
        let (dir, manager) = manager();
        let path = dir.path().join(".ruleforge").join("progress.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(manager.detect_incomplete_analysis().is_none());
    }

    #[tokio::test]
    async fn detect_ignores_non_resumable_phase() {
        let (_dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager
            .start_phase(AnalysisPhase::StructureAnalysis)
            .await
            .unwrap();

        // In progress but before the resumable window: a restart is
        // required, so no descriptor is produced.
        assert!(manager.detect_incomplete_analysis().is_none());
    }

    #[tokio::test]
    async fn resume_errors_when_snapshot_missing_or_corrupt() {
        let (dir, manager) = manager();
        let err = manager.resume_from_existing_state().await.unwrap_err();
        assert!(matches!(err, StateError::Resume { .. }));

        let path = dir.path().join(".ruleforge").join("progress.json");
        std::fs::write(&path, b"garbage").unwrap();
        let err = manager.resume_from_existing_state().await.unwrap_err();
        assert!(matches!(err, StateError::Resume { .. }));
    }

    #[tokio::test]
    async fn complete_phase_is_idempotent() {
        let (_dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();

        manager.start_phase(AnalysisPhase::Setup).await.unwrap();
        manager
            .complete_phase(AnalysisPhase::Setup, None)
            .await
            .unwrap();
        manager
            .complete_phase(AnalysisPhase::Setup, None)
            .await
            .unwrap();

        let state = manager.get_current_state().await.unwrap();
        assert_eq!(state.completed_phases, vec![AnalysisPhase::Setup]);
    }

    #[tokio::test]
    async fn complete_phase_writes_cache_file() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();

        let data = serde_json::json!({"dirs": ["src"]});
        manager
            .complete_phase(AnalysisPhase::StructureAnalysis, Some(&data))
            .await
            .unwrap();

        let cached: Value =
            serde_json::from_slice(&std::fs::read(cache_path(&dir, "structure.json")).unwrap())
                .unwrap();
        assert_eq!(cached, data);
        assert_eq!(
            manager.load_cache_data(AnalysisPhase::StructureAnalysis),
            Some(data)
        );
    }

    #[tokio::test]
    async fn fail_phase_records_error_message() {
        let (_dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager
            .start_phase(AnalysisPhase::FileAnalysis)
            .await
            .unwrap();
        manager
            .fail_phase(AnalysisPhase::FileAnalysis, "model unreachable")
            .await
            .unwrap();

        let state = manager.get_current_state().await.unwrap();
        let phase_state = &state.phases[&AnalysisPhase::FileAnalysis];
        assert_eq!(phase_state.status, PhaseStatus::Failed);
        assert_eq!(
            phase_state.progress.as_ref().unwrap().error_message.as_deref(),
            Some("model unreachable")
        );
    }

    #[tokio::test]
    async fn progress_partial_update_leaves_other_fields_unchanged() {
        let (_dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager
            .start_phase(AnalysisPhase::FileAnalysis)
            .await
            .unwrap();

        manager
            .update_progress(
                AnalysisPhase::FileAnalysis,
                ProgressUpdate {
                    completed: Some(5),
                    failed: Some(0),
                    total: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        manager
            .update_progress(
                AnalysisPhase::FileAnalysis,
                ProgressUpdate {
                    completed: Some(10),
                    current_item: Some("x.py".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let state = manager.get_current_state().await.unwrap();
        let progress = state.phases[&AnalysisPhase::FileAnalysis]
            .progress
            .clone()
            .unwrap();
        assert_eq!(progress.completed, 10);
        assert_eq!(progress.failed, 0);
        assert_eq!(progress.total, 20);
        assert_eq!(progress.current_item.as_deref(), Some("x.py"));
    }

    #[tokio::test]
    async fn persistence_is_throttled_until_the_tenth_item() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager
            .start_phase(AnalysisPhase::FileAnalysis)
            .await
            .unwrap();

        for i in 1..=9u64 {
            manager
                .update_progress(
                    AnalysisPhase::FileAnalysis,
                    ProgressUpdate {
                        completed: Some(i),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        // The snapshot on disk still has no progress record.
        let snapshot = read_snapshot(&dir);
        assert!(snapshot.phases[&AnalysisPhase::FileAnalysis]
            .progress
            .is_none());

        manager
            .update_progress(
                AnalysisPhase::FileAnalysis,
                ProgressUpdate {
                    completed: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let snapshot = read_snapshot(&dir);
        let progress = snapshot.phases[&AnalysisPhase::FileAnalysis]
            .progress
            .clone()
            .unwrap();
        assert_eq!(progress.completed, 10);
    }

    #[tokio::test]
    async fn providing_total_persists_and_updates_session_file_count() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager
            .start_phase(AnalysisPhase::FileAnalysis)
            .await
            .unwrap();

        manager
            .update_progress(
                AnalysisPhase::FileAnalysis,
                ProgressUpdate {
                    total: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let snapshot = read_snapshot(&dir);
        assert_eq!(snapshot.total_files, 42);
        assert_eq!(
            snapshot.phases[&AnalysisPhase::FileAnalysis]
                .progress
                .as_ref()
                .unwrap()
                .total,
            42
        );
    }

    #[tokio::test]
    async fn corrupt_cache_is_a_miss() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();

        std::fs::write(cache_path(&dir, "files.json"), b"{ truncated").unwrap();
        assert!(manager.load_cache_data(AnalysisPhase::FileAnalysis).is_none());

        // Phases without a cache artifact are always a miss.
        assert!(manager.load_cache_data(AnalysisPhase::Setup).is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_snapshot_and_cache() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager
            .complete_phase(
                AnalysisPhase::StructureAnalysis,
                Some(&serde_json::json!({"dirs": []})),
            )
            .await
            .unwrap();

        manager.cleanup_completed_session().await;

        assert!(!dir.path().join(".ruleforge").join("progress.json").exists());
        assert!(!dir.path().join(".ruleforge").join("cache").exists());
    }

    #[tokio::test]
    async fn persist_leaves_no_temp_file_behind() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();
        manager.start_phase(AnalysisPhase::Setup).await.unwrap();

        let state_dir = dir.path().join(".ruleforge");
        let leftovers: Vec<_> = std::fs::read_dir(&state_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());

        // An orphaned temp file from a crashed writer never shadows the
        // real snapshot.
        std::fs::write(state_dir.join("progress.json.tmp"), b"partial").unwrap();
        assert!(manager.detect_incomplete_analysis().is_none());
        let snapshot = read_snapshot(&dir);
        assert_eq!(snapshot.current_phase, AnalysisPhase::Setup);
    }

    #[tokio::test]
    async fn resume_detection_reports_missing_cache_files() {
        let (dir, manager) = manager();
        manager
            .initialize_new_session(BTreeMap::new())
            .await
            .unwrap();

        for phase in [
            AnalysisPhase::Setup,
            AnalysisPhase::StructureAnalysis,
            AnalysisPhase::FileDiscovery,
        ] {
            manager.start_phase(phase).await.unwrap();
            manager
                .complete_phase(phase, Some(&serde_json::json!({})))
                .await
                .unwrap();
        }
        manager
            .start_phase(AnalysisPhase::FileAnalysis)
            .await
            .unwrap();

        let info = manager.detect_incomplete_analysis().unwrap();
        assert_eq!(info.current_phase, AnalysisPhase::FileAnalysis);
        assert!(info.can_resume);
        assert!(info.missing_cache_files.is_empty());

        std::fs::remove_file(cache_path(&dir, "structure.json")).unwrap();

        let info = manager.detect_incomplete_analysis().unwrap();
        assert!(!info.can_resume);
        assert_eq!(info.missing_cache_files, vec!["structure.json"]);
    }

    #[tokio::test]
    async fn interrupted_session_is_discoverable_and_resumable() {
        let dir = TempDir::new().unwrap();

        {
            let manager = StateManager::new(dir.path()).unwrap();
            manager
                .initialize_new_session(BTreeMap::new())
                .await
                .unwrap();

            for phase in [AnalysisPhase::Setup, AnalysisPhase::FileDiscovery] {
                manager.start_phase(phase).await.unwrap();
                manager.complete_phase(phase, None).await.unwrap();
            }
            manager
                .start_phase(AnalysisPhase::StructureAnalysis)
                .await
                .unwrap();
            manager
                .complete_phase(
                    AnalysisPhase::StructureAnalysis,
                    Some(&serde_json::json!({"dirs": ["src"]})),
                )
                .await
                .unwrap();
            // FileDiscovery's artifact is also needed downstream.
            std::fs::write(cache_path(&dir, "file_discovery.json"), b"[]").unwrap();

            manager
                .start_phase(AnalysisPhase::FileAnalysis)
                .await
                .unwrap();
            manager
                .update_progress(
                    AnalysisPhase::FileAnalysis,
                    ProgressUpdate {
                        total: Some(3),
                        completed: Some(1),
                        failed: Some(0),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        // A second process discovers the interrupted session.
        let manager = StateManager::new(dir.path()).unwrap();
        let info = manager.detect_incomplete_analysis().unwrap();
        assert_eq!(info.current_phase, AnalysisPhase::FileAnalysis);
        assert!(info.can_resume);
        let progress = info.progress.unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);

        let state = manager.resume_from_existing_state().await.unwrap();
        assert_eq!(state.completed_phases.len(), 3);
    }
}
