//! Analysis pipeline phases and session state definitions.
//!
//! The pipeline is a fixed, ordered sequence of phases. Each phase owns
//! at most one cache artifact on disk; a subset of phases can be resumed
//! after an interruption, provided the cache files of every earlier
//! phase are still present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One stage of the analysis pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    /// Model reachability check and repository setup.
    Setup,
    /// Repository structure analysis.
    StructureAnalysis,
    /// Discovery of analyzable source files.
    FileDiscovery,
    /// Per-file rule extraction through the LLM.
    FileAnalysis,
    /// Git history and file importance analysis.
    GitAnalysis,
    /// Rule clustering, scoring, and synthesis.
    RuleSynthesis,
    /// Writing rule files and cleanup.
    SaveComplete,
}

/// All phases in pipeline order.
pub const PHASE_ORDER: [AnalysisPhase; 7] = [
    AnalysisPhase::Setup,
    AnalysisPhase::StructureAnalysis,
    AnalysisPhase::FileDiscovery,
    AnalysisPhase::FileAnalysis,
    AnalysisPhase::GitAnalysis,
    AnalysisPhase::RuleSynthesis,
    AnalysisPhase::SaveComplete,
];

impl AnalysisPhase {
    /// The stable string identifier used in snapshots and cache metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisPhase::Setup => "setup",
            AnalysisPhase::StructureAnalysis => "structure_analysis",
            AnalysisPhase::FileDiscovery => "file_discovery",
            AnalysisPhase::FileAnalysis => "file_analysis",
            AnalysisPhase::GitAnalysis => "git_analysis",
            AnalysisPhase::RuleSynthesis => "rule_synthesis",
            AnalysisPhase::SaveComplete => "save_complete",
        }
    }

    /// Human-readable description of what the phase does.
    pub fn describe(&self) -> &'static str {
        match self {
            AnalysisPhase::Setup => "Model reachability check and repository setup",
            AnalysisPhase::StructureAnalysis => "Repository structure analysis",
            AnalysisPhase::FileDiscovery => "File discovery and filtering",
            AnalysisPhase::FileAnalysis => "Individual file analysis",
            AnalysisPhase::GitAnalysis => "Git history and file importance analysis",
            AnalysisPhase::RuleSynthesis => "Rule generation and clustering",
            AnalysisPhase::SaveComplete => "Saving results and cleanup",
        }
    }

    /// The cache artifact this phase writes, if it has one.
    pub fn cache_file(&self) -> Option<&'static str> {
        match self {
            AnalysisPhase::StructureAnalysis => Some("structure.json"),
            AnalysisPhase::FileDiscovery => Some("file_discovery.json"),
            AnalysisPhase::FileAnalysis => Some("files.json"),
            AnalysisPhase::GitAnalysis => Some("git_stats.json"),
            AnalysisPhase::RuleSynthesis => Some("synthesis.json"),
            AnalysisPhase::Setup | AnalysisPhase::SaveComplete => None,
        }
    }

    /// The next phase in the pipeline, or `None` at the end.
    pub fn next(&self) -> Option<AnalysisPhase> {
        let index = PHASE_ORDER.iter().position(|p| p == self)?;
        PHASE_ORDER.get(index + 1).copied()
    }

    /// The previous phase in the pipeline, or `None` at the start.
    pub fn previous(&self) -> Option<AnalysisPhase> {
        let index = PHASE_ORDER.iter().position(|p| p == self)?;
        index.checked_sub(1).map(|i| PHASE_ORDER[i])
    }

    /// Whether an interrupted run can be resumed from this phase.
    ///
    /// Earlier phases are cheap enough that an interruption before file
    /// analysis simply restarts the whole run.
    pub fn can_resume_from(&self) -> bool {
        matches!(
            self,
            AnalysisPhase::FileAnalysis
                | AnalysisPhase::GitAnalysis
                | AnalysisPhase::RuleSynthesis
                | AnalysisPhase::SaveComplete
        )
    }

    /// Cache files of every phase strictly before this one, in pipeline
    /// order. All of them must exist on disk for a resume to be viable.
    pub fn required_cache_files(&self) -> Vec<&'static str> {
        let index = PHASE_ORDER
            .iter()
            .position(|p| p == self)
            .unwrap_or(PHASE_ORDER.len());
        PHASE_ORDER[..index]
            .iter()
            .filter_map(|p| p.cache_file())
            .collect()
    }
}

impl fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single phase within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// Progress counters scoped to one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Per-phase state within a session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: PhaseStatus,
    pub cache_file: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<PhaseProgress>,
}

impl PhaseState {
    /// A fresh pending state for the given phase, cache filename
    /// prefilled from the catalog.
    pub fn pending(phase: AnalysisPhase) -> Self {
        Self {
            status: PhaseStatus::Pending,
            cache_file: phase.cache_file().map(String::from),
            metadata: BTreeMap::new(),
            started_at: None,
            completed_at: None,
            progress: None,
        }
    }
}

/// The complete state of one analysis session.
///
/// `phases` always holds an entry for every phase in [`PHASE_ORDER`];
/// `completed_phases` is append-only and free of duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub directory: String,
    pub current_phase: AnalysisPhase,
    pub completed_phases: Vec<AnalysisPhase>,
    pub phases: BTreeMap<AnalysisPhase, PhaseState>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub analysis_options: BTreeMap<String, Value>,
}

impl AnalysisState {
    /// Build a fresh session with every phase pending.
    pub fn new(
        session_id: String,
        directory: String,
        analysis_options: BTreeMap<String, Value>,
    ) -> Self {
        let phases = PHASE_ORDER
            .iter()
            .map(|&phase| (phase, PhaseState::pending(phase)))
            .collect();

        Self {
            session_id,
            started_at: Utc::now(),
            directory,
            current_phase: AnalysisPhase::Setup,
            completed_phases: Vec::new(),
            phases,
            total_files: 0,
            analysis_options,
        }
    }

    /// Whether the given phase has already been completed this session.
    pub fn is_completed(&self, phase: AnalysisPhase) -> bool {
        self.completed_phases.contains(&phase)
    }
}
