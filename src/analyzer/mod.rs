//! Analysis pipeline driver.
//!
//! Walks the phase catalog in order, skipping phases a resumed session
//! already completed, and routes every model call through the rate
//! limiter. Each phase's output is cached through the state manager so
//! an interrupted run never re-pays for finished work.

use crate::config::Config;
use crate::git::{GitCollaborator, GitHistory};
use crate::llm::ConventionModel;
use crate::models::{
    DiscoveredFile, FileAnalysis, RuleCandidate, SynthesisOutcome, SynthesizedRule,
};
use crate::output;
use crate::phases::{AnalysisPhase, PHASE_ORDER};
use crate::rate_limit::{is_rate_limit_error, RateLimiter};
use crate::rules::{self, ClusterMeta};
use crate::scanner::{FileScanner, ScanConfig};
use crate::state::{ProgressUpdate, StateManager};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A merged cluster queued for model auditing.
struct AuditItem {
    key: String,
    merged: RuleCandidate,
    originals: Vec<RuleCandidate>,
}

/// Drives one analysis session over a repository.
pub struct AnalysisDriver {
    repo_path: PathBuf,
    config: Config,
    state: StateManager,
    limiter: RateLimiter,
    scanner: FileScanner,
    model: Arc<dyn ConventionModel>,
    /// Git history is an optional capability: absent when the directory
    /// has no usable repository.
    git: Option<GitCollaborator>,
    resuming: bool,
    discovered: Option<Vec<DiscoveredFile>>,
    analyses: Option<Vec<FileAnalysis>>,
    history: Option<GitHistory>,
    synthesis: Option<SynthesisOutcome>,
    written_rules: Vec<PathBuf>,
}

impl AnalysisDriver {
    pub fn new(
        repo_path: &Path,
        config: Config,
        model: Arc<dyn ConventionModel>,
    ) -> Result<Self> {
        let repo_path = repo_path
            .canonicalize()
            .with_context(|| format!("Cannot resolve directory {}", repo_path.display()))?;

        let state = StateManager::new(&repo_path).context("Failed to set up state directory")?;
        let limiter = RateLimiter::new(config.rate_limit.clone());
        let scanner = FileScanner::new(repo_path.clone(), ScanConfig::from(&config.scanner));

        let git = match GitCollaborator::open(&repo_path) {
            Ok(git) => Some(git),
            Err(e) => {
                info!("Git history unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            repo_path,
            config,
            state,
            limiter,
            scanner,
            model,
            git,
            resuming: false,
            discovered: None,
            analyses: None,
            history: None,
            synthesis: None,
            written_rules: Vec::new(),
        })
    }

    /// The state manager bound to this driver's repository.
    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    /// Run the pipeline to completion. With `resume` set, the recorded
    /// session is reloaded and already-completed phases are skipped; a
    /// failed reload falls back to a fresh session. Returns the paths
    /// of the written rule files.
    pub async fn run(&mut self, resume: bool) -> Result<Vec<PathBuf>> {
        self.resuming = resume;

        if resume {
            match self.state.resume_from_existing_state().await {
                Ok(state) => {
                    info!(
                        "Resuming session {} from phase {}",
                        state.session_id, state.current_phase
                    );
                }
                Err(e) => {
                    warn!("Could not resume ({}); starting fresh", e);
                    self.state.cleanup_failed_session().await;
                    self.state
                        .initialize_new_session(self.session_options())
                        .await?;
                    self.resuming = false;
                }
            }
        } else {
            self.state
                .initialize_new_session(self.session_options())
                .await?;
        }

        for phase in PHASE_ORDER {
            let already_done = self
                .state
                .get_current_state()
                .await
                .map(|s| s.is_completed(phase))
                .unwrap_or(false);
            if self.resuming && already_done {
                info!("Skipping completed phase: {}", phase.describe());
                continue;
            }

            self.run_phase(phase).await?;
        }

        self.state.cleanup_completed_session().await;
        Ok(self.written_rules.clone())
    }

    /// Execute one phase with state bookkeeping: start, do the work,
    /// then complete with cache data or fail with the error.
    async fn run_phase(&mut self, phase: AnalysisPhase) -> Result<()> {
        info!("Phase: {}", phase.describe());
        self.state.start_phase(phase).await?;

        let outcome = match phase {
            AnalysisPhase::Setup => self.run_setup().await,
            AnalysisPhase::StructureAnalysis => self.run_structure_analysis(),
            AnalysisPhase::FileDiscovery => self.run_file_discovery(),
            AnalysisPhase::FileAnalysis => self.run_file_analysis().await,
            AnalysisPhase::GitAnalysis => self.run_git_analysis(),
            AnalysisPhase::RuleSynthesis => self.run_rule_synthesis().await,
            AnalysisPhase::SaveComplete => self.run_save_complete().await,
        };

        match outcome {
            Ok(cache_data) => {
                self.state.complete_phase(phase, cache_data.as_ref()).await?;
                Ok(())
            }
            Err(e) => {
                self.state.fail_phase(phase, &e.to_string()).await?;
                Err(e).with_context(|| format!("Phase failed: {}", phase.describe()))
            }
        }
    }

    async fn run_setup(&mut self) -> Result<Option<Value>> {
        self.model
            .check_availability()
            .await
            .context("Model availability check failed")?;
        Ok(None)
    }

    fn run_structure_analysis(&mut self) -> Result<Option<Value>> {
        let files = self.scanner.discover()?;
        let structure = self.scanner.structure(&files);
        info!(
            "Repository structure: {} files across {} directories",
            structure.total_files,
            structure.directories.len()
        );
        Ok(Some(serde_json::to_value(structure)?))
    }

    fn run_file_discovery(&mut self) -> Result<Option<Value>> {
        let files = self.scanner.discover()?;
        info!("Discovered {} analyzable files", files.len());
        let cache = serde_json::to_value(&files)?;
        self.discovered = Some(files);
        Ok(Some(cache))
    }

    async fn run_file_analysis(&mut self) -> Result<Option<Value>> {
        let analyses = self.analyze_all_files().await?;
        let cache = serde_json::to_value(&analyses)?;
        self.analyses = Some(analyses);
        Ok(Some(cache))
    }

    fn run_git_analysis(&mut self) -> Result<Option<Value>> {
        // Availability over fidelity: without usable history the phase
        // completes with an empty map and synthesis weights everything
        // equally.
        let history = match &self.git {
            Some(git) => match git.collect_history() {
                Ok(history) => {
                    info!(
                        "Git history: {} files with modification counts",
                        history.modification_counts.len()
                    );
                    history
                }
                Err(e) => {
                    warn!("Failed to read git history: {}", e);
                    GitHistory::default()
                }
            },
            None => GitHistory::default(),
        };

        let cache = serde_json::to_value(&history)?;
        self.history = Some(history);
        Ok(Some(cache))
    }

    async fn run_rule_synthesis(&mut self) -> Result<Option<Value>> {
        let outcome = self.synthesize().await?;
        info!(
            "Synthesized {} rules from {} clusters (threshold {:.1})",
            outcome.rules.len(),
            outcome.candidate_clusters,
            outcome.score_threshold
        );
        let cache = serde_json::to_value(&outcome)?;
        self.synthesis = Some(outcome);
        Ok(Some(cache))
    }

    async fn run_save_complete(&mut self) -> Result<Option<Value>> {
        let outcome = self.synthesis_outcome().await?;
        let rules_dir = self.repo_path.join(&self.config.output.rules_dir);
        self.written_rules = output::write_rules(&outcome.rules, &rules_dir)?;
        Ok(None)
    }

    /// The per-file analysis loop: every model call is rate-limited, a
    /// rate-limited failure earns one retry after the limiter's current
    /// delay, and any other per-file failure is recorded and skipped.
    /// Only a phase that produces nothing at all fails.
    async fn analyze_all_files(&mut self) -> Result<Vec<FileAnalysis>> {
        let files = self.discovered_files()?;
        let total = files.len() as u64;
        self.state
            .update_progress(
                AnalysisPhase::FileAnalysis,
                ProgressUpdate {
                    total: Some(total),
                    ..Default::default()
                },
            )
            .await?;

        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut analyses = Vec::new();
        let mut completed: u64 = 0;
        let mut failed: u64 = 0;

        for file in &files {
            bar.set_message(file.path.clone());

            match self.analyze_one_file(file).await {
                Ok(analysis) => {
                    debug!(
                        "{}: {} rule candidates",
                        analysis.file,
                        analysis.rules.len()
                    );
                    completed += 1;
                    analyses.push(analysis);
                }
                Err(e) => {
                    warn!("Failed to analyze {}: {}", file.path, e);
                    failed += 1;
                }
            }

            self.state
                .update_progress(
                    AnalysisPhase::FileAnalysis,
                    ProgressUpdate {
                        completed: Some(completed),
                        failed: Some(failed),
                        current_item: Some(file.path.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            bar.inc(1);
        }

        bar.finish_and_clear();

        if analyses.is_empty() && !files.is_empty() {
            anyhow::bail!("No files could be analyzed ({} failures)", failed);
        }

        Ok(analyses)
    }

    async fn analyze_one_file(&mut self, file: &DiscoveredFile) -> Result<FileAnalysis> {
        let record = self.scanner.read_record(file)?;
        let model = Arc::clone(&self.model);

        let result = self.limiter.execute(|| model.extract_rules(&record)).await;
        match result {
            Ok(analysis) => Ok(analysis),
            Err(e) if is_rate_limit_error(&e.to_string()) => {
                let delay = self.limiter.current_delay();
                warn!(
                    "Rate limited on {}; retrying once in {:.1}s",
                    file.path,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                self.limiter.execute(|| model.extract_rules(&record)).await
            }
            Err(e) => Err(e),
        }
    }

    /// Cluster, score, and audit the extracted candidates.
    async fn synthesize(&mut self) -> Result<SynthesisOutcome> {
        let analyses = self.file_analyses().await?;
        let history = self.git_history();

        let candidates = rules::convert_to_candidates(&analyses, &history.modification_counts);
        let threshold = rules::score_threshold(&candidates);
        let clusters = rules::cluster_rules(candidates);
        let candidate_clusters = clusters.len();
        let selected = rules::select_clusters(clusters, threshold);

        // Merged multi-rule clusters go to the model for an audit pass,
        // batched through the limiter. An audit failure falls back to
        // the locally merged canonical.
        let mut audit_items = Vec::new();
        let mut prepared: Vec<(String, RuleCandidate, ClusterMeta, bool)> = Vec::new();

        for cluster in &selected {
            let Some(canonical) = rules::choose_canonical(cluster) else {
                continue;
            };
            let Some(meta) = cluster.meta.clone() else {
                continue;
            };
            let needs_audit = cluster.rules.len() > 1;
            if needs_audit {
                audit_items.push(AuditItem {
                    key: cluster.key.clone(),
                    merged: canonical.clone(),
                    originals: cluster.rules.iter().map(|r| r.rule.clone()).collect(),
                });
            }
            prepared.push((cluster.key.clone(), canonical, meta, needs_audit));
        }

        let model = Arc::clone(&self.model);
        let audit_results = self
            .limiter
            .execute_batch(audit_items, |item| {
                let model = Arc::clone(&model);
                async move {
                    model
                        .audit_cluster(&item.key, &item.merged, &item.originals)
                        .await
                        .map(|rule| (item.key, rule))
                }
            })
            .await;

        let mut audited: BTreeMap<String, RuleCandidate> = BTreeMap::new();
        for result in audit_results {
            match result {
                Ok((key, rule)) => {
                    audited.insert(key, rule);
                }
                Err(e) => warn!("Cluster audit failed, keeping merged rule: {}", e),
            }
        }

        let rules = prepared
            .into_iter()
            .map(|(key, canonical, meta, needs_audit)| {
                let rule = if needs_audit {
                    audited.get(&key).cloned().unwrap_or(canonical)
                } else {
                    canonical
                };
                SynthesizedRule {
                    slug: rule.slug,
                    description: rule.description,
                    scope_glob: rule.scope_glob,
                    bullets: rule.bullets,
                    score: meta.score,
                    support_files: meta.support_files,
                }
            })
            .collect();

        Ok(SynthesisOutcome {
            rules,
            candidate_clusters,
            score_threshold: threshold,
        })
    }

    /// Discovery output: in-memory, then cache, then a fresh scan.
    fn discovered_files(&mut self) -> Result<Vec<DiscoveredFile>> {
        if let Some(files) = &self.discovered {
            return Ok(files.clone());
        }

        if let Some(value) = self.state.load_cache_data(AnalysisPhase::FileDiscovery) {
            if let Ok(files) = serde_json::from_value::<Vec<DiscoveredFile>>(value) {
                self.discovered = Some(files.clone());
                return Ok(files);
            }
            warn!("Discarding unreadable file-discovery cache");
        }

        let files = self.scanner.discover()?;
        self.discovered = Some(files.clone());
        Ok(files)
    }

    /// File analyses: in-memory, then cache, then recompute. The
    /// recompute path re-pays model calls; it only triggers when a
    /// cache vanished or failed to parse after detection approved it.
    async fn file_analyses(&mut self) -> Result<Vec<FileAnalysis>> {
        if let Some(analyses) = &self.analyses {
            return Ok(analyses.clone());
        }

        if let Some(value) = self.state.load_cache_data(AnalysisPhase::FileAnalysis) {
            if let Ok(analyses) = serde_json::from_value::<Vec<FileAnalysis>>(value) {
                self.analyses = Some(analyses.clone());
                return Ok(analyses);
            }
            warn!("Discarding unreadable file-analysis cache");
        }

        let analyses = self.analyze_all_files().await?;
        self.analyses = Some(analyses.clone());
        Ok(analyses)
    }

    /// Git history: in-memory, then cache, then the collaborator, then
    /// empty.
    fn git_history(&mut self) -> GitHistory {
        if let Some(history) = &self.history {
            return history.clone();
        }

        if let Some(value) = self.state.load_cache_data(AnalysisPhase::GitAnalysis) {
            if let Ok(history) = serde_json::from_value::<GitHistory>(value) {
                self.history = Some(history.clone());
                return history;
            }
            warn!("Discarding unreadable git-history cache");
        }

        let history = self
            .git
            .as_ref()
            .and_then(|git| git.collect_history().ok())
            .unwrap_or_default();
        self.history = Some(history.clone());
        history
    }

    /// Synthesis outcome: in-memory, then cache, then recompute.
    async fn synthesis_outcome(&mut self) -> Result<SynthesisOutcome> {
        if let Some(outcome) = &self.synthesis {
            return Ok(outcome.clone());
        }

        if let Some(value) = self.state.load_cache_data(AnalysisPhase::RuleSynthesis) {
            if let Ok(outcome) = serde_json::from_value::<SynthesisOutcome>(value) {
                self.synthesis = Some(outcome.clone());
                return Ok(outcome);
            }
            warn!("Discarding unreadable synthesis cache");
        }

        let outcome = self.synthesize().await?;
        self.synthesis = Some(outcome.clone());
        Ok(outcome)
    }

    fn session_options(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (
                "model".to_string(),
                Value::from(self.config.model.name.clone()),
            ),
            (
                "ollama_url".to_string(),
                Value::from(self.config.model.ollama_url.clone()),
            ),
            (
                "max_files".to_string(),
                Value::from(self.config.scanner.max_files as u64),
            ),
            (
                "requests_per_minute".to_string(),
                Value::from(self.config.rate_limit.requests_per_minute),
            ),
        ])
    }
}
