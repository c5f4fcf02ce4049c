//! Rule clustering, scoring, and canonical-variant selection.
//!
//! Candidates extracted per file are grouped by semantic keyword, each
//! cluster is scored from how many files support it and how heavily
//! those files are edited, and one merged canonical rule is chosen per
//! surviving cluster.

use crate::models::{FileAnalysis, RuleCandidate};
use std::collections::BTreeMap;

/// Cap on bullets carried by a merged rule.
const MAX_BULLETS: usize = 5;
/// Cap on bullet length, in characters.
const MAX_BULLET_CHARS: usize = 120;
/// Cluster scores saturate here.
const MAX_SCORE: f64 = 10.0;

/// Semantic keyword groups used as cluster keys. A rule whose slug or
/// description mentions any keyword lands in that group.
const KEYWORD_GROUPS: &[(&str, &[&str])] = &[
    ("error-handling", &["error", "exception", "panic", "result", "catch", "failure"]),
    ("naming-style", &["naming", "convention", "style", "case", "identifier"]),
    ("testing-patterns", &["test", "mock", "fixture", "assert", "coverage"]),
    ("configuration", &["config", "setting", "env", "environment", "default"]),
    ("file-operations", &["file", "path", "directory", "read", "write"]),
    ("logging", &["log", "logging", "tracing", "debug", "verbose"]),
    ("api-design", &["api", "endpoint", "interface", "signature", "contract"]),
    ("concurrency", &["async", "await", "thread", "lock", "concurrent"]),
    ("validation", &["validate", "check", "verify", "ensure", "sanitize"]),
    ("documentation", &["doc", "comment", "docstring", "readme"]),
    ("dependency-management", &["dependency", "import", "package", "module", "crate"]),
    ("git-workflow", &["git", "commit", "branch", "repository"]),
    ("data-modeling", &["struct", "class", "type", "schema", "model"]),
    ("serialization", &["serialize", "json", "yaml", "toml", "encode"]),
];

/// A rule candidate annotated with its source file and edit weight.
#[derive(Debug, Clone)]
pub struct CandidateRule {
    pub rule: RuleCandidate,
    pub file: String,
    pub edit_count: u64,
}

/// Aggregate statistics for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMeta {
    pub support_files: usize,
    pub total_edits: u64,
    pub score: f64,
}

/// A group of similar candidate rules.
#[derive(Debug, Clone)]
pub struct RuleCluster {
    pub key: String,
    pub rules: Vec<CandidateRule>,
    pub meta: Option<ClusterMeta>,
}

impl RuleCluster {
    fn new(key: String) -> Self {
        Self {
            key,
            rules: Vec::new(),
            meta: None,
        }
    }

    fn add_rule(&mut self, rule: CandidateRule) {
        self.rules.push(rule);
    }

    /// Score the cluster: `min(10, support_files * 2 + ln(1 + edits))`.
    fn calculate_meta(&mut self) {
        if self.rules.is_empty() {
            return;
        }

        let mut files: Vec<&str> = self.rules.iter().map(|r| r.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        let support_files = files.len();

        let total_edits: u64 = self.rules.iter().map(|r| r.edit_count).sum();
        let score = (support_files as f64 * 2.0 + (1.0 + total_edits as f64).ln()).min(MAX_SCORE);

        self.meta = Some(ClusterMeta {
            support_files,
            total_edits,
            score,
        });
    }

    pub fn score(&self) -> f64 {
        self.meta.as_ref().map(|m| m.score).unwrap_or(0.0)
    }
}

/// Flatten per-file analyses into candidates, attaching each file's
/// modification count from git history.
pub fn convert_to_candidates(
    analyses: &[FileAnalysis],
    edit_counts: &BTreeMap<String, u64>,
) -> Vec<CandidateRule> {
    let mut candidates = Vec::new();

    for analysis in analyses {
        let edit_count = edit_counts.get(&analysis.file).copied().unwrap_or(0);
        for rule in &analysis.rules {
            candidates.push(CandidateRule {
                rule: rule.clone(),
                file: analysis.file.clone(),
                edit_count,
            });
        }
    }

    candidates
}

/// Pick the cluster key for a rule: first matching keyword group, then
/// the first two slug segments, then the slug itself.
fn cluster_key(rule: &RuleCandidate) -> String {
    let text = format!("{} {}", rule.slug, rule.description).to_lowercase();

    for (group, keywords) in KEYWORD_GROUPS {
        if keywords.iter().any(|keyword| text.contains(keyword)) {
            return (*group).to_string();
        }
    }

    let parts: Vec<&str> = rule.slug.split('-').collect();
    if parts.len() >= 2 {
        return format!("{}-{}", parts[0], parts[1]);
    }

    rule.slug.clone()
}

/// Group candidates into clusters and compute each cluster's score.
pub fn cluster_rules(candidates: Vec<CandidateRule>) -> BTreeMap<String, RuleCluster> {
    let mut clusters: BTreeMap<String, RuleCluster> = BTreeMap::new();

    for candidate in candidates {
        let key = cluster_key(&candidate.rule);
        clusters
            .entry(key.clone())
            .or_insert_with(|| RuleCluster::new(key))
            .add_rule(candidate);
    }

    for cluster in clusters.values_mut() {
        cluster.calculate_meta();
    }

    clusters
}

/// Pick the score threshold from project maturity: young repositories
/// with little history keep more rules than mature ones.
pub fn score_threshold(candidates: &[CandidateRule]) -> f64 {
    if candidates.is_empty() {
        return 1.5;
    }

    let total_edits: u64 = candidates.iter().map(|c| c.edit_count).sum();
    let avg_edits = total_edits as f64 / candidates.len() as f64;

    let mut files: Vec<&str> = candidates.iter().map(|c| c.file.as_str()).collect();
    files.sort_unstable();
    files.dedup();

    if avg_edits <= 2.0 && files.len() <= 10 {
        1.5
    } else if avg_edits <= 5.0 {
        2.0
    } else {
        3.0
    }
}

/// Keep clusters at or above the threshold, highest score first.
pub fn select_clusters(
    clusters: BTreeMap<String, RuleCluster>,
    threshold: f64,
) -> Vec<RuleCluster> {
    let mut selected: Vec<RuleCluster> = clusters
        .into_values()
        .filter(|c| c.score() >= threshold)
        .collect();
    selected.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    selected
}

/// Choose and merge the canonical rule for a cluster.
///
/// The variant with the most bullets (ties broken by lowest mean
/// evidence line) is the base; bullets from every variant are merged,
/// deduplicated, and capped; the most common scope glob wins. Merged
/// multi-rule clusters take the cluster key as their slug and the most
/// descriptive variant's description.
pub fn choose_canonical(cluster: &RuleCluster) -> Option<RuleCandidate> {
    if cluster.rules.is_empty() {
        return None;
    }

    fn mean_line(rule: &RuleCandidate) -> f64 {
        if rule.evidence_lines.is_empty() {
            return 0.0;
        }
        rule.evidence_lines.iter().sum::<u64>() as f64 / rule.evidence_lines.len() as f64
    }

    let mut ordered: Vec<&CandidateRule> = cluster.rules.iter().collect();
    ordered.sort_by(|a, b| {
        b.rule
            .bullets
            .len()
            .cmp(&a.rule.bullets.len())
            .then_with(|| {
                mean_line(&a.rule)
                    .partial_cmp(&mean_line(&b.rule))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let mut canonical = ordered[0].rule.clone();
    let merged = cluster.rules.len() > 1;

    if merged {
        canonical.slug = cluster.key.clone();
        if let Some(most_descriptive) = cluster
            .rules
            .iter()
            .max_by_key(|r| r.rule.description.len())
        {
            canonical.description = most_descriptive.rule.description.clone();
        }
    }

    // Merge bullets in canonical-first order, deduplicated and capped.
    let mut bullets: Vec<String> = Vec::new();
    'outer: for candidate in &ordered {
        for bullet in &candidate.rule.bullets {
            let trimmed: String = bullet.chars().take(MAX_BULLET_CHARS).collect();
            let trimmed = trimmed.trim().to_string();
            if !trimmed.is_empty() && !bullets.contains(&trimmed) {
                bullets.push(trimmed);
                if bullets.len() >= MAX_BULLETS {
                    break 'outer;
                }
            }
        }
    }
    canonical.bullets = bullets;

    let mut glob_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for candidate in &cluster.rules {
        *glob_counts.entry(candidate.rule.scope_glob.as_str()).or_default() += 1;
    }
    canonical.scope_glob = glob_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(glob, _)| glob.to_string())
        .unwrap_or_else(|| "**/*".to_string());

    Some(canonical)
}

/// Convert free text to a kebab-case slug.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_dash = true;

    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }

    slug.trim_matches('-').to_string()
}
