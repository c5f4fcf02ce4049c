//! Data models for the convention extractor.
//!
//! This module contains the core data structures shared across the
//! pipeline: discovered files, rule candidates extracted by the model,
//! per-file analyses, and synthesized rules ready for rendering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A source file selected for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    /// Path relative to the repository root.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// File extension (without dot).
    pub extension: String,
}

/// A file handed to the model: path, content, and extension.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// Path relative to the repository root.
    pub relative_path: String,
    /// Full textual content.
    pub content: String,
    /// File extension (without dot).
    pub extension: String,
}

/// One coding-convention rule candidate extracted from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCandidate {
    /// Kebab-case identifier, e.g. `prefer-early-return`.
    pub slug: String,
    /// One-sentence statement of the convention.
    pub description: String,
    /// Glob pattern for the files the rule applies to.
    pub scope_glob: String,
    /// Concrete guidance bullets.
    pub bullets: Vec<String>,
    /// 1-indexed line numbers supporting the rule.
    #[serde(default)]
    pub evidence_lines: Vec<u64>,
}

impl fmt::Display for RuleCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.slug, self.description)
    }
}

/// The model's structured output for one analyzed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Path relative to the repository root.
    pub file: String,
    /// Rule candidates extracted from this file, in model order.
    pub rules: Vec<RuleCandidate>,
}

/// Repository shape recorded by the structure phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStructure {
    /// Analyzable-file count per directory (repository-relative).
    pub directories: BTreeMap<String, usize>,
    /// Extension histogram across analyzable files.
    pub extensions: BTreeMap<String, usize>,
    /// Total analyzable files.
    pub total_files: usize,
}

/// A clustered, scored rule ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedRule {
    pub slug: String,
    pub description: String,
    pub scope_glob: String,
    pub bullets: Vec<String>,
    /// Cluster score in `[0, 10]`.
    pub score: f64,
    /// Number of distinct files supporting the rule.
    pub support_files: usize,
}

impl fmt::Display for SynthesizedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score {:.1}, {} files)",
            self.slug, self.score, self.support_files
        )
    }
}

/// Output of the synthesis phase, cached as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutcome {
    pub rules: Vec<SynthesizedRule>,
    /// Clusters considered before the score threshold was applied.
    pub candidate_clusters: usize,
    /// The adaptive score threshold chosen for this repository.
    pub score_threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> RuleCandidate {
        RuleCandidate {
            slug: "prefer-early-return".to_string(),
            description: "Return early instead of nesting conditionals".to_string(),
            scope_glob: "**/*.rs".to_string(),
            bullets: vec!["Invert the condition and return".to_string()],
            evidence_lines: vec![12, 40],
        }
    }

    #[test]
    fn test_rule_candidate_display() {
        assert_eq!(
            candidate().to_string(),
            "prefer-early-return: Return early instead of nesting conditionals"
        );
    }

    #[test]
    fn test_file_analysis_round_trip() {
        let analysis = FileAnalysis {
            file: "src/lib.rs".to_string(),
            rules: vec![candidate()],
        };

        let json = serde_json::to_string(&analysis).unwrap();
        let parsed: FileAnalysis = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, analysis);
    }

    #[test]
    fn test_missing_evidence_lines_defaults_to_empty() {
        let json = r#"{"slug": "a", "description": "b", "scope_glob": "**/*", "bullets": []}"#;
        let parsed: RuleCandidate = serde_json::from_str(json).unwrap();
        assert!(parsed.evidence_lines.is_empty());
    }

    #[test]
    fn test_synthesized_rule_display() {
        let rule = SynthesizedRule {
            slug: "error-handling".to_string(),
            description: "Handle errors explicitly".to_string(),
            scope_glob: "**/*.rs".to_string(),
            bullets: vec![],
            score: 6.4,
            support_files: 3,
        };
        assert_eq!(rule.to_string(), "error-handling (score 6.4, 3 files)");
    }
}
