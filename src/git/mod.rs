//! Git history collaborator.
//!
//! Computes per-file modification counts and recency-blended importance
//! weights from the repository's commit history. The pipeline holds
//! this as an optional capability: repositories without git history get
//! an empty map instead of an error.

use chrono::{Duration, Utc};
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on commits walked, so giant histories stay cheap.
const REVWALK_LIMIT: usize = 5000;
/// Window considered "recent" for the recency blend.
const RECENT_DAYS: i64 = 90;
/// Weight of recent activity in the combined importance score.
const RECENCY_WEIGHT: f64 = 0.3;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

/// Per-file history statistics for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitHistory {
    /// Times each file appeared in a commit, over the walked history.
    pub modification_counts: BTreeMap<String, u64>,
    /// Same count restricted to the recent window.
    pub recent_counts: BTreeMap<String, u64>,
    /// Blended importance score per file, normalized to `[0, 1]`.
    pub importance: BTreeMap<String, f64>,
}

/// Handle to a validated git repository.
#[derive(Debug)]
pub struct GitCollaborator {
    repo_path: PathBuf,
}

impl GitCollaborator {
    /// Open the repository at `repo_path`, failing if it is not one.
    pub fn open(repo_path: &Path) -> Result<Self, GitError> {
        Repository::open(repo_path)
            .map_err(|_| GitError::NotARepository(repo_path.to_path_buf()))?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    /// Walk the history (bounded by [`REVWALK_LIMIT`]) and produce the
    /// per-file statistics. A repository with no commits yet yields an
    /// empty history.
    pub fn collect_history(&self) -> Result<GitHistory, GitError> {
        let repo = Repository::open(&self.repo_path)
            .map_err(|_| GitError::NotARepository(self.repo_path.clone()))?;

        let mut revwalk = repo.revwalk()?;
        if let Err(e) = revwalk.push_head() {
            debug!("No walkable HEAD ({}); treating history as empty", e);
            return Ok(GitHistory::default());
        }

        let recent_cutoff = (Utc::now() - Duration::days(RECENT_DAYS)).timestamp();

        let mut modification_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut recent_counts: BTreeMap<String, u64> = BTreeMap::new();

        for (walked, oid) in revwalk.enumerate() {
            if walked >= REVWALK_LIMIT {
                debug!("Revwalk limit of {} commits reached", REVWALK_LIMIT);
                break;
            }

            let oid = match oid {
                Ok(oid) => oid,
                Err(e) => {
                    warn!("Skipping unreadable commit: {}", e);
                    continue;
                }
            };
            let commit = repo.find_commit(oid)?;
            let tree = commit.tree()?;
            // Diff against the first parent; the root commit diffs
            // against the empty tree and counts every file it added.
            let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
            let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

            let is_recent = commit.time().seconds() >= recent_cutoff;

            for delta in diff.deltas() {
                let path = delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path());
                if let Some(path) = path {
                    let key = path.to_string_lossy().to_string();
                    *modification_counts.entry(key.clone()).or_default() += 1;
                    if is_recent {
                        *recent_counts.entry(key).or_default() += 1;
                    }
                }
            }
        }

        let importance = importance_weights(&modification_counts, &recent_counts);

        Ok(GitHistory {
            modification_counts,
            recent_counts,
            importance,
        })
    }
}

/// Blend normalized total modification counts with normalized recent
/// activity: `(1 - w) * total + w * recent` with `w = RECENCY_WEIGHT`.
fn importance_weights(
    total_counts: &BTreeMap<String, u64>,
    recent_counts: &BTreeMap<String, u64>,
) -> BTreeMap<String, f64> {
    if total_counts.is_empty() {
        return BTreeMap::new();
    }

    let max_total = total_counts.values().copied().max().unwrap_or(1).max(1) as f64;
    let max_recent = recent_counts.values().copied().max().unwrap_or(1).max(1) as f64;

    total_counts
        .iter()
        .map(|(path, &count)| {
            let total_score = count as f64 / max_total;
            let recent_score =
                recent_counts.get(path).copied().unwrap_or(0) as f64 / max_recent;
            let combined = (1.0 - RECENCY_WEIGHT) * total_score + RECENCY_WEIGHT * recent_score;
            (path.clone(), combined)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn commit_file(repo: &Repository, root: &Path, rel: &str, content: &str, message: &str) {
        std::fs::create_dir_all(root.join(rel).parent().unwrap()).unwrap();
        std::fs::write(root.join(rel), content).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();

        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .and_then(|oid| repo.find_commit(oid).ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn test_open_rejects_plain_directory() {
        let dir = TempDir::new().unwrap();
        let err = GitCollaborator::open(dir.path()).unwrap_err();
        assert!(matches!(err, GitError::NotARepository(_)));
    }

    #[test]
    fn test_empty_repository_yields_empty_history() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();

        let collaborator = GitCollaborator::open(dir.path()).unwrap();
        let history = collaborator.collect_history().unwrap();
        assert!(history.modification_counts.is_empty());
        assert!(history.importance.is_empty());
    }

    #[test]
    fn test_modification_counts_follow_commits() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        commit_file(&repo, dir.path(), "src/hot.rs", "fn v1() {}", "add hot");
        commit_file(&repo, dir.path(), "src/hot.rs", "fn v2() {}", "touch hot");
        commit_file(&repo, dir.path(), "src/cold.rs", "fn cold() {}", "add cold");

        let history = GitCollaborator::open(dir.path())
            .unwrap()
            .collect_history()
            .unwrap();

        assert_eq!(history.modification_counts.get("src/hot.rs"), Some(&2));
        assert_eq!(history.modification_counts.get("src/cold.rs"), Some(&1));
    }

    #[test]
    fn test_importance_is_normalized_and_favors_hot_files() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        commit_file(&repo, dir.path(), "hot.rs", "fn a() {}", "one");
        commit_file(&repo, dir.path(), "hot.rs", "fn b() {}", "two");
        commit_file(&repo, dir.path(), "cold.rs", "fn c() {}", "three");

        let history = GitCollaborator::open(dir.path())
            .unwrap()
            .collect_history()
            .unwrap();

        let hot = history.importance["hot.rs"];
        let cold = history.importance["cold.rs"];
        assert!(hot > cold);
        assert!(history.importance.values().all(|w| (0.0..=1.0).contains(w)));
        // Everything just committed is also recent, so the hottest file
        // scores the full blend.
        assert!((hot - 1.0).abs() < 1e-9);
    }
}
