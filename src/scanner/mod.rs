//! File scanner for discovering and filtering source files.
//!
//! Walks the repository, keeping files that match the configured
//! extension allowlist, are not excluded, fit the size cap, and look
//! like text. Discovery order is deterministic so progress counters
//! stay meaningful across a resume.

use crate::models::{DiscoveredFile, FileRecord, RepoStructure};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Bytes sniffed from the head of a file to decide text vs binary.
const BINARY_SNIFF_BYTES: usize = 512;

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["rs", "py", "js"])
    pub extensions: Vec<String>,
    /// Patterns to exclude (e.g., ["node_modules", "target", ".git"])
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: usize,
    /// Maximum number of files to scan
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp",
                "cs", "rb", "php", "swift", "kt", "scala", "vue", "svelte",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            excludes: vec![
                ".git",
                "target",
                "node_modules",
                "vendor",
                "dist",
                "build",
                "__pycache__",
                ".venv",
                "venv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_size: 100 * 1024, // 100KB
            max_files: None,
        }
    }
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
            max_files: Some(config.max_files),
        }
    }
}

/// File scanner for discovering source files.
pub struct FileScanner {
    config: ScanConfig,
    repo_root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(repo_root: PathBuf, config: ScanConfig) -> Self {
        Self { config, repo_root }
    }

    /// Discover all analyzable files, in deterministic path order.
    pub fn discover(&self) -> Result<Vec<DiscoveredFile>> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.repo_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Never filter the walk root itself.
                entry.depth() == 0 || !self.is_excluded(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(max) = self.config.max_files {
                if files.len() >= max {
                    break;
                }
            }

            let path = entry.path();
            if !self.matches(path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };

            let rel_path = path.strip_prefix(&self.repo_root).unwrap_or(path);
            files.push(DiscoveredFile {
                path: rel_path.to_string_lossy().to_string(),
                size: metadata.len(),
                extension: extension_of(path),
            });
        }

        debug!("Discovered {} analyzable files", files.len());
        Ok(files)
    }

    /// Summarize the repository shape from a discovery result.
    pub fn structure(&self, files: &[DiscoveredFile]) -> RepoStructure {
        let mut directories: BTreeMap<String, usize> = BTreeMap::new();
        let mut extensions: BTreeMap<String, usize> = BTreeMap::new();

        for file in files {
            let dir = Path::new(&file.path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| ".".to_string());
            *directories.entry(dir).or_default() += 1;
            *extensions.entry(file.extension.clone()).or_default() += 1;
        }

        RepoStructure {
            directories,
            extensions,
            total_files: files.len(),
        }
    }

    /// Read a discovered file into the record handed to the model.
    pub fn read_record(&self, file: &DiscoveredFile) -> Result<FileRecord> {
        let absolute_path = self.repo_root.join(&file.path);
        let content = fs::read_to_string(&absolute_path)
            .with_context(|| format!("Failed to read {}", file.path))?;

        Ok(FileRecord {
            absolute_path,
            relative_path: file.path.clone(),
            content,
            extension: file.extension.clone(),
        })
    }

    /// Check if a file matches scan criteria.
    pub fn matches(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.is_excluded(name) {
                return false;
            }
        }

        let ext = extension_of(path);
        if !self.config.extensions.contains(&ext) {
            return false;
        }

        match fs::metadata(path) {
            Ok(metadata) if metadata.len() <= self.config.max_file_size as u64 => {}
            _ => return false,
        }

        !is_probably_binary(path)
    }

    /// Check if a name matches exclusion patterns.
    fn is_excluded(&self, name: &str) -> bool {
        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        // Explicit excludes
        self.config.excludes.iter().any(|pattern| name == pattern)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string()
}

/// Sniff the head of a file for NUL bytes. Unreadable files count as
/// binary so they drop out of discovery.
fn is_probably_binary(path: &Path) -> bool {
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    match fs::File::open(path).and_then(|mut f| f.read(&mut buf)) {
        Ok(n) => buf[..n].contains(&0),
        Err(e) => {
            warn!("Cannot sniff {}: {}", path.display(), e);
            true
        }
    }
}
