//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Ruleforge - mine coding conventions from a repository with local AI
///
/// Scans a repository, extracts candidate coding-convention rules with
/// an Ollama-hosted model, weights them by git history, and writes
/// editor-consumable rule files. Interrupted runs can be resumed.
///
/// Examples:
///   ruleforge .
///   ruleforge ~/code/my-project --model qwen2.5-coder:32b
///   ruleforge . --fresh
///   ruleforge . --dry-run
///   ruleforge --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Repository directory to analyze
    #[arg(value_name = "DIR", default_value = ".")]
    pub directory: PathBuf,

    /// Ollama model to use for analysis
    ///
    /// Recommended models: llama3.2:latest, codellama:34b, qwen2.5-coder:32b.
    /// Can also be set via RULEFORGE_MODEL env var or .ruleforge.toml config.
    #[arg(
        short,
        long,
        default_value = "llama3.2:latest",
        env = "RULEFORGE_MODEL"
    )]
    pub model: String,

    /// Ollama API endpoint URL
    #[arg(long, default_value = "http://localhost:11434", env = "OLLAMA_URL")]
    pub ollama_url: String,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ruleforge.toml in the current
    /// directory and then in the analyzed repository
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for generated rule files, relative to the repository
    #[arg(long, value_name = "DIR")]
    pub rules_dir: Option<String>,

    /// Maximum number of files to analyze
    #[arg(long, value_name = "COUNT")]
    pub max_files: Option<usize>,

    /// File extensions to include (comma-separated)
    ///
    /// Example: --extensions rs,py,js
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Patterns to exclude from analysis (comma-separated)
    ///
    /// Example: --exclude "generated,vendor"
    #[arg(long, value_name = "PATTERNS", value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Temperature for LLM responses (0.0 - 1.0)
    ///
    /// Lower values produce more consistent/deterministic output
    #[arg(long, default_value = "0.1")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Model requests allowed per minute
    #[arg(long, value_name = "COUNT")]
    pub requests_per_minute: Option<u32>,

    /// Resume an incomplete analysis if one is found
    ///
    /// This is the default when the recorded session is resumable;
    /// the flag makes the intent explicit.
    #[arg(long, conflicts_with = "fresh")]
    pub resume: bool,

    /// Discard any incomplete analysis and start over
    #[arg(long, conflicts_with = "resume")]
    pub fresh: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: scan files without calling the model
    ///
    /// Shows which files would be analyzed and exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .ruleforge.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Validate the target directory
        if !self.directory.exists() {
            return Err(format!(
                "Directory does not exist: {}",
                self.directory.display()
            ));
        }
        if !self.directory.is_dir() {
            return Err(format!(
                "Not a directory: {}",
                self.directory.display()
            ));
        }

        // Validate Ollama URL format (not needed for dry-run)
        if !self.dry_run
            && !self.ollama_url.starts_with("http://")
            && !self.ollama_url.starts_with("https://")
        {
            return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
        }

        // Validate temperature range
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 1.0".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate numeric options if provided
        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }
        if self.max_files == Some(0) {
            return Err("Max files must be at least 1".to_string());
        }
        if self.requests_per_minute == Some(0) {
            return Err("Requests per minute must be at least 1".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            directory: PathBuf::from("."),
            model: "test".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            config: None,
            rules_dir: None,
            max_files: None,
            extensions: None,
            exclude: None,
            temperature: 0.1,
            timeout: None,
            requests_per_minute: None,
            resume: false,
            fresh: false,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_accepts_defaults() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_missing_directory() {
        let mut args = make_args();
        args.directory = PathBuf::from("/definitely/not/a/real/path");
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.ollama_url = "localhost:11434".to_string();
        assert!(args.validate().is_err());

        // Dry runs never contact the model, so the URL is not checked.
        args.dry_run = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_valued_options() {
        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.max_files = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
