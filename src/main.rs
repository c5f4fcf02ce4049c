//! Ruleforge - LLM-powered coding-convention extractor
//!
//! A CLI tool that scans a repository, sends file contents to an
//! Ollama-hosted model to extract candidate coding-convention rules,
//! weights and clusters them using git history, and writes
//! editor-consumable rule files. Long runs survive interruption: the
//! analysis pipeline persists progress and resumes without re-paying
//! for completed model calls.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (connection, config, analysis failure, etc.)

mod analyzer;
mod cli;
mod config;
mod git;
mod llm;
mod models;
mod output;
mod phases;
mod rate_limit;
mod rules;
mod scanner;
mod state;

use analyzer::AnalysisDriver;
use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use llm::{OllamaConfig, OllamaModel};
use scanner::{FileScanner, ScanConfig};
use state::StateManager;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so `[general] verbose` in
    // .ruleforge.toml can raise the log level
    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(&args, &config);

    info!("Ruleforge v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Run the analysis
    match run_analysis(args, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Analysis failed: {}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .ruleforge.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(".ruleforge.toml");

    if path.exists() {
        eprintln!("⚠️  .ruleforge.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .ruleforge.toml")?;

    println!("✅ Created .ruleforge.toml with default settings.");
    println!("   Edit it to customize model, extensions, rate limits, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings. The config file can
/// force verbose output, but --quiet always wins.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis workflow.
async fn run_analysis(args: Args, mut config: Config) -> Result<()> {
    let start_time = Instant::now();

    // A config in the analyzed repository wins over the working
    // directory's defaults.
    if let Ok(Some(repo_config)) = Config::load_from_repo(&args.directory) {
        info!("Found .ruleforge.toml in repository");
        config = repo_config;
        config.merge_with_args(&args);
    }

    let scan_config = ScanConfig::from(&config.scanner);

    // Handle --dry-run: scan files and exit
    if args.dry_run {
        return handle_dry_run(&args.directory, &scan_config);
    }

    println!("🔎 Analyzing repository: {}", args.directory.display());
    println!("   Model: {}", config.model.name);
    println!("   Ollama: {}", config.model.ollama_url);
    println!(
        "   Rate limit: {} requests/minute",
        config.rate_limit.requests_per_minute
    );

    let model = OllamaModel::new(OllamaConfig {
        ollama_url: config.model.ollama_url.clone(),
        model_name: config.model.name.clone(),
        temperature: config.model.temperature,
        timeout_seconds: config.model.timeout_seconds,
    })?;

    let mut driver = AnalysisDriver::new(&args.directory, config, Arc::new(model))?;

    // Decide whether to resume an incomplete session
    let resume = decide_resume(&args, driver.state_manager()).await;

    println!("\n🔬 Running analysis pipeline...\n");
    let written = driver.run(resume).await?;

    // Print summary
    let duration = start_time.elapsed().as_secs_f64();
    println!("\n📊 Analysis Summary:");
    println!("   Rule files written: {}", written.len());
    for path in &written {
        println!("     📄 {}", path.display());
    }
    println!("   Duration: {:.1}s", duration);
    println!("\n✅ Analysis complete!");

    Ok(())
}

/// Inspect the state directory for an incomplete session and decide,
/// from the flags, whether to resume it.
async fn decide_resume(args: &Args, state: &StateManager) -> bool {
    let Some(info) = state.detect_incomplete_analysis() else {
        if args.resume {
            warn!("No incomplete analysis found to resume; starting fresh");
        }
        return false;
    };

    println!("\n⏸️  Found an incomplete analysis session:");
    println!("   Session: {}", info.session_id);
    println!(
        "   Started: {}",
        info.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "   Phase: {} ({} phases completed)",
        info.phase_description,
        info.completed_phases.len()
    );
    if let Some(progress) = &info.progress {
        println!(
            "   Progress: {}/{} completed, {} failed",
            progress.completed, progress.total, progress.failed
        );
    }

    if args.fresh {
        println!("   Discarding it (--fresh) and starting over.");
        state.cleanup_failed_session().await;
        return false;
    }

    if !info.can_resume {
        println!(
            "   Cannot resume: missing cache files: {}",
            info.missing_cache_files.join(", ")
        );
        println!("   Starting fresh instead.");
        state.cleanup_failed_session().await;
        return false;
    }

    println!("   Resuming it (pass --fresh to start over).");
    true
}

/// Handle --dry-run: scan files, print what would be analyzed, exit.
fn handle_dry_run(repo_path: &Path, scan_config: &ScanConfig) -> Result<()> {
    println!("\n🔍 Dry run: scanning files (no model calls)...\n");

    let file_scanner = FileScanner::new(repo_path.to_path_buf(), scan_config.clone());
    let files = file_scanner.discover()?;

    if files.is_empty() {
        println!("   No matching source files found.");
    } else {
        println!("   Found {} files that would be analyzed:\n", files.len());
        for file in &files {
            println!("     📄 {} ({} bytes)", file.path, file.size);
        }
        println!("\n   Total: {} files", files.len());
    }

    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(())
}

/// Load configuration from file or use defaults. Runs before logging
/// is initialized, so problems are reported on stderr directly.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load .ruleforge.toml, using defaults: {:#}", e);
            Ok(Config::default())
        }
    }
}
