// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Taxis: Adaptive Image Tagging & Sorting Engine
//!
//! Batch image processing with reverse-search tagging and preference
//! learning from user corrections.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use taxis::analysis::HttpClassifier;
use taxis::cache::SearchCache;
use taxis::config::AppConfig;
use taxis::learning::{PreferenceRule, PreferenceStore};
use taxis::pipeline::{find_images, Pipeline};
use taxis::review::AutoApprove;
use taxis::search::HttpLookupClient;
use taxis::sidecar::SidecarSink;

/// Taxis CLI - Adaptive Image Tagging & Sorting
#[derive(Parser, Debug)]
#[command(name = "taxis")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "0.3.0")]
#[command(about = "Adaptive image tagging and sorting with preference learning", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process images through the tagging and sorting workflow
    Process {
        /// Directory to process (overrides configured inbox)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Re-process items that already have a sidecar
        #[arg(long)]
        no_skip: bool,

        /// Write the batch manifest to this file as JSON
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Show learning, cache and limiter statistics
    Stats,

    /// Learned preference operations
    Preferences {
        #[command(subcommand)]
        action: PreferenceCommands,
    },

    /// Search cache operations
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PreferenceCommands {
    /// Export learned preferences to JSON
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Import preferences from JSON
    Import {
        /// Input file
        input: PathBuf,
    },

    /// Reset all learned preferences
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove expired entries
    Cleanup,

    /// Remove all entries
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !cli.quiet {
        info!("Taxis v0.3.0 - Adaptive Image Sorter");
    }

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Some(Commands::Process { dir, no_skip, manifest }) => {
            run_process(config, dir, no_skip, manifest).await
        }
        Some(Commands::Stats) => run_stats(config).await,
        Some(Commands::Preferences { action }) => run_preferences(config, action),
        Some(Commands::Cache { action }) => run_cache(config, action),
        Some(Commands::Config { action }) => run_config(config, action, &cli.config),
        None => run_process(config, None, false, None).await,
    }
}

fn data_path(config: &AppConfig, file: &str) -> PathBuf {
    Path::new(&config.directories.data).join(file)
}

fn open_store(config: &AppConfig) -> anyhow::Result<PreferenceStore> {
    PreferenceStore::open(
        data_path(config, "preferences.db"),
        config.learning.confidence.clone(),
    )
    .context("failed to open preference database")
}

fn open_cache(config: &AppConfig) -> anyhow::Result<SearchCache> {
    SearchCache::open(data_path(config, "search_cache.db"), config.cache.ttl_hours)
        .context("failed to open search cache")
}

fn build_pipeline(mut config: AppConfig, no_skip: bool) -> anyhow::Result<Pipeline> {
    if no_skip {
        config.workflow.skip_existing = false;
    }

    let store = open_store(&config)?;
    let cache = open_cache(&config)?;

    let lookup = HttpLookupClient::new(
        &config.lookup.url,
        config.lookup.min_similarity,
        config.lookup.max_tags,
        config.lookup.timeout_secs,
    )?;

    let classifier = if config.classifier.enabled {
        Some(Box::new(HttpClassifier::new(
            &config.classifier.url,
            config.classifier.timeout_secs,
        )?) as Box<dyn taxis::analysis::ContentClassifier>)
    } else {
        warn!("Content classification disabled; learning from tags only");
        None
    };

    let sorted_root = if config.workflow.move_files {
        config.directories.sorted.as_ref().map(PathBuf::from)
    } else {
        None
    };
    let sink = SidecarSink::new(sorted_root);

    Ok(Pipeline::new(
        config,
        store,
        cache,
        Box::new(lookup),
        classifier,
        Box::new(AutoApprove),
        Box::new(sink),
    ))
}

/// Run the batch processing workflow
async fn run_process(
    config: AppConfig,
    dir_override: Option<PathBuf>,
    no_skip: bool,
    manifest_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let inbox = dir_override.unwrap_or_else(|| PathBuf::from(&config.directories.inbox));
    if !inbox.exists() {
        anyhow::bail!("Inbox directory not found: {:?}", inbox);
    }

    let images = find_images(&config, &inbox)?;
    if images.is_empty() {
        info!("No images to process in {:?}", inbox);
        return Ok(());
    }
    info!("Found {} images in {:?}", images.len(), inbox);

    let pipeline = build_pipeline(config, no_skip)?;

    // Graceful shutdown: finish the current item, then flush the manifest
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after current item...");
            let _ = shutdown_tx.send(true);
        }
    });

    let manifest = pipeline.process_batch(&images, Some(shutdown_rx)).await?;

    println!("\nBatch summary:");
    println!("  Total:   {}", manifest.total);
    println!("  Done:    {}", manifest.done);
    println!("  Skipped: {}", manifest.skipped);
    println!("  Failed:  {}", manifest.failed);
    println!("  Took:    {} ms", manifest.duration_ms);

    for failure in &manifest.failures {
        println!("  FAIL [{}] {}: {}", failure.stage, failure.file, failure.reason);
    }

    if let Some(path) = manifest_out {
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        info!("Manifest written to {:?}", path);
    }

    Ok(())
}

/// Show statistics
async fn run_stats(config: AppConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let cache = open_cache(&config)?;

    let learning = store.stats()?;
    println!("Learning:");
    println!("  Movements:        {}", learning.movements);
    println!("  Corrections:      {}", learning.corrections);
    println!("  Preference rules: {}", learning.preferences);
    println!("  High confidence:  {}", learning.high_confidence);

    let cache_stats = cache.stats()?;
    println!("\nSearch cache (TTL {}h):", cache_stats.ttl_hours);
    println!("  Total entries:   {}", cache_stats.total_entries);
    println!("  Valid entries:   {}", cache_stats.valid_entries);
    println!("  Expired entries: {}", cache_stats.expired_entries);

    Ok(())
}

/// Preference commands
fn run_preferences(config: AppConfig, action: PreferenceCommands) -> anyhow::Result<()> {
    let store = open_store(&config)?;

    match action {
        PreferenceCommands::Export { output } => {
            let rules = store.export()?;
            std::fs::write(&output, serde_json::to_string_pretty(&rules)?)?;
            println!("Exported {} preference rules to {:?}", rules.len(), output);
        }
        PreferenceCommands::Import { input } => {
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {:?}", input))?;
            let rules: Vec<PreferenceRule> = serde_json::from_str(&content)?;
            let count = store.import(&rules)?;
            println!("Imported {} preference rules", count);
        }
        PreferenceCommands::Reset { force } => {
            if !force {
                eprintln!("Use --force to confirm resetting all learned preferences");
                return Ok(());
            }
            store.reset()?;
            println!("All learned preferences cleared");
        }
    }

    Ok(())
}

/// Cache commands
fn run_cache(config: AppConfig, action: CacheCommands) -> anyhow::Result<()> {
    let cache = open_cache(&config)?;

    match action {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            println!("Cache statistics (TTL {}h):", stats.ttl_hours);
            println!("  Total:   {}", stats.total_entries);
            println!("  Valid:   {}", stats.valid_entries);
            println!("  Expired: {}", stats.expired_entries);
        }
        CacheCommands::Cleanup => {
            let deleted = cache.cleanup(Utc::now())?;
            println!("Removed {} expired cache entries", deleted);
        }
        CacheCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing the cache");
                return Ok(());
            }
            let deleted = cache.clear()?;
            println!("Cleared {} cache entries", deleted);
        }
    }

    Ok(())
}

/// Config commands
fn run_config(config: AppConfig, action: ConfigCommands, config_path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            println!("Configuration at {:?} is valid", config_path);
            println!("  Inbox: {}", config.directories.inbox);
            println!("  Lookup: {}", config.lookup.url);
            println!(
                "  Rate limit: {} per {}s",
                config.lookup.rate_limit, config.lookup.window_secs
            );
            println!("  Default category: {}", config.learning.default_category);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["taxis"]).unwrap();
        assert!(!cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_process_command() {
        let cli = Cli::try_parse_from([
            "taxis", "process", "--no-skip", "--dir", "/tmp/inbox",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Process { dir, no_skip, .. }) => {
                assert!(no_skip);
                assert_eq!(dir, Some(PathBuf::from("/tmp/inbox")));
            }
            _ => panic!("Expected Process command"),
        }
    }

    #[test]
    fn test_cli_preferences_export() {
        let cli = Cli::try_parse_from(["taxis", "preferences", "export", "prefs.json"]).unwrap();

        match cli.command {
            Some(Commands::Preferences {
                action: PreferenceCommands::Export { output },
            }) => {
                assert_eq!(output, PathBuf::from("prefs.json"));
            }
            _ => panic!("Expected Preferences Export command"),
        }
    }
}
