use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sonda::config::Config;
use sonda::engine::{EngineOptions, RateGovernor, SearchEngine};
use sonda::executor::HttpExecutorProvider;
use sonda::models::{Gender, PersonFields};
use sonda::space::CombinationSpace;
use sonda::storage::{CheckpointStore, JsonlResultSink};

#[derive(Parser)]
#[command(
    name = "sonda",
    version,
    about = "Resumable combinatorial search engine for registry lookups",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the search for one person (resumes automatically from a checkpoint)
    Search {
        /// Person identifier used in checkpoints and result files
        #[arg(long)]
        person_id: u32,

        /// First name
        #[arg(long)]
        first_name: String,

        /// First last name
        #[arg(long)]
        last_name_1: String,

        /// Second last name
        #[arg(long)]
        last_name_2: String,

        /// Gender code (H or M)
        #[arg(long)]
        gender: Gender,

        /// Override the configured range start (e.g. 1990 or 1990-11)
        #[arg(long)]
        from: Option<String>,

        /// Override the configured range end
        #[arg(long)]
        to: Option<String>,
    },

    /// Show the saved checkpoint, if any
    Status,

    /// Delete the saved checkpoint
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    config.validate()?;

    setup_tracing(&cli.log_format, cli.verbose, &config.logging.level)?;

    match cli.command {
        Commands::Search {
            person_id,
            first_name,
            last_name_1,
            last_name_2,
            gender,
            from,
            to,
        } => {
            if let Some(from) = from {
                config.search.start = from;
            }
            if let Some(to) = to {
                config.search.end = to;
            }

            let person = PersonFields {
                person_id,
                first_name,
                last_name_1,
                last_name_2,
                gender,
            };
            search(config, person).await?;
        }

        Commands::Status => status(&config)?,

        Commands::Clear => {
            let store = CheckpointStore::new(&config.persistence.checkpoint_dir)?;
            store.clear()?;
            println!("Checkpoint cleared");
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool, configured_level: &str) -> Result<()> {
    let directive = if verbose {
        "sonda=debug,info".to_string()
    } else {
        format!("sonda={configured_level},warn")
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn search(config: Config, person: PersonFields) -> Result<()> {
    let space = CombinationSpace::from_bounds(&config.search.start, &config.search.end)
        .context("Invalid search range")?;

    tracing::info!(
        person = %person.full_name(),
        range = format!("{}..{}", config.search.start, config.search.end),
        total = space.total(),
        workers = config.workers.num_workers,
        "Search configured"
    );

    let store = CheckpointStore::new(&config.persistence.checkpoint_dir)?;

    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let sink = JsonlResultSink::new(&config.persistence.output_dir, &run_id)?;

    let provider = Arc::new(HttpExecutorProvider::new(config.executor.clone()));
    let options = EngineOptions::from_config(&config);

    let engine = SearchEngine::new(
        options,
        space,
        person,
        provider,
        RateGovernor::new(),
        store,
        Box::new(sink),
    );

    let report = engine.run().await?;

    println!();
    println!("Run finished");
    println!("  Processed:  {}/{}", report.processed, report.total_combinations);
    println!("  Matches:    {}", report.matches.len());
    println!("  Unresolved: {}", report.unresolved.len());
    for m in &report.matches {
        println!(
            "    {} ({}, {})",
            m.extracted_id,
            m.birth_date.map_or_else(|| "?".to_string(), |d| d.to_string()),
            m.region
        );
    }
    if report.is_partial() {
        println!("  Checkpoint kept; run again to continue");
    }

    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = CheckpointStore::new(&config.persistence.checkpoint_dir)?;

    match store.load()? {
        Some(ckpt) => {
            println!("Checkpoint for person {} ({})", ckpt.person_id, ckpt.person_name);
            println!(
                "  Progress:     {}/{} ({:.2}%)",
                ckpt.processed_count,
                ckpt.total_combinations,
                ckpt.completion_percentage()
            );
            println!("  Resume index: {}", ckpt.resume_index);
            if let Some(combo) = &ckpt.last_combo {
                println!("  Last combo:   {combo}");
            }
            println!("  Matches:      {}", ckpt.matches.len());
            println!("  Saved at:     {}", ckpt.saved_at);
        }
        None => println!("No checkpoint found"),
    }

    Ok(())
}
