//! RLCF CLI - Command-line interface for the feedback learning loop

use anyhow::{bail, Context};
use clap::Parser;
use rlcf_core::{RlcfConfig, WeightCategory, WeightConfig, WeightStore};
use rlcf_learning::{
    assignment_point, select_variant, FeedbackSignal, LearningOutcome, WeightLearner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rlcf")]
#[command(about = "RLCF - Learning retrieval and authority weights from community feedback")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Check configuration validity
    Check,
    /// Inspect and validate weight documents
    Weights {
        #[command(subcommand)]
        command: WeightsCommand,
    },
    /// Apply a learning signal to a persisted weight scope
    Learn {
        /// Signal document path (JSON)
        signal: PathBuf,
        /// Scope to update; runtime overrides do not outlive the process
        #[arg(short, long)]
        experiment: String,
    },
    /// Show which variant a subject is assigned to
    Assign {
        /// Experiment id
        #[arg(short, long)]
        experiment: String,
        /// Subject id (user or session)
        #[arg(short, long)]
        subject: String,
        /// Comma-separated variant allocations, e.g. 0.5,0.5
        #[arg(short, long, value_delimiter = ',', required = true)]
        allocations: Vec<f64>,
    },
}

#[derive(clap::Subcommand)]
enum WeightsCommand {
    /// Print the effective weight document
    Show {
        /// Experiment scope to resolve
        #[arg(short, long)]
        experiment: Option<String>,
        /// Print a single category
        #[arg(long)]
        category: Option<String>,
    },
    /// Validate a weight document in JSON
    Validate {
        /// Weight document path
        file: PathBuf,
    },
    /// List persisted versions of a scope
    History {
        /// Experiment scope; the default scope when omitted
        #[arg(short, long)]
        experiment: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Check) => {
            println!("Configuration OK");
            println!("{}", config.to_toml_string()?);
        }
        Some(Commands::Weights { command }) => weights(&config, command)?,
        Some(Commands::Learn { signal, experiment }) => learn(&config, &signal, &experiment)?,
        Some(Commands::Assign {
            experiment,
            subject,
            allocations,
        }) => {
            let point = assignment_point(&experiment, &subject);
            let Some(index) = select_variant(point, &allocations) else {
                bail!("allocations {:?} do not cover point {:.4}", allocations, point);
            };
            println!("{} -> variant {} (point {:.4})", subject, index, point);
        }
        None => {
            println!("RLCF v{} - Use --help for commands", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RlcfConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RlcfConfig::from_file(path)
                .with_context(|| format!("invalid configuration {}", path.display()))
        }
        None => {
            debug!("No configuration file given; using defaults");
            Ok(RlcfConfig::default())
        }
    }
}

fn open_store(config: &RlcfConfig) -> anyhow::Result<WeightStore> {
    if config.storage.temporary {
        return Ok(WeightStore::temporary()?);
    }
    let runtime = Arc::new(rlcf_weights::RuntimeWeights::new(WeightConfig::default())?);
    WeightStore::open(&config.storage.db_path, runtime)
        .with_context(|| format!("cannot open {}", config.storage.db_path.display()))
}

fn weights(config: &RlcfConfig, command: WeightsCommand) -> anyhow::Result<()> {
    match command {
        WeightsCommand::Show {
            experiment,
            category,
        } => {
            let store = open_store(config)?;
            let resolved = store.resolve(experiment.as_deref())?;
            info!(
                "Resolved from {:?} (revision {:?})",
                resolved.source, resolved.revision
            );
            let rendered = match category {
                Some(name) => {
                    let category: WeightCategory = name.parse()?;
                    serde_json::to_string_pretty(&resolved.config.category(category))?
                }
                None => resolved.config.to_json_pretty()?,
            };
            println!("{}", rendered);
        }
        WeightsCommand::Validate { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let document = WeightConfig::from_json_str(&text)?;
            document.validate()?;
            config.check_weights(&document)?;
            println!("{}: valid", file.display());
        }
        WeightsCommand::History { experiment } => {
            let store = open_store(config)?;
            for version in store.history(experiment.as_deref())? {
                println!(
                    "r{}  {}  {}  {:?}",
                    version.revision,
                    version.saved_at.to_rfc3339(),
                    &version.fingerprint[..version.fingerprint.len().min(12)],
                    version.metrics
                );
            }
        }
    }
    Ok(())
}

fn learn(config: &RlcfConfig, path: &Path, experiment: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let signal = FeedbackSignal::from_json_str(&text)?;

    let store = Arc::new(open_store(config)?);
    let learner = WeightLearner::new(store.clone(), config.learner.clone());
    match learner.update_from_feedback(signal.category(), &signal, Some(experiment))? {
        LearningOutcome::Applied { updates, .. } => {
            for update in &updates {
                println!(
                    "{}: {:.4} -> {:.4} (gradient {:+.4})",
                    update.name, update.before, update.after, update.gradient
                );
            }
        }
        LearningOutcome::Skipped { reason } => println!("skipped: {:?}", reason),
    }
    store.flush()?;
    Ok(())
}
