use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use trellis_engine::{ImportService, InMemoryStore};
use trellis_models::{
    AtomicMode, ImportMode, ImportParams, ImportStatus, ImportStrategy, ReportMode, TrackerPayload,
    ValidationMode,
};

#[derive(Parser)]
#[command(
    name = "trellis",
    about = "Run tracker imports against an in-memory store",
    version,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a payload document. Dry-run by default; pass --commit to persist.
    Import {
        /// Payload JSON document (or "-" for stdin).
        payload: PathBuf,
        /// Catalog JSON: metadata, system defaults, pre-existing objects.
        #[arg(short, long)]
        catalog: Option<PathBuf>,
        /// Persist changes instead of stopping after validation.
        #[arg(long, action = ArgAction::SetTrue)]
        commit: bool,
        #[arg(long, value_enum, default_value = "create-and-update")]
        strategy: StrategyArg,
        #[arg(long, value_enum, default_value = "all")]
        atomic: AtomicArg,
        #[arg(long, value_enum, default_value = "full")]
        validation: ValidationArg,
        #[arg(long, value_enum, default_value = "errors")]
        report: ReportArg,
        /// Skip rule-engine evaluation.
        #[arg(long, action = ArgAction::SetTrue)]
        skip_rules: bool,
        /// Pretty-print the report.
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Create,
    Update,
    CreateAndUpdate,
    Delete,
}

#[derive(Clone, Copy, ValueEnum)]
enum AtomicArg {
    All,
    Object,
}

#[derive(Clone, Copy, ValueEnum)]
enum ValidationArg {
    Full,
    FailFast,
    Skip,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportArg {
    Full,
    Errors,
    Warnings,
}

impl From<StrategyArg> for ImportStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Create => Self::Create,
            StrategyArg::Update => Self::Update,
            StrategyArg::CreateAndUpdate => Self::CreateAndUpdate,
            StrategyArg::Delete => Self::Delete,
        }
    }
}

impl From<AtomicArg> for AtomicMode {
    fn from(value: AtomicArg) -> Self {
        match value {
            AtomicArg::All => Self::All,
            AtomicArg::Object => Self::Object,
        }
    }
}

impl From<ValidationArg> for ValidationMode {
    fn from(value: ValidationArg) -> Self {
        match value {
            ValidationArg::Full => Self::Full,
            ValidationArg::FailFast => Self::FailFast,
            ValidationArg::Skip => Self::Skip,
        }
    }
}

impl From<ReportArg> for ReportMode {
    fn from(value: ReportArg) -> Self {
        match value {
            ReportArg::Full => Self::Full,
            ReportArg::Errors => Self::Errors,
            ReportArg::Warnings => Self::Warnings,
        }
    }
}

fn read_input(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading payload from stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Import {
            payload,
            catalog,
            commit,
            strategy,
            atomic,
            validation,
            report,
            skip_rules,
            pretty,
        } => {
            let store = Arc::new(InMemoryStore::new());
            if let Some(catalog_path) = catalog {
                let raw = fs::read_to_string(&catalog_path)
                    .with_context(|| format!("reading {}", catalog_path.display()))?;
                let catalog = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", catalog_path.display()))?;
                store.seed(catalog).await;
            }

            let document: TrackerPayload =
                serde_json::from_str(&read_input(&payload)?).context("parsing payload")?;

            let params = ImportParams {
                import_mode: if commit { ImportMode::Commit } else { ImportMode::Validate },
                strategy: strategy.into(),
                atomic_mode: atomic.into(),
                validation_mode: validation.into(),
                report_mode: report.into(),
                skip_rule_engine: skip_rules,
                ..ImportParams::default()
            };

            let service = ImportService::with_defaults(store);
            let outcome = service.import(params, document).await?;

            let rendered = if pretty {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string(&outcome)?
            };
            println!("{}", rendered);

            Ok(match outcome.status {
                ImportStatus::Ok | ImportStatus::Warning => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
    }
}
