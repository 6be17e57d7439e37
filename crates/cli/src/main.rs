use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cryocat_batch::{BatchEngine, BatchReport, EngineSettings, RemoveRequest, TransferRequest};
use cryocat_core::config::ProjectConfig;
use cryocat_core::{parse_pattern, EntityKind};
use cryocat_store::{find_matches, Root};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cryocat", version, about = "Copy, move, remove and list cryo-ET project entities")]
struct Cli {
    /// Project configuration file (overrides CRYOCAT_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `cryocat_batch=trace` (overrides RUST_LOG).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy matching entities to a target template.
    Cp(TransferArgs),
    /// Move matching entities to a target template.
    Mv(TransferArgs),
    /// Remove matching entities from the overlay.
    Rm(RemoveArgs),
    /// List matching entities and where they live.
    Ls(ListArgs),
}

#[derive(Debug, Args)]
struct TransferArgs {
    /// picks | mesh | segmentation | tomogram | feature
    kind: EntityKind,
    source: String,
    target: String,
    /// Restrict to this run (repeatable).
    #[arg(long = "run")]
    runs: Vec<String>,
    #[arg(long)]
    overwrite: bool,
    #[arg(long)]
    workers: Option<usize>,
    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RemoveArgs {
    kind: EntityKind,
    pattern: String,
    #[arg(long = "run")]
    runs: Vec<String>,
    #[arg(long)]
    dry_run: bool,
    /// Allow glob and regex patterns to delete.
    #[arg(long)]
    force: bool,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    kind: EntityKind,
    #[arg(default_value = "re:.*")]
    pattern: String,
    #[arg(long = "run")]
    runs: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "cryocat failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>, json: bool) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| "cryocat=info".into()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "cryocat=info".into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = EngineSettings::from_env();
    let config_path = cli
        .config
        .or(settings.config_path.clone())
        .context("no project configuration: pass --config or set CRYOCAT_CONFIG")?;
    let config = ProjectConfig::load(&config_path)?;
    let root = Root::from_config(config)?;
    let engine = BatchEngine::new(root);

    let (report, json) = match cli.command {
        Command::Cp(args) => {
            let json = args.json;
            let request = transfer_request(args, &settings);
            (engine.copy(request).await?, json)
        }
        Command::Mv(args) => {
            let json = args.json;
            let request = transfer_request(args, &settings);
            (engine.move_entities(request).await?, json)
        }
        Command::Rm(args) => {
            let request = RemoveRequest::new(args.kind, args.pattern)
                .runs(args.runs)
                .dry_run(args.dry_run)
                .force(args.force)
                .workers(args.workers.unwrap_or(settings.workers));
            (engine.remove(request).await?, args.json)
        }
        Command::Ls(args) => {
            list(engine.root(), args)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    print_report(&report, json, settings.max_errors_shown)
}

fn transfer_request(args: TransferArgs, settings: &EngineSettings) -> TransferRequest {
    TransferRequest::new(args.kind, args.source, args.target)
        .runs(args.runs)
        .overwrite(args.overwrite)
        .workers(args.workers.unwrap_or(settings.workers))
}

fn print_report(report: &BatchReport, json: bool, max_errors_shown: usize) -> anyhow::Result<ExitCode> {
    if json {
        println!("{}", report.to_json()?);
    }
    let summary = report.summary(max_errors_shown);
    println!("{summary}");
    Ok(if summary.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn list(root: &Root, args: ListArgs) -> anyhow::Result<()> {
    let pattern = parse_pattern(args.kind, &args.pattern)?;
    let runs = if args.runs.is_empty() {
        root.runs()?
    } else {
        args.runs
            .iter()
            .map(|name| root.run(name))
            .collect::<Result<Vec<_>, _>>()?
    };

    for run in runs {
        for entity in find_matches(&run, &pattern)? {
            println!("{}\t{}\t{}", run.name(), entity.id, entity.presence.label());
        }
    }
    Ok(())
}
