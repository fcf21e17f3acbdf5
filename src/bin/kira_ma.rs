use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_media_aggregator::app::{App, CancelToken, RunOptions, SourceSet};
use kira_media_aggregator::catalogue::CatalogueStore;
use kira_media_aggregator::config::ConfigLoader;
use kira_media_aggregator::domain::{MediaKind, SourceKind};
use kira_media_aggregator::error::KiraError;
use kira_media_aggregator::output::{JsonOutput, LogProgress};
use kira_media_aggregator::pacing::SystemClock;
use kira_media_aggregator::providers::ReqwestTransport;

const DEFAULT_CATALOGUE: &str = "data/act_birds.json";

#[derive(Parser)]
#[command(name = "kira-ma")]
#[command(about = "Fill a species catalogue with openly licensed photos and recordings")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Aggregate photos from Wikimedia Commons, ALA and iNaturalist")]
    Photos(PhotoArgs),
    #[command(about = "Aggregate recordings from Xeno-canto")]
    Audio(RunArgs),
    #[command(about = "Recompute catalogue statistics without querying any source")]
    Stats(StatsArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(default_value = DEFAULT_CATALOGUE)]
    catalogue: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    max_results: Option<usize>,

    #[arg(long)]
    threshold: Option<usize>,

    /// Only subjects with fewer than this many existing media.
    #[arg(long)]
    below: Option<usize>,

    #[arg(long)]
    dry_run: bool,

    /// Also write the run summary to this file.
    #[arg(long)]
    report: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct PhotoArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Source priority, highest first.
    #[arg(long, value_enum, value_delimiter = ',')]
    sources: Option<Vec<SourceKind>>,
}

#[derive(Args)]
struct StatsArgs {
    #[arg(default_value = DEFAULT_CATALOGUE)]
    catalogue: Utf8PathBuf,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidScientificName(_)
        | KiraError::InvalidSource(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_)
        | KiraError::MissingCredential { .. }
        | KiraError::CatalogueParse { .. } => 2,
        KiraError::HttpClient(_)
        | KiraError::SourceNetwork { .. }
        | KiraError::SourceStatus { .. }
        | KiraError::RateLimited { .. }
        | KiraError::SourceParse { .. }
        | KiraError::SourceApi { .. } => 3,
        KiraError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Photos(args) => run_media(MediaKind::Photo, args.run, args.sources),
        Commands::Audio(args) => run_media(MediaKind::Audio, args, None),
        Commands::Stats(args) => {
            let app = App::new(CatalogueStore::new(args.catalogue));
            let result = app.refresh_statistics(args.dry_run)?;
            JsonOutput::print_stats(&result).into_diagnostic()?;
            Ok(())
        }
    }
}

fn run_media(
    kind: MediaKind,
    args: RunArgs,
    sources: Option<Vec<SourceKind>>,
) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?.with_overrides(
        args.max_results,
        args.threshold,
        sources,
    )?;

    let transport = Arc::new(ReqwestTransport::new()?);
    let set = SourceSet::build(&resolved, kind, transport, Arc::new(SystemClock));
    if set.sources.is_empty() {
        let reason = set
            .disabled
            .first()
            .map(|d| d.reason.clone())
            .unwrap_or_else(|| "no sources configured".to_string());
        return Err(KiraError::InvalidConfig(reason).into());
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received, finishing current subject");
        handler_token.cancel();
    })
    .into_diagnostic()?;

    let app = App::new(CatalogueStore::new(args.catalogue));
    let aggregator = set.aggregator(resolved.policy);
    let options = RunOptions {
        below: args.below,
        dry_run: args.dry_run,
    };
    let summary = app.run(
        kind,
        &aggregator,
        set.disabled.clone(),
        options,
        &LogProgress,
        &cancel,
    )?;

    if let Some(path) = &args.report {
        JsonOutput::write_report(&summary, path)?;
    }
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}
