use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use omp_core::fetch::Portal;
use omp_core::progress::Progress;
use omp_core::schema::{BodyRecord, ChangeRecord, DocumentRecord, MeetingRecord, SnippetRecord};
use omp_core::store::clean_empty_bodies;
use omp_core::{Config, DocumentStore, IngestOptions, Pipeline, ResourceType};
use omp_index::Projector;
use schemars::schema_for;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Parser)]
#[command(name = "omp")]
#[command(about = "Rhode Island Open Meetings Portal scraper", long_about = None)]
struct Cli {
    /// TOML config file (default: ./omp.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and store a contiguous range of portal ids
    Ingest {
        kind: Kind,
        start: i64,
        count: u32,
        /// Concurrent workers (default: run.workers from the config)
        workers: Option<usize>,
        /// Replace records that are already stored
        #[arg(long)]
        overwrite: bool,
    },
    /// Write display records for a range of stored ids as a JSON array.
    /// Ids with nothing stored or a failed projection are logged, not written
    Export { kind: Kind, start: i64, count: u32 },
    /// Refetch one id and record what changed
    Update { kind: Kind, id: i64 },
    /// Delete bodies stored without a name
    Clean,
    /// Export JSON Schemas of the stored record shapes
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for persisted records
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Meeting,
    Body,
}

impl From<Kind> for ResourceType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Meeting => ResourceType::Meeting,
            Kind::Body => ResourceType::Body,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Schema { command } = cli.command {
        return match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        };
    }

    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    let run = RunName::new(&cli.command)?;
    let log_path = init_logging(&config.run.data_dir.join("logs"), &run.0)?;
    tracing::info!(log = %log_path.display(), "run {} started", run.0);

    match cli.command {
        Commands::Ingest {
            kind,
            start,
            count,
            workers,
            overwrite,
        } => {
            let options = IngestOptions {
                workers: workers.unwrap_or(config.run.workers),
                overwrite,
                batch_timeout: config.run.batch_timeout(),
            };
            ingest(&config, &run, kind.into(), start, count, &options).await
        }
        Commands::Export { kind, start, count } => export(&config, &run, kind.into(), start, count),
        Commands::Update { kind, id } => update(&config, kind.into(), id).await,
        Commands::Clean => clean(&config),
        Commands::Schema { .. } => Ok(()),
    }
}

/// `<command>_<resource>_<utc stamp>`, shared by the log file and the
/// output artifact of one run.
struct RunName(String);

impl RunName {
    fn new(command: &Commands) -> Result<Self> {
        let (verb, resource) = match command {
            Commands::Ingest { kind, .. } => ("ingest", ResourceType::from(*kind)),
            Commands::Export { kind, .. } => ("export", ResourceType::from(*kind)),
            Commands::Update { kind, .. } => ("update", ResourceType::from(*kind)),
            Commands::Clean | Commands::Schema { .. } => ("clean", ResourceType::Body),
        };
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day]T[hour][minute][second]Z"))?;
        Ok(Self(format!("{verb}_{resource}_{stamp}")))
    }
}

fn init_logging(log_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let path = log_dir.join(format!("{name}.log"));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(filter);
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(path)
}

/// Single-line progress on stderr.
#[derive(Default)]
struct TerminalProgress {
    total: usize,
    done: usize,
    by_outcome: [usize; 3],
}

impl TerminalProgress {
    fn render(&self) {
        let [stored, skipped, failed] = self.by_outcome;
        let mut err = std::io::stderr().lock();
        let _ = write!(
            err,
            "\r{}/{} stored {stored} skipped {skipped} failed {failed}",
            self.done, self.total
        );
        let _ = err.flush();
    }
}

impl Progress for TerminalProgress {
    fn begin(&mut self, total: usize) {
        self.total = total;
        self.render();
    }

    fn item_done(&mut self, _id: i64, outcome: u8) {
        self.done += 1;
        if let Some(slot) = self.by_outcome.get_mut(usize::from(outcome)) {
            *slot += 1;
        }
        self.render();
    }

    fn finish(&mut self) {
        eprintln!();
    }
}

fn write_artifact<S: Serialize>(config: &Config, run: &RunName, value: &S) -> Result<PathBuf> {
    let dir = config.run.data_dir.join("outputs");
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.json", run.0));
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn id_range(start: i64, count: u32) -> std::ops::Range<i64> {
    start..start.saturating_add(i64::from(count))
}

async fn ingest(
    config: &Config,
    run: &RunName,
    rtype: ResourceType,
    start: i64,
    count: u32,
    options: &IngestOptions,
) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).context("opening pipeline")?);
    let mut progress = TerminalProgress::default();
    let outcome = pipeline
        .ingest(rtype, id_range(start, count), options, &mut progress)
        .await;
    pipeline.shutdown().context("closing store")?;
    let report = outcome.with_context(|| format!("ingesting {rtype} {start}+{count}"))?;

    let path = write_artifact(config, run, &report)?;
    println!(
        "{} {rtype} ids: {} stored, {} skipped, {} failed ({})",
        report.count,
        report.counts.stored,
        report.counts.skipped,
        report.counts.failed,
        path.display()
    );
    Ok(())
}

fn export(config: &Config, run: &RunName, rtype: ResourceType, start: i64, count: u32) -> Result<()> {
    let store = DocumentStore::open(&config.store.path).context("opening store")?;
    let portal = Portal::new(&config.portal.base_url);
    let batch = Projector::new(&store, &portal).export_range(rtype, id_range(start, count))?;
    store.close().context("closing store")?;

    if !batch.missing.is_empty() {
        tracing::info!(%rtype, missing = ?batch.missing, "ids with nothing stored");
    }
    let path = write_artifact(config, run, &batch.records)?;
    println!(
        "{count} {rtype} ids: {} exported, {} missing, {} failed ({})",
        batch.records.len(),
        batch.missing.len(),
        batch.failed.len(),
        path.display()
    );
    Ok(())
}

async fn update(config: &Config, rtype: ResourceType, id: i64) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).context("opening pipeline")?);
    let outcome = pipeline.update(rtype, id).await;
    pipeline.shutdown().context("closing store")?;
    let outcome = outcome.with_context(|| format!("updating {rtype} {id}"))?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}

fn clean(config: &Config) -> Result<()> {
    let store = DocumentStore::open(&config.store.path).context("opening store")?;
    let removed = clean_empty_bodies(&store)?;
    store.close().context("closing store")?;
    println!("removed {removed} nameless bodies");
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("MeetingRecord", schema_for!(MeetingRecord)),
        ("BodyRecord", schema_for!(BodyRecord)),
        ("DocumentRecord", schema_for!(DocumentRecord)),
        ("SnippetRecord", schema_for!(SnippetRecord)),
        ("ChangeRecord", schema_for!(ChangeRecord)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
