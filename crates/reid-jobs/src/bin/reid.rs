//! reid: command-line front end for animal re-identification.
//!
//! Enrolls known individuals, runs investigations on new images, and lists
//! the human-review queue. With `DATABASE_URL` set, embeddings and the review
//! queue live in PostgreSQL; otherwise everything is in memory for the
//! lifetime of the process.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use reid_core::{
    Coordinates, EventBus, ItemMetadata, RecordLocation, VerificationRepository,
    VerificationSource,
};
use reid_db::{Database, MemoryVerificationRepository};
use reid_inference::{InferenceConfig, RemoteServices};
use reid_jobs::{
    Gatekeeper, InvestigationRequest, InvestigationWorker, Orchestrator, OrchestratorConfig,
    WorkerConfig,
};
use reid_search::{EnsembleConfig, MatchEngine, MatchStrategy, SimilarityIndex};

#[derive(Parser)]
#[command(name = "reid")]
#[command(author, version, about = "Animal re-identification from photographs")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a known individual from a reference image
    Enroll {
        /// Reference image
        image: PathBuf,

        /// Name of the individual
        #[arg(short, long)]
        name: String,

        /// Species of the individual
        #[arg(short, long)]
        species: Option<String>,

        /// Where the reference image was taken
        #[arg(long)]
        location_name: Option<String>,

        /// Latitude of the sighting
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the sighting
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// Identify the animals in an image
    Identify {
        /// Image to investigate
        image: PathBuf,

        /// Location as the user describes it
        #[arg(short, long)]
        location: Option<String>,

        /// Latitude from the image's geotag
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude from the image's geotag
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Restrict matching to one species
        #[arg(short, long)]
        species: Option<String>,

        /// Ensemble strategy: single, consensus, or cascade
        #[arg(long)]
        strategy: Option<MatchStrategy>,
    },

    /// Investigate several images through the worker pool
    Batch {
        /// Images to investigate
        #[arg(required = true, num_args = 1..)]
        images: Vec<PathBuf>,

        /// Treat the images as automatic re-scans rather than uploads
        #[arg(long)]
        auto_discovery: bool,
    },

    /// List entries waiting for human review
    Pending {
        /// Maximum entries to list
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

/// Collaborators shared by every subcommand.
struct Runtime {
    services: RemoteServices,
    engine: Arc<MatchEngine>,
    gatekeeper: Gatekeeper,
    events: Arc<EventBus>,
}

impl Runtime {
    async fn build() -> anyhow::Result<Self> {
        let inference = InferenceConfig::from_env();
        let services =
            RemoteServices::from_config(&inference).context("invalid inference configuration")?;

        let (index, repo): (SimilarityIndex, Arc<dyn VerificationRepository>) =
            match std::env::var("DATABASE_URL") {
                Ok(url) => {
                    let db = Database::connect(&url)
                        .await
                        .context("failed to connect to database")?;
                    db.migrate().await.context("failed to run migrations")?;
                    let index = SimilarityIndex::with_backend(Arc::new(db.embeddings.clone()));
                    let loaded = index.hydrate().await.context("failed to load embeddings")?;
                    info!(records = loaded, "Loaded embeddings from database");
                    (index, Arc::new(db.verification.clone()))
                }
                Err(_) => {
                    warn!("DATABASE_URL not set, using in-memory storage");
                    (
                        SimilarityIndex::new(),
                        Arc::new(MemoryVerificationRepository::new()),
                    )
                }
            };

        let mut engine = MatchEngine::new(
            Arc::new(index),
            services.embedders.embedders().to_vec(),
            EnsembleConfig::from_env(),
        )
        .with_embed_timeout(inference.embed_timeout);
        if let Some(verifier) = &services.verifier {
            engine = engine.with_verifier(verifier.clone());
        }

        Ok(Self {
            services,
            engine: Arc::new(engine),
            gatekeeper: Gatekeeper::new(repo),
            events: Arc::new(EventBus::new(reid_core::defaults::EVENT_BUS_CAPACITY)),
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        let mut orchestrator = Orchestrator::new(
            self.services.detector.clone(),
            self.engine.clone(),
            self.gatekeeper.clone(),
        )
        .with_event_sink(self.events.clone())
        .with_config(OrchestratorConfig::from_env());
        if let Some(web_intel) = &self.services.web_intel {
            orchestrator = orchestrator.with_web_intel(web_intel.clone());
        }
        if let Some(report) = &self.services.report {
            orchestrator = orchestrator.with_report_generator(report.clone());
        }
        orchestrator
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   RUST_LOG    - standard env filter (default: "reid=info,reid_jobs=info,reid_search=info")
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reid=info,reid_jobs=info,reid_search=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Enroll {
            image,
            name,
            species,
            location_name,
            lat,
            lon,
        } => {
            let location = coordinates(lat, lon)?
                .map(|c| RecordLocation {
                    coordinates: Some(c),
                    name: location_name.clone(),
                })
                .or_else(|| {
                    location_name.map(|name| RecordLocation {
                        coordinates: None,
                        name: Some(name),
                    })
                });
            let metadata = ItemMetadata {
                display_name: Some(name),
                species,
                location,
            };
            let runtime = Runtime::build().await?;
            cmd_enroll(&runtime, &image, metadata).await
        }
        Commands::Identify {
            image,
            location,
            lat,
            lon,
            species,
            strategy,
        } => {
            let mut request = InvestigationRequest::new(read_image(&image).await?);
            request.geotag = coordinates(lat, lon)?;
            request.location_text = location;
            request.species_hint = species;
            request.strategy = strategy;

            let runtime = Runtime::build().await?;
            let result = runtime.orchestrator().investigate(request).await;
            print_json(&result)
        }
        Commands::Batch {
            images,
            auto_discovery,
        } => {
            let runtime = Runtime::build().await?;
            let source = if auto_discovery {
                VerificationSource::AutoDiscovery
            } else {
                VerificationSource::UserUpload
            };
            cmd_batch(&runtime, &images, source).await
        }
        Commands::Pending { limit } => {
            let runtime = Runtime::build().await?;
            let entries = runtime.gatekeeper.pending(limit).await?;
            print_json(&entries)
        }
    }
}

async fn cmd_enroll(runtime: &Runtime, path: &Path, metadata: ItemMetadata) -> anyhow::Result<()> {
    let image = read_image(path).await?;

    // Enroll the most confident subject; a reference image without a
    // detection is taken as already cropped.
    let subjects = runtime
        .services
        .detector
        .detect(&image)
        .await
        .context("detection failed")?;
    let crop = subjects
        .into_iter()
        .filter(|s| !s.crop.is_empty())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|s| s.crop)
        .unwrap_or(image);

    let index = runtime.engine.index();
    let mut item_id = None;
    for embedder in runtime.engine.embedders() {
        let model = embedder.model_name();
        let embedding = embedder
            .embed(&crop)
            .await
            .with_context(|| format!("model {} failed to embed the image", model))?;
        let id = index
            .store_image(&crop, model, embedding, metadata.clone())
            .await
            .with_context(|| format!("failed to store embedding for model {}", model))?;
        item_id = Some(id);
    }
    let Some(item_id) = item_id else {
        bail!("no re-identification models configured");
    };

    info!(item_id = %item_id, "Enrolled individual");
    print_json(&serde_json::json!({
        "item_id": item_id,
        "models": runtime.engine.embedders().iter().map(|e| e.model_name()).collect::<Vec<_>>(),
        "metadata": metadata,
    }))
}

async fn cmd_batch(
    runtime: &Runtime,
    images: &[PathBuf],
    source: VerificationSource,
) -> anyhow::Result<()> {
    let worker = InvestigationWorker::new(
        Arc::new(runtime.orchestrator()),
        WorkerConfig::from_env().with_enabled(true),
    );
    let handle = worker.start();

    let mut tickets = Vec::with_capacity(images.len());
    for path in images {
        let request = InvestigationRequest::new(read_image(path).await?).with_source(source);
        let ticket = handle
            .submit(request)
            .with_context(|| format!("failed to queue {}", path.display()))?;
        tickets.push((path, ticket));
    }

    let collect = async {
        let mut results = Vec::with_capacity(tickets.len());
        for (path, ticket) in tickets {
            let result = ticket.wait().await?;
            results.push(serde_json::json!({
                "image": path.display().to_string(),
                "result": result,
            }));
        }
        anyhow::Ok(results)
    };

    let results = tokio::select! {
        results = collect => results?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling queued investigations");
            handle.shutdown().await?;
            bail!("interrupted");
        }
    };
    handle.shutdown().await?;
    print_json(&results)
}

fn coordinates(lat: Option<f64>, lon: Option<f64>) -> anyhow::Result<Option<Coordinates>> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            let c = Coordinates::new(lat, lon);
            if !c.is_valid() {
                bail!("coordinates out of range: {}, {}", lat, lon);
            }
            Ok(Some(c))
        }
        _ => Ok(None),
    }
}

async fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(bytes)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
