//! CLI for the spool ingestion pipeline.
//!
//! Provides commands for validating configuration, soak-testing the batch
//! writer, and searching a shared metadata cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use prometheus::Registry;
use spool::indexer::{CacheIndexer, IndexingRepository, SampleRepository};
use spool::{
    AsyncBatchWriter, Context, KeyScheme, RedisKeyValueStore, Resource,
    ResourceMetadataCache, Sample, SharedResourceMetadataCache, SpoolConfig,
};
use tracing_subscriber::EnvFilter;

/// spool - Non-blocking batch writer and resource metadata cache CLI.
#[derive(Parser)]
#[command(name = "spool", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file, then print the effective configuration.
    Validate {
        /// Path to a JSON configuration file.
        config: PathBuf,
    },

    /// Publish synthetic load through a writer and report its metrics.
    Soak {
        /// Optional JSON configuration; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of producer threads.
        #[arg(long, default_value = "4")]
        producers: usize,

        /// Batches published by each producer.
        #[arg(long, default_value = "10000")]
        batches: u64,

        /// Samples per batch.
        #[arg(long, default_value = "16")]
        batch_size: usize,

        /// Number of distinct resources the samples are spread over.
        #[arg(long, default_value = "1000")]
        resources: u64,

        /// Simulated repository latency per chunk, in microseconds.
        #[arg(long, default_value = "0")]
        latency_us: u64,

        /// Output format for the final report.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the resources under a prefix in a Redis-backed shared cache.
    Search {
        /// Redis host.
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Redis port.
        #[arg(long, default_value = "6379")]
        port: u16,

        /// Context the resources live in.
        #[arg(long, default_value = spool::sample::DEFAULT_CONTEXT_ID)]
        context: String,

        /// Resource id prefix, e.g. "snmp:1".
        prefix: String,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for reports.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON document.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Soak {
            config,
            producers,
            batches,
            batch_size,
            resources,
            latency_us,
            format,
        } => cmd_soak(
            config.as_deref(),
            &SoakLoad {
                producers,
                batches,
                batch_size,
                resources,
                latency: Duration::from_micros(latency_us),
            },
            &format,
        ),
        Commands::Search {
            host,
            port,
            context,
            prefix,
            format,
        } => cmd_search(&host, port, &context, &prefix, &format),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `spool validate <config>`.
fn cmd_validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = SpoolConfig::from_json_file(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Shape of the synthetic load generated by `soak`.
struct SoakLoad {
    producers: usize,
    batches: u64,
    batch_size: usize,
    resources: u64,
    latency: Duration,
}

/// Repository that only sleeps, standing in for a slow sample store.
struct LatencyRepository {
    latency: Duration,
    inserted: AtomicU64,
}

impl SampleRepository for LatencyRepository {
    fn insert(&self, samples: &[Sample]) -> spool::Result<()> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.inserted.fetch_add(samples.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Implements `spool soak`.
#[allow(clippy::cast_precision_loss)] // Throughput figures are display-only
fn cmd_soak(
    config_path: Option<&Path>,
    load: &SoakLoad,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if load.producers == 0 || load.batch_size == 0 || load.resources == 0 {
        return Err("producers, batch-size and resources must be positive".into());
    }

    let config = match config_path {
        Some(path) => SpoolConfig::from_json_file(path)?,
        None => SpoolConfig::default(),
    };
    config.validate()?;

    let registry = Registry::new();
    let cache = spool::cache::from_config(&config.cache, config.writer.writer_threads, &registry)?;
    let store = Arc::new(LatencyRepository {
        latency: load.latency,
        inserted: AtomicU64::new(0),
    });
    let repository = IndexingRepository::new(Arc::clone(&store), CacheIndexer::new(Arc::clone(&cache)));
    let writer = Arc::new(AsyncBatchWriter::new(
        &config.writer,
        Arc::new(repository),
        Arc::new(CacheIndexer::new(Arc::clone(&cache))),
        &registry,
    )?);

    tracing::info!(
        producers = load.producers,
        batches = load.batches,
        batch_size = load.batch_size,
        "starting soak run"
    );

    let start_line = Arc::new(Barrier::new(load.producers));
    let start = Instant::now();
    let handles: Vec<_> = (0..load.producers)
        .map(|producer| {
            let writer = Arc::clone(&writer);
            let start_line = Arc::clone(&start_line);
            let (batches, batch_size, resources) = (load.batches, load.batch_size, load.resources);
            thread::spawn(move || {
                start_line.wait();
                let mut accepted = 0u64;
                for batch in 0..batches {
                    let node = (producer as u64 * batches + batch) % resources;
                    let resource = Resource::new(format!("soak:node{node}:if{}", batch % 4));
                    let samples = (0..batch_size)
                        .map(|i| Sample::new(batch, resource.clone(), format!("metric{i}"), i as f64))
                        .collect();
                    if writer.insert(samples).is_accepted() {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect();

    let mut accepted = 0u64;
    for handle in handles {
        accepted += handle.join().map_err(|_| "producer thread panicked")?;
    }
    let published_in = start.elapsed();
    writer.drain_and_halt();
    let drained_in = start.elapsed();

    let published = load.batches * load.producers as u64;
    let samples_per_sec = store.inserted.load(Ordering::Relaxed) as f64 / drained_in.as_secs_f64();
    let snapshot = spool::metrics::snapshot(&registry);

    match format {
        OutputFormat::Text => {
            println!("Soak run:");
            println!("  Batches published: {published}");
            println!("  Batches accepted: {accepted}");
            println!("  Samples written: {}", store.inserted.load(Ordering::Relaxed));
            println!("  Publish time: {published_in:.3?}");
            println!("  Drain time: {drained_in:.3?}");
            println!("  Throughput: {samples_per_sec:.0} samples/sec");
            println!();
            println!("Metrics:");
            for (name, value) in &snapshot {
                println!("  {name}: {value}");
            }
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "batches_published": published,
                "batches_accepted": accepted,
                "samples_written": store.inserted.load(Ordering::Relaxed),
                "publish_secs": published_in.as_secs_f64(),
                "drain_secs": drained_in.as_secs_f64(),
                "metrics": snapshot,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Implements `spool search <prefix>`.
fn cmd_search(
    host: &str,
    port: u16,
    context: &str,
    prefix: &str,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = RedisKeyValueStore::connect(host, port, 1)?;
    let cache = SharedResourceMetadataCache::new(Arc::new(store), KeyScheme::default(), &Registry::new())?;
    let context = Context::new(context);

    let ids = cache.resource_ids_with_prefix(&context, prefix)?;

    match format {
        OutputFormat::Text => {
            for id in &ids {
                let metadata = cache.get(&context, &Resource::new(id.as_str()))?;
                match metadata {
                    Some(md) => {
                        let metrics: Vec<&str> = md.metrics().iter().map(String::as_str).collect();
                        println!("{id}  [{}]", metrics.join(", "));
                    }
                    None => println!("{id}  (no metadata)"),
                }
            }
            println!();
            println!("{} resources under '{prefix}' in context '{context}'", ids.len());
        }
        OutputFormat::Json => {
            let mut entries = Vec::with_capacity(ids.len());
            for id in &ids {
                let metadata = cache.get(&context, &Resource::new(id.as_str()))?;
                entries.push(serde_json::json!({ "id": id, "metadata": metadata }));
            }
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}
