//! Command-line interface for kafka-reconcile
//!
//! # Usage Examples
//!
//! ```bash
//! # Converge topics and schemas
//! kafka-reconcile reconcile --file desired.yaml \
//!   --bootstrap-servers localhost:9092 \
//!   --registry-url http://localhost:8081
//!
//! # Dry run, reading registry state from the _schemas topic
//! kafka-reconcile reconcile --file desired.yaml --dry-run --use-cache
//!
//! # Tail a topic until Ctrl-C
//! kafka-reconcile view --topic orders
//!
//! # Copy the first 1000 records of a topic
//! kafka-reconcile replicate --from orders --to orders-backup --max-records 1000
//! ```
//!
//! Reconciliation results are printed to stdout as JSON. The process exits
//! non-zero when any resource failed.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kafka_reconcile::{reconcile, ClusterOpts, DesiredState, KafkaAdmin, RegistryAccess};
use kafka_reconcile_consumer::{
    random_group_id, Bound, ConsumptionEngine, KafkaSessionFactory, KafkaSink, Replicator, Viewer,
};
use schema_registry::{RegistryReader, RestRegistry, SchemaRegistryCache};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "kafka-reconcile")]
#[command(about = "Declarative reconciliation of Kafka topics and schema registry subjects")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge live topics and schemas to a desired-state file
    Reconcile {
        /// Desired-state YAML file
        #[arg(long, value_name = "PATH")]
        file: PathBuf,

        /// Validate changes without applying them
        #[arg(long)]
        dry_run: bool,

        /// Read registry state from its change-log topic instead of REST
        #[arg(long)]
        use_cache: bool,

        #[command(flatten)]
        cluster: ClusterOpts,
    },

    /// Print records of a topic
    View {
        #[arg(long)]
        topic: String,

        /// Stop after this many records
        #[arg(long, conflicts_with = "end_offset")]
        max_records: Option<u64>,

        /// Stop once a record at this offset was printed
        #[arg(long)]
        end_offset: Option<i64>,

        #[command(flatten)]
        cluster: ClusterOpts,
    },

    /// Copy records from one topic to another
    Replicate {
        /// Source topic
        #[arg(long)]
        from: String,

        /// Target topic
        #[arg(long)]
        to: String,

        /// Stop after this many records
        #[arg(long)]
        max_records: Option<u64>,

        #[command(flatten)]
        cluster: ClusterOpts,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cancel = interrupt_token();

    match cli.command {
        Commands::Reconcile {
            file,
            dry_run,
            use_cache,
            cluster,
        } => run_reconcile(file, dry_run, use_cache, cluster, cancel).await,
        Commands::View {
            topic,
            max_records,
            end_offset,
            cluster,
        } => {
            let bound = match (max_records, end_offset) {
                (Some(n), _) => Bound::MaxRecords(n),
                (None, Some(offset)) => Bound::EndOffset(offset),
                (None, None) => Bound::Unbounded,
            };
            run_view(topic, bound, cluster, cancel).await
        }
        Commands::Replicate {
            from,
            to,
            max_records,
            cluster,
        } => {
            let bound = max_records.map_or(Bound::Unbounded, Bound::MaxRecords);
            run_replicate(from, to, bound, cluster, cancel).await
        }
    }
}

/// Cancelled on Ctrl-C, so running engines leave their group cleanly.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            token.cancel();
        }
    });
    cancel
}

fn engine(cluster: &ClusterOpts) -> anyhow::Result<ConsumptionEngine> {
    let factory = KafkaSessionFactory::new(cluster.consumer_config()?);
    Ok(ConsumptionEngine::new(Arc::new(factory)))
}

async fn run_reconcile(
    file: PathBuf,
    dry_run: bool,
    use_cache: bool,
    cluster: ClusterOpts,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let desired = DesiredState::from_file(&file)
        .and_then(DesiredState::into_topic_map)
        .with_context(|| format!("Failed to load desired state from {file:?}"))?;
    tracing::info!("Loaded {} desired topics from {file:?}", desired.len());

    let timeout = cluster.timeout()?;
    let admin = KafkaAdmin::new(&cluster.bootstrap_servers, &cluster.properties()?, timeout)?;

    let rest = cluster
        .registry_url
        .as_deref()
        .map(|url| RestRegistry::new(url, timeout))
        .transpose()
        .context("Failed to create schema registry client")?;

    let cache = match (&rest, use_cache) {
        (Some(_), true) => Some(
            SchemaRegistryCache::bootstrap(&engine(&cluster)?, &cluster.registry_topic, cancel)
                .await
                .with_context(|| {
                    format!("Failed to read registry topic {}", cluster.registry_topic)
                })?,
        ),
        (None, true) => anyhow::bail!("--use-cache requires --registry-url for writes"),
        _ => None,
    };

    let registry = rest.as_ref().map(|rest| RegistryAccess {
        reader: match &cache {
            Some(cache) => &**cache as &dyn RegistryReader,
            None => rest,
        },
        writer: rest,
    });

    let report = reconcile(&desired, &admin, registry, dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.has_failures() {
        anyhow::bail!("{} resources failed to reconcile", report.summary.failed);
    }
    Ok(())
}

async fn run_view(
    topic: String,
    bound: Bound,
    cluster: ClusterOpts,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let viewer = Arc::new(Viewer::new(std::io::stdout()));
    let summary = engine(&cluster)?
        .run(
            &random_group_id("kafka-reconcile-view"),
            &[topic.clone()],
            viewer,
            bound,
            cancel,
        )
        .await
        .with_context(|| format!("Failed to read topic {topic}"))?;

    tracing::info!(
        "Viewed {} records of {topic} ({:?})",
        summary.records,
        summary.stop_reason
    );
    Ok(())
}

async fn run_replicate(
    from: String,
    to: String,
    bound: Bound,
    cluster: ClusterOpts,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let sink = KafkaSink::new(&cluster.bootstrap_servers, &cluster.properties()?)?;
    let replicator = Arc::new(Replicator::new(sink, to.clone()));

    let summary = engine(&cluster)?
        .run(
            &random_group_id("kafka-reconcile-replicate"),
            &[from.clone()],
            replicator.clone(),
            bound,
            cancel,
        )
        .await
        .with_context(|| format!("Failed to replicate {from} to {to}"))?;

    tracing::info!(
        "Replicated {} of {} records from {from} to {to} ({:?})",
        replicator.replicated(),
        summary.records,
        summary.stop_reason
    );
    Ok(())
}
