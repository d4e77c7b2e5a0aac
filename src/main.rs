//! Command-line interface for guildstream
//!
//! # Usage Examples
//!
//! ## Topics
//! ```bash
//! # Create every category topic that does not exist yet
//! guildstream topics --brokers localhost:9092 --topic-partitions 3
//! ```
//!
//! ## Publish
//! ```bash
//! # Publish live events read as JSON lines from a file
//! guildstream publish --brokers localhost:9092 --input events.jsonl
//!
//! # ...or from stdin
//! tail -f gateway.jsonl | guildstream publish --brokers localhost:9092
//! ```
//!
//! ## Consume
//! ```bash
//! # Consume all categories and log each record until Ctrl-C / SIGTERM
//! RUST_LOG=info guildstream consume \
//!   --brokers localhost:9092 \
//!   --group-id discord-consumer-group \
//!   --session-timeout 30s --heartbeat-interval 3s
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use guildstream::handlers::TracingHandlers;
use guildstream::source::JsonlEventSource;
use guildstream::{BootstrapOpts, ConsumerOpts, KafkaOpts, ProducerOpts};
use guildstream_kafka_producer::{EmitOutcome, EventProducer, KafkaAppender};
use guildstream_kafka_source::{
    BatchConsumer, ConnectionManager, KafkaAdmin, KafkaSession, StopReason, TopicRouter,
};
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "guildstream")]
#[command(about = "Moves live guild events through Kafka into per-category handlers")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume records and dispatch them to the logging handlers
    Consume {
        #[command(flatten)]
        kafka: KafkaOpts,

        #[command(flatten)]
        bootstrap: BootstrapOpts,

        #[command(flatten)]
        consumer: ConsumerOpts,
    },

    /// Publish live events read as JSON lines
    Publish {
        #[command(flatten)]
        kafka: KafkaOpts,

        #[command(flatten)]
        bootstrap: BootstrapOpts,

        #[command(flatten)]
        producer: ProducerOpts,

        /// File of JSON-lines events (default: stdin)
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Create missing topics before publishing
        #[arg(long)]
        ensure_topics: bool,
    },

    /// Create any missing category topics and exit
    Topics {
        #[command(flatten)]
        kafka: KafkaOpts,

        #[command(flatten)]
        bootstrap: BootstrapOpts,
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
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume {
            kafka,
            bootstrap,
            consumer,
        } => run_consume(kafka, bootstrap, consumer).await,
        Commands::Publish {
            kafka,
            bootstrap,
            producer,
            input,
            ensure_topics,
        } => run_publish(kafka, bootstrap, producer, input, ensure_topics).await,
        Commands::Topics { kafka, bootstrap } => run_topics(kafka, bootstrap).await,
    }
}

fn connection_manager(
    kafka: &KafkaOpts,
    bootstrap: &BootstrapOpts,
) -> anyhow::Result<ConnectionManager<KafkaAdmin>> {
    let admin = KafkaAdmin::new(&kafka.brokers, &kafka.client_id, kafka.admin_timeout)
        .context("Failed to create Kafka admin client")?;
    Ok(ConnectionManager::new(
        admin,
        bootstrap.retry_policy(),
        bootstrap.provisioning(),
    ))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        token.cancel();
    });
}

async fn run_consume(
    kafka: KafkaOpts,
    bootstrap: BootstrapOpts,
    opts: ConsumerOpts,
) -> anyhow::Result<()> {
    let registry = kafka.topic_registry();
    let topics = registry.consumed_topics();
    info!("Starting consumer for topics {:?}", topics);

    let connections = connection_manager(&kafka, &bootstrap)?;
    connections
        .ensure_topics(&topics)
        .await
        .context("Failed to provision topics")?;

    let config = opts.consumer_config(&kafka, topics);
    let consumer = BatchConsumer::new(
        TopicRouter::new(TracingHandlers::new()),
        registry,
        opts.batch_settings(),
    );
    cancel_on_signal(consumer.shutdown_token());

    let reason = consumer
        .start(&connections, |_| KafkaSession::connect(&config))
        .await
        .context("Failed to start consumer")?;

    info!(
        "Handled {} records",
        consumer.router().handlers().handled()
    );
    match reason {
        StopReason::Requested => Ok(()),
        StopReason::SessionLost => anyhow::bail!("Consumer group membership was lost"),
    }
}

async fn run_publish(
    kafka: KafkaOpts,
    bootstrap: BootstrapOpts,
    opts: ProducerOpts,
    input: Option<PathBuf>,
    ensure_topics: bool,
) -> anyhow::Result<()> {
    let registry = kafka.topic_registry();
    if ensure_topics {
        connection_manager(&kafka, &bootstrap)?
            .ensure_topics(&registry.all_topics())
            .await
            .context("Failed to provision topics")?;
    }

    let appender = KafkaAppender::new(&opts.producer_config(&kafka))
        .context("Failed to create Kafka producer")?;
    let producer = EventProducer::new(appender, registry);

    let (skipped, malformed) = match input {
        Some(path) => {
            info!("Publishing events from {:?}", path);
            let mut source = JsonlEventSource::open(&path).await?;
            let skipped = publish_all(&producer, &mut source).await?;
            (skipped, source.malformed())
        }
        None => {
            info!("Publishing events from stdin");
            let mut source = JsonlEventSource::stdin();
            let skipped = publish_all(&producer, &mut source).await?;
            (skipped, source.malformed())
        }
    };

    producer
        .appender()
        .flush(opts.flush_timeout)
        .context("Failed to flush producer")?;

    info!(
        "Published {} records ({} failed, {} skipped, {} malformed lines)",
        producer.published_count(),
        producer.failed_count(),
        skipped,
        malformed
    );
    Ok(())
}

/// Emit every event of `source`. Returns how many were filtered out.
async fn publish_all<R: AsyncRead + Unpin>(
    producer: &EventProducer<KafkaAppender>,
    source: &mut JsonlEventSource<R>,
) -> anyhow::Result<u64> {
    let mut skipped = 0;
    while let Some(event) = source.next_event().await? {
        if let EmitOutcome::Skipped(_) = producer.emit(event, chrono::Utc::now()).await {
            skipped += 1;
        }
    }
    Ok(skipped)
}

async fn run_topics(kafka: KafkaOpts, bootstrap: BootstrapOpts) -> anyhow::Result<()> {
    let topics = kafka.topic_registry().all_topics();
    let created = connection_manager(&kafka, &bootstrap)?
        .ensure_topics(&topics)
        .await
        .context("Failed to provision topics")?;

    if created.is_empty() {
        info!("All {} topics already exist", topics.len());
    } else {
        info!("Created {} topics: {:?}", created.len(), created);
    }
    Ok(())
}
