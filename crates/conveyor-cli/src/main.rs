mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conveyor_core::config::{RetryConfig, SubscriberConfig};
use conveyor_core::ports::SystemClock;
use conveyor_core::{BusBuilder, BusConfig, InMemoryStore, Message, QueueIdentity, SendOptions};

use crate::demo::{
    CloseFulfilment, NotifyCustomer, OpenFulfilment, OrderPlaced, OrderReserved, OrderShipped,
    ReserveStock,
};

/// Runs the conveyor demo: an order queue, a fulfilment saga and a
/// notification subscriber on the in-memory store.
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(version)]
struct Cli {
    /// JSON bus configuration. Defaults suit the demo.
    #[arg(short, long, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,

    /// Orders to place.
    #[arg(short = 'n', long, default_value = "5")]
    orders: u32,

    /// Attempts the stock handler refuses before it starts succeeding.
    #[arg(long, default_value = "2")]
    fail_first: u32,

    /// Keep serving until ctrl-c instead of exiting once drained.
    #[arg(long)]
    serve: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BusConfig> {
    let Some(path) = path else {
        return Ok(BusConfig::default()
            .with_queue("orders")
            .with_tick_interval(Duration::from_millis(50))
            .with_retry(RetryConfig {
                base_delay_ms: 200,
                ..RetryConfig::default()
            })
            .with_subscriber(SubscriberConfig {
                id: "notifier".into(),
                topics: vec![OrderReserved::KIND.into()],
                ..SubscriberConfig::default()
            }));
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    BusConfig::from_json_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let store = InMemoryStore::new(Arc::new(SystemClock));
    let bus = BusBuilder::new(Arc::new(store.clone()))
        .with_config(config)
        .register::<OrderPlaced, _>(ReserveStock::new(cli.fail_first))?
        .register_saga::<OrderPlaced, _>(OpenFulfilment)?
        .register_saga::<OrderShipped, _>(CloseFulfilment)?
        .register::<OrderReserved, _>(NotifyCustomer)?
        .forward_failures_to("orders.failed")
        .expect_kinds(&[OrderPlaced::KIND, OrderShipped::KIND, OrderReserved::KIND])
        .build()?;

    bus.renew_subscriptions().await?;
    let queue_name = bus.config().queue.clone().unwrap_or_else(|| "orders".into());
    for order in 1..=cli.orders {
        let placed = OrderPlaced {
            order,
            customer: format!("customer-{order}"),
        };
        bus.send(&placed, &queue_name, SendOptions::default()).await?;
    }
    info!(orders = cli.orders, queue = %queue_name, "orders placed");

    let mut watched = vec![QueueIdentity::queue(queue_name)];
    if let Some(subscriber) = bus.subscriber_id() {
        watched.push(QueueIdentity::subscriber(subscriber));
    }

    if cli.serve {
        let handle = bus.scheduler().start();
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        info!("shutdown requested");
        handle.shutdown_and_join().await;
    } else {
        // retried messages are invisible to the estimator until due
        let scheduler = bus.scheduler();
        while watched.iter().any(|q| !store.counts(q).is_drained()) {
            scheduler.run_until_idle().await;
            tokio::time::sleep(bus.config().tick_interval()).await;
        }
    }

    for queue in &watched {
        let counts = store.counts(queue);
        info!(
            %queue,
            pending = counts.pending,
            completed = counts.completed,
            failed = counts.failed,
            "final counts"
        );
    }
    let failed = store.counts(&QueueIdentity::queue("orders.failed"));
    if failed.total() > 0 {
        warn!(notices = failed.total(), "messages were forwarded to orders.failed");
    }
    let stats = serde_json::to_string(&store.stats())?;
    info!(%stats, "store statistics");
    Ok(())
}
