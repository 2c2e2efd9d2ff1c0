//! Order Processor Binary
//!
//! Runs the execution engine, worker pool and message consumers against
//! in-memory collaborators seeded from the `simulation` config section.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin order-processor
//! ```
//!
//! # Environment Variables
//!
//! - `ORDER_PROCESSOR_CONFIG`: config file path (default: config.yaml)
//! - `RUST_LOG`: log filter, overrides `observability.logging.level`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use order_processor::application::execution::ExecutionEngine;
use order_processor::application::ports::MessageHandler;
use order_processor::application::use_cases::{
    AuditTrailHandler, ExecuteOrderUseCase, OrderCreatedHandler, OrderDispatcher,
    PlaceOrderUseCase,
};
use order_processor::application::worker_pool::WorkerPool;
use order_processor::config::{Config, load_config_or_default};
use order_processor::domain::order::{CreateOrderCommand, OrderEventKind, OrderSide};
use order_processor::domain::shared::{Symbol, UserId};
use order_processor::infrastructure::messaging::{
    InMemoryBroker, MessageConsumer, MessagePublisher, Topology,
};
use order_processor::infrastructure::persistence::InMemoryOrderRepository;
use order_processor::infrastructure::simulated::{
    SimulatedBalanceLedger, SimulatedPortfolio, SimulatedPriceFeed, SimulatedUserDirectory,
};
use order_processor::observability::{init_metrics, init_tracing};
use rust_decimal_macros::dec;
use tokio::signal;
use tokio_util::sync::CancellationToken;

type Engine = ExecutionEngine<
    SimulatedUserDirectory,
    SimulatedBalanceLedger,
    SimulatedPriceFeed,
    SimulatedPortfolio,
>;
type Publisher = MessagePublisher<InMemoryBroker>;
type Executor = ExecuteOrderUseCase<InMemoryOrderRepository, Engine, Publisher>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = load_config_or_default().context("loading configuration")?;
    init_tracing(&config.observability.logging).context("initialising tracing")?;
    if config.observability.metrics.enabled {
        init_metrics(&config.observability.metrics).context("starting metrics exporter")?;
        tracing::info!(
            listen_addr = %config.observability.metrics.listen_addr,
            "Prometheus exporter listening"
        );
    }

    tracing::info!(
        workers = config.worker_pool.workers,
        queue_size = config.worker_pool.queue_size,
        events_exchange = %config.messaging.events_exchange,
        "Starting order processor"
    );

    // Consumers stop first; the pool drains under `shutdown`, cancelled last.
    let shutdown = CancellationToken::new();
    let consumers_shutdown = CancellationToken::new();
    let broker = InMemoryBroker::new();
    let repository = Arc::new(InMemoryOrderRepository::new());

    let publisher = Arc::new(
        MessagePublisher::new(Arc::new(broker.clone()), config.messaging.clone())
            .with_shutdown(&shutdown),
    );
    publisher
        .declare_topology()
        .await
        .context("declaring exchanges")?;

    let engine = Arc::new(create_engine(&config));
    let executor: Arc<Executor> = Arc::new(ExecuteOrderUseCase::new(
        Arc::clone(&repository),
        Arc::clone(&engine),
        Arc::clone(&publisher),
    ));

    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&executor),
        config.worker_pool.clone(),
    ));
    pool.start(&shutdown).context("starting worker pool")?;

    let dispatcher = Arc::new(OrderDispatcher::new(Arc::clone(&pool), Arc::clone(&executor)));
    let audit = Arc::new(AuditTrailHandler::new(Arc::clone(&repository)));

    let mut consumer = MessageConsumer::new(broker.clone(), config.messaging.clone());
    consumer.register(
        OrderEventKind::Created,
        Arc::new(OrderCreatedHandler::new(Arc::clone(&repository), dispatcher)),
    );
    for kind in [
        OrderEventKind::Executed,
        OrderEventKind::Cancelled,
        OrderEventKind::Failed,
    ] {
        consumer.register(kind, Arc::clone(&audit) as Arc<dyn MessageHandler>);
    }

    // Queues must exist before seeded orders are published.
    let topology = Topology::new(config.messaging.clone());
    for kind in OrderEventKind::ALL {
        topology
            .declare_queue(&broker, kind)
            .await
            .context("declaring consumer queues")?;
    }

    let consumer_task = {
        let shutdown = consumers_shutdown.clone();
        tokio::spawn(async move { consumer.start(&shutdown).await })
    };

    let monitor_task = {
        let shutdown = shutdown.clone();
        let pool = Arc::clone(&pool);
        let publisher = Arc::clone(&publisher);
        let interval = config.worker_pool.metrics_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = publisher.publish_metrics(&pool.metrics()).await {
                            tracing::warn!(error = %e, "Failed to publish pool metrics");
                        }
                    }
                }
            }
        })
    };

    seed_orders(&config, &PlaceOrderUseCase::new(Arc::clone(&repository), publisher)).await;

    tracing::info!("Order processor ready");
    shutdown_signal().await;

    consumers_shutdown.cancel();
    match consumer_task.await {
        Ok(Ok(())) => tracing::info!("Consumers stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer exited with error"),
        Err(e) => tracing::error!(error = %e, "Consumer task panicked"),
    }
    if let Err(e) = pool.stop().await {
        tracing::warn!(error = %e, "Worker pool stop");
    }
    engine.drain_background_tasks().await;

    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "Metrics publisher panicked");
    }

    let metrics = pool.metrics();
    tracing::info!(
        processed = metrics.processed,
        succeeded = metrics.succeeded,
        failed = metrics.failed,
        audited = audit.entries().len(),
        "Order processor stopped"
    );
    Ok(())
}

fn create_engine(config: &Config) -> Engine {
    let simulation = &config.simulation;
    let latency = (simulation.latency_ms > 0).then(|| Duration::from_millis(simulation.latency_ms));

    let users = SimulatedUserDirectory::from_config(simulation);
    let balances = SimulatedBalanceLedger::from_config(simulation);
    let prices = SimulatedPriceFeed::from_config(simulation);
    let portfolio = SimulatedPortfolio::new();
    users.set_latency(latency);
    balances.set_latency(latency);
    prices.set_latency(latency);
    portfolio.set_latency(latency);

    ExecutionEngine::new(
        Arc::new(users),
        Arc::new(balances),
        Arc::new(prices),
        Arc::new(portfolio),
        config.execution.clone(),
    )
}

/// Place `simulation.seed_orders` small market orders across the seeded
/// users and symbols.
async fn seed_orders(
    config: &Config,
    place: &PlaceOrderUseCase<InMemoryOrderRepository, Publisher>,
) {
    let users = &config.simulation.users;
    let symbols: Vec<&String> = config.simulation.prices.keys().collect();
    if users.is_empty() || symbols.is_empty() {
        return;
    }

    for i in 0..config.simulation.seed_orders {
        let side = if i % 3 == 2 { OrderSide::Sell } else { OrderSide::Buy };
        let cmd = CreateOrderCommand::market(
            UserId::new(users[i % users.len()].id.as_str()),
            Symbol::new(symbols[i % symbols.len()].as_str()),
            side,
            dec!(0.01),
        );
        if let Err(e) = place.place(cmd).await {
            tracing::warn!(error = %e, "Seed order rejected");
        }
    }
    tracing::info!(count = config.simulation.seed_orders, "Seed orders placed");
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
