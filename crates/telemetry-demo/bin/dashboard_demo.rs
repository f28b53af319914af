//! End-to-end dashboard demo: wires the registry, ingest router,
//! subscription broker, and broadcast scheduler together, feeds in a
//! handful of synthetic batches, registers two subscribers (one
//! unfiltered, one scoped to a single metric), and prints every delivered
//! snapshot to stdout.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use telemetry_core::{
    BroadcastScheduler, BrokerConfig, Error, IngestMetric, IngestRouter, IngestSample,
    IngestValue, MetricKey, MetricRegistry, RegistryConfig, SchedulerConfig, SubscriptionBroker,
    TelemetryBatch,
};
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Runs the telemetry-core pipeline end to end and prints delivered snapshots")]
struct Args {
    /// Broadcast cadence in Hz.
    #[arg(long, default_value_t = telemetry_core::scheduler::DEFAULT_TICK_HZ)]
    tick_hz: u32,

    /// How long to run before shutting down.
    #[arg(long, default_value_t = 2)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let registry = Arc::new(MetricRegistry::new(RegistryConfig::default()));
    let broker = Arc::new(SubscriptionBroker::new(BrokerConfig::default()));
    let (router, mut hints) = IngestRouter::new(Arc::clone(&registry));
    tokio::spawn(async move { while hints.recv().await.is_some() {} });

    router.process_batch(&TelemetryBatch {
        service: "checkout".to_string(),
        instance: "i0".to_string(),
        metrics: vec![
            IngestMetric {
                name: "cpu_utilization".to_string(),
                labels: Default::default(),
                samples: vec![IngestSample { timestamp_ns: 1, value: IngestValue::Gauge(0.42) }],
            },
            IngestMetric {
                name: "requests_total".to_string(),
                labels: Default::default(),
                samples: vec![IngestSample { timestamp_ns: 1, value: IngestValue::Counter(128) }],
            },
        ],
    });

    let (_dashboard_id, mut dashboard_rx) = broker.register(Vec::new())?;
    let (_focused_id, mut focused_rx) =
        broker.register(vec![MetricKey::new("checkout", "cpu_utilization")])?;

    let scheduler = Arc::new(BroadcastScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        SchedulerConfig { tick_hz: args.tick_hz },
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = dashboard_rx.recv() => print_snapshot("dashboard", &msg),
                Some(msg) = focused_rx.recv() => print_snapshot("cpu-only ", &msg),
                else => break,
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;

    let _ = shutdown_tx.send(());
    let _ = scheduler_task.await;
    printer.abort();
    broker.shutdown();

    info!("dashboard demo finished");
    Ok(())
}

/// Re-parses the outbound payload and pretty-prints it so the demo reads as
/// a structured snapshot rather than a wire-format one-liner. A payload that
/// fails to parse (this crate produced it, so it shouldn't) is printed raw
/// rather than dropped.
fn print_snapshot(label: &str, raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "[{label}] {}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(_) => println!("[{label}] {raw}"),
    }
}
