//! Synthetic ingest load generator: builds a registry, an ingest router,
//! and a handful of producer tasks posting randomized `TelemetryBatch`es at
//! a configurable rate, printing periodic acceptance/conflict counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use telemetry_core::{
    IngestRouter, IngestMetric, IngestSample, IngestValue, MetricRegistry, RegistryConfig,
    TelemetryBatch,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Generates synthetic telemetry batches against a telemetry-core registry")]
struct Args {
    /// Number of concurrent producer tasks, each simulating one service instance.
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Batches posted per producer per second.
    #[arg(long, default_value_t = 10)]
    batches_per_second: u64,

    /// How long to run before exiting.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let registry = Arc::new(MetricRegistry::new(RegistryConfig::default()));
    let (router, mut hints) = IngestRouter::new(Arc::clone(&registry));
    let router = Arc::new(router);

    // Drain update hints so the channel never backs up; a real deployment
    // would hand this receiver to the broadcast scheduler instead.
    tokio::spawn(async move { while hints.recv().await.is_some() {} });

    let accepted = Arc::new(AtomicU64::new(0));
    let conflicts = Arc::new(AtomicU64::new(0));

    let period = Duration::from_secs_f64(1.0 / args.batches_per_second as f64);
    let mut producer_handles = Vec::new();

    for producer_id in 0..args.producers {
        let router = Arc::clone(&router);
        let accepted = Arc::clone(&accepted);
        let conflicts = Arc::clone(&conflicts);

        producer_handles.push(tokio::spawn(async move {
            let service = format!("service-{producer_id}");
            let mut tick = tokio::time::interval(period);
            let mut rng = rand::thread_rng();

            loop {
                tick.tick().await;
                let batch = synthetic_batch(&service, &mut rng);
                let outcome = router.process_batch(&batch);
                accepted.fetch_add(outcome.samples_accepted, Ordering::Relaxed);
                conflicts.fetch_add(
                    outcome.variant_conflicts + outcome.histogram_shape_conflicts,
                    Ordering::Relaxed,
                );
            }
        }));
    }

    let report_accepted = Arc::clone(&accepted);
    let report_conflicts = Arc::clone(&conflicts);
    let reporter = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            info!(
                samples_accepted = report_accepted.load(Ordering::Relaxed),
                conflicts = report_conflicts.load(Ordering::Relaxed),
                "ingest progress"
            );
        }
    });

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;

    for handle in producer_handles {
        handle.abort();
    }
    reporter.abort();

    info!(
        services = registry.list_services().len(),
        total_accepted = accepted.load(Ordering::Relaxed),
        total_conflicts = conflicts.load(Ordering::Relaxed),
        "ingest generator finished"
    );
}

fn synthetic_batch(service: &str, rng: &mut impl Rng) -> TelemetryBatch {
    let now_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    TelemetryBatch {
        service: service.to_string(),
        instance: "instance-0".to_string(),
        metrics: vec![
            IngestMetric {
                name: "cpu_utilization".to_string(),
                labels: Default::default(),
                samples: vec![IngestSample {
                    timestamp_ns: now_ns,
                    value: IngestValue::Gauge(rng.gen_range(0.0..1.0)),
                }],
            },
            IngestMetric {
                name: "requests_total".to_string(),
                labels: Default::default(),
                samples: vec![IngestSample {
                    timestamp_ns: now_ns,
                    value: IngestValue::Counter(rng.gen_range(0..1000)),
                }],
            },
            IngestMetric {
                name: "request_latency_ms".to_string(),
                labels: Default::default(),
                samples: vec![IngestSample {
                    timestamp_ns: now_ns,
                    value: IngestValue::Histogram {
                        bounds: vec![5.0, 10.0, 50.0, 100.0, 500.0],
                        counts: vec![
                            rng.gen_range(0..10),
                            rng.gen_range(0..10),
                            rng.gen_range(0..10),
                            rng.gen_range(0..10),
                            rng.gen_range(0..10),
                        ],
                    },
                }],
            },
        ],
    }
}
