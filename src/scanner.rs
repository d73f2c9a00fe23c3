use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ScanConfig;
use crate::latency::LatencyProbe;
use crate::pool::BoundedPool;
use crate::probe::Probe;
use crate::sink::{deliver_logged, ResultSink, SharedSink};
use crate::targets::expand_to_targets;
use crate::throughput::ThroughputProbe;
use crate::types::{ScanRequest, ScanResult, ScanSummary, Target, DONE_MARKER};

/// Run one scan request to completion, streaming results into `sink`.
///
/// - Expands the request targets (capped at `config.target_cap`).
/// - Probes them through a [`BoundedPool`] sized per probe kind.
/// - Delivers each result as one JSON message as soon as it completes, in completion order.
/// - After every task has finished, delivers [`DONE_MARKER`] exactly once.
///
/// Probe and sink failures never abort the scan.
pub async fn run_scan<S: ResultSink>(
    request: ScanRequest,
    config: &ScanConfig,
    sink: SharedSink<S>,
) -> ScanSummary {
    let kind = request.kind();
    let spec = request.spec();
    let port = spec.port;
    let targets = expand_to_targets(&spec.targets, config.target_cap);
    tracing::info!(%kind, port, targets = targets.len(), "scan started");

    let summary = match &request {
        ScanRequest::Latency(r) => {
            let probe = LatencyProbe::new(port, config.latency_timeout);
            scan_with_probe(
                targets,
                probe,
                config.latency_concurrency,
                r.latency_filter(),
                sink,
            )
            .await
        }
        ScanRequest::Throughput(r) => {
            let probe = ThroughputProbe::new(port, r.download_url.as_str(), config);
            scan_with_probe(targets, probe, config.throughput_concurrency, None, sink).await
        }
    };

    tracing::info!(
        %kind,
        expanded = summary.expanded,
        delivered = summary.delivered,
        suppressed = summary.suppressed,
        delivery_failures = summary.delivery_failures,
        lost = summary.lost,
        "scan finished"
    );
    summary
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicUsize,
    suppressed: AtomicUsize,
    delivery_failures: AtomicUsize,
}

/// Fan `targets` out over `probe` with at most `concurrency` probes in flight.
///
/// With `max_latency_ms` set, `ok` results slower than the limit are counted
/// but not delivered.
pub async fn scan_with_probe<P: Probe, S: ResultSink>(
    targets: Vec<Target>,
    probe: P,
    concurrency: usize,
    max_latency_ms: Option<u64>,
    sink: SharedSink<S>,
) -> ScanSummary {
    let expanded = targets.len();
    let probe = Arc::new(probe);
    let counters = Arc::new(Counters::default());
    let mut pool = BoundedPool::new(concurrency);

    for target in targets {
        let probe = probe.clone();
        let sink = sink.clone();
        let counters = counters.clone();
        let spawned = pool
            .spawn(async move {
                let result = probe.as_ref().probe(&target.ip).await.with_order(target.order);
                if exceeds_limit(&result, max_latency_ms) {
                    counters.suppressed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                let delivered = match serde_json::to_vec(&result) {
                    Ok(message) => deliver_logged(&sink, message).await,
                    Err(e) => {
                        tracing::warn!(order = result.order, error = %e, "failed to encode result");
                        false
                    }
                };
                if delivered {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;
        if let Err(e) = spawned {
            tracing::error!(error = %e, "worker pool closed, dispatch stopped");
            break;
        }
    }

    let report = pool.join_all().await;

    if !deliver_logged(&sink, DONE_MARKER.to_vec()).await {
        counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    ScanSummary {
        expanded,
        delivered: counters.delivered.load(Ordering::Relaxed),
        suppressed: counters.suppressed.load(Ordering::Relaxed),
        delivery_failures: counters.delivery_failures.load(Ordering::Relaxed),
        lost: report.panicked,
    }
}

fn exceeds_limit(result: &ScanResult, max_latency_ms: Option<u64>) -> bool {
    match max_latency_ms {
        Some(limit) => {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            result.is_ok() && result.ping_time_ms > limit
        }
        None => false,
    }
}
