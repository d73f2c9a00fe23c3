use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use time::{format_description::well_known, OffsetDateTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use edge_scan_rs::config::{self, ScanConfig};
use edge_scan_rs::server::{self, OriginPolicy, ServerConfig};
use edge_scan_rs::types::{
    LatencyRequest, ProbeKind, ScanReport, ScanRequest, ScanResult, TargetSpec, ThroughputRequest,
    DONE_MARKER,
};
use edge_scan_rs::{scanner, sink, targets};

/// edge-scan-rs: bulk latency and throughput scanner for edge IP lists.
#[derive(Debug, Parser)]
#[command(
    name = "edge-scan-rs",
    version,
    about = "Bulk latency and throughput scanner for edge IP lists, with a WebSocket UI backend.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the UI and the /ws scan endpoint.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = server::DEFAULT_BIND)]
        bind: String,

        /// Directory with the static UI assets.
        #[arg(long = "static-dir", default_value = "static")]
        static_dir: PathBuf,

        /// Open the UI in the default browser once listening.
        #[arg(long, default_value_t = false)]
        open: bool,

        /// Extra allowed WebSocket origin (repeatable).
        #[arg(long = "allow-origin")]
        allow_origin: Vec<String>,

        /// Accept WebSocket upgrades from any origin.
        #[arg(long = "allow-any-origin", default_value_t = false)]
        allow_any_origin: bool,
    },

    /// Run a single scan and print the results.
    Scan {
        #[arg(long, value_enum, default_value_t = ProbeKind::Latency)]
        kind: ProbeKind,

        /// Comma-separated IPs/CIDRs, or path to a file with one per line.
        #[arg(long)]
        targets: String,

        #[arg(long, default_value_t = 443)]
        port: u16,

        /// Download URL for throughput scans.
        #[arg(long = "download-url")]
        download_url: Option<String>,

        /// Drop ok latency results slower than this (0 or less disables).
        #[arg(long = "max-latency-ms", allow_negative_numbers = true)]
        max_latency_ms: Option<i64>,

        /// Write results as pretty JSON to this path (optional).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct Tuning {
    /// Maximum number of expanded targets per request.
    #[arg(long = "target-cap", global = true, default_value_t = config::DEFAULT_TARGET_CAP)]
    target_cap: usize,

    /// Concurrent latency probes per request.
    #[arg(
        long = "latency-concurrency",
        global = true,
        default_value_t = config::DEFAULT_LATENCY_CONCURRENCY
    )]
    latency_concurrency: usize,

    /// Latency probe connect timeout in milliseconds.
    #[arg(long = "latency-timeout-ms", global = true, default_value_t = 2_000)]
    latency_timeout_ms: u64,

    /// Throughput probe body read window in milliseconds.
    #[arg(long = "read-window-ms", global = true, default_value_t = 5_000)]
    read_window_ms: u64,
}

impl Tuning {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            target_cap: self.target_cap,
            latency_concurrency: self.latency_concurrency,
            latency_timeout: Duration::from_millis(self.latency_timeout_ms),
            read_window: Duration::from_millis(self.read_window_ms),
            ..ScanConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let scan_config = cli.tuning.scan_config();

    match cli.command {
        Command::Serve {
            bind,
            static_dir,
            open,
            allow_origin,
            allow_any_origin,
        } => {
            let port = bind
                .rsplit(':')
                .next()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0);
            let origins = if allow_any_origin {
                OriginPolicy::Any
            } else {
                OriginPolicy::local(port).with_extra(allow_origin)
            };

            let shutdown = CancellationToken::new();
            let on_ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                on_ctrl_c.cancel();
            });

            if open {
                server::open_browser(&format!("http://localhost:{port}"));
            }
            println!("UI server starting at http://{} (Ctrl+C to stop)", bind);
            server::spawn_server(
                ServerConfig {
                    bind,
                    static_dir,
                    origins,
                    scan: scan_config,
                },
                shutdown,
            )
            .await?;
        }
        Command::Scan {
            kind,
            targets,
            port,
            download_url,
            max_latency_ms,
            output,
        } => {
            let raw_targets = read_targets_arg(&targets)?;
            let spec = TargetSpec {
                targets: raw_targets,
                port,
            };
            let request = match kind {
                ProbeKind::Latency => ScanRequest::Latency(LatencyRequest {
                    spec,
                    max_latency_ms,
                }),
                ProbeKind::Throughput => {
                    let Some(download_url) = download_url else {
                        bail!("--download-url is required for throughput scans");
                    };
                    ScanRequest::Throughput(ThroughputRequest { spec, download_url })
                }
            };

            let report = run_one_shot(request, &scan_config).await?;
            print_results_table(&report);
            if let Some(path) = output.as_deref() {
                if let Err(e) = write_report_json(path, &report) {
                    eprintln!("Failed to write JSON to {}: {}", path.display(), e);
                } else {
                    println!("Wrote JSON results to {}", path.display());
                }
            }
        }
    }

    Ok(())
}

/// A path to an existing file is read as a targets file; anything else is a comma list.
fn read_targets_arg(arg: &str) -> Result<Vec<String>> {
    let path = Path::new(arg);
    if path.is_file() {
        return targets::load_targets_from_path(path);
    }
    Ok(arg
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

async fn run_one_shot(request: ScanRequest, config: &ScanConfig) -> Result<ScanReport> {
    let kind = request.kind();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let collector = tokio::spawn(async move {
        let mut results: Vec<ScanResult> = Vec::new();
        while let Some(msg) = rx.recv().await {
            if msg == DONE_MARKER {
                break;
            }
            match serde_json::from_slice::<ScanResult>(&msg) {
                Ok(r) => results.push(r),
                Err(e) => tracing::warn!(error = %e, "unreadable scan message"),
            }
        }
        results
    });

    let started_at = now_rfc3339();
    let summary = scanner::run_scan(request, config, sink::shared(tx)).await;
    let mut results = collector.await.context("result collector failed")?;
    results.sort_by_key(|r| r.order);

    Ok(ScanReport {
        started_at,
        finished_at: now_rfc3339(),
        kind,
        expanded: summary.expanded,
        delivered: results.len(),
        results,
    })
}

fn print_results_table(report: &ScanReport) {
    let mut ip_w = "ip".len();
    for r in &report.results {
        ip_w = ip_w.max(r.ip.len());
    }
    let (metric, metric_w) = match report.kind {
        ProbeKind::Latency => ("latency_ms", 10),
        ProbeKind::Throughput => ("MB/s", 10),
    };

    println!(
        "\nResults: {} delivered (expanded: {})",
        report.delivered, report.expanded
    );
    println!(
        "{:>5}  {:<ip_w$}  {:>5}  {:>metric_w$}  {:<6}  {}",
        "order", "ip", "port", metric, "status", "error"
    );
    println!(
        "{:-<5}  {:-<ip_w$}  {:-<5}  {:-<metric_w$}  {:-<6}  {:-<5}",
        "", "", "", "", "", ""
    );
    for r in &report.results {
        let value = match report.kind {
            ProbeKind::Latency => r.ping_time_ms.to_string(),
            ProbeKind::Throughput => format!("{:.2}", r.download_mbps),
        };
        let mut err = r.error_msg.clone().unwrap_or_default();
        if err.len() > 60 {
            err = err.chars().take(60).collect();
        }
        println!(
            "{:>5}  {:<ip_w$}  {:>5}  {:>metric_w$}  {:<6}  {}",
            r.order, r.ip, r.port, value, r.status, err
        );
    }
}

fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
