use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::probe::Probe;
use crate::types::ScanResult;

/// TCP connect timing. One attempt per target, no retries.
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    pub port: u16,
    pub timeout: Duration,
}

impl LatencyProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

impl Probe for LatencyProbe {
    async fn probe(&self, ip: &str) -> ScanResult {
        let start = Instant::now();
        // The timeout also covers name resolution for non-literal targets.
        match time::timeout(self.timeout, TcpStream::connect((ip, self.port))).await {
            Ok(Ok(stream)) => {
                let ping_ms = start.elapsed().as_millis() as i64;
                drop(stream);
                tracing::debug!(%ip, port = self.port, ping_ms, "connect ok");
                ScanResult::latency_ok(ip, self.port, ping_ms)
            }
            Ok(Err(e)) => {
                tracing::debug!(%ip, port = self.port, error = %e, "connect failed");
                ScanResult::failed(ip, self.port, format!("connect {ip}:{}: {e}", self.port))
            }
            Err(_) => {
                tracing::debug!(%ip, port = self.port, "connect timed out");
                ScanResult::failed(
                    ip,
                    self.port,
                    format!(
                        "connect {ip}:{}: timed out after {}ms",
                        self.port,
                        self.timeout.as_millis()
                    ),
                )
            }
        }
    }
}
