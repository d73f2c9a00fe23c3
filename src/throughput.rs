use futures_util::TryStreamExt;
use reqwest::header::{HeaderValue, HOST};
use reqwest::Url;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::{self, Instant};
use tokio_util::io::StreamReader;

use crate::config::ScanConfig;
use crate::probe::{error_chain, Probe};
use crate::types::ScanResult;

/// Elapsed-time floor, keeps very fast failures from producing huge rates.
const MIN_ELAPSED_SECS: f64 = 0.1;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("invalid download URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("could not resolve target {target}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no address found for target {0}")]
    NoAddress(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Forced-address HTTP download timing.
///
/// The request keeps the download URL's hostname (Host header and TLS SNI) but the
/// TCP connection goes to the probed `ip:port`. Each probe builds its own client
/// with pooling disabled so no connection outlives a single measurement.
#[derive(Debug, Clone)]
pub struct ThroughputProbe {
    pub port: u16,
    pub download_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub read_window: Duration,
    pub chunk_size: usize,
}

impl ThroughputProbe {
    pub fn new(port: u16, download_url: impl Into<String>, config: &ScanConfig) -> Self {
        Self {
            port,
            download_url: download_url.into(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            read_window: config.read_window,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Returns total body bytes read within the read window.
    async fn download(&self, ip: &str) -> Result<u64, ThroughputError> {
        let addr = resolve_target(ip, self.port).await?;
        let resp = self.forced_request(addr)?.send().await?;
        tracing::debug!(%ip, status = %resp.status(), "download started");

        let body = resp.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(body);
        tokio::pin!(reader);

        let deadline = Instant::now() + self.read_window;
        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;
        loop {
            match time::timeout_at(deadline, reader.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => total += n as u64,
                Ok(Err(e)) => {
                    // A broken body still counts what arrived.
                    tracing::debug!(%ip, error = %e, total, "body read ended early");
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(total)
    }

    /// Build a one-shot GET for `download_url` whose connection lands on `addr`.
    ///
    /// Only the dial target moves. The request keeps the URL's own authority in
    /// its `Host` header, and a hostname URL keeps its name for TLS.
    fn forced_request(&self, addr: SocketAddr) -> Result<reqwest::RequestBuilder, ThroughputError> {
        let invalid = |reason: &str| ThroughputError::InvalidUrl {
            url: self.download_url.clone(),
            reason: reason.to_string(),
        };
        let url = Url::parse(&self.download_url).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("URL has no host"))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host_header = HeaderValue::from_str(&authority).map_err(|e| invalid(&e.to_string()))?;

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        // The connector dials the URL's port, so the dial URL carries the target port.
        let mut dial = url.clone();
        dial.set_port(Some(addr.port()))
            .map_err(|_| invalid("URL cannot carry a port"))?;
        if host.parse::<IpAddr>().is_err() && !host.starts_with('[') {
            builder = builder.resolve(host, addr);
        } else {
            dial.set_ip_host(addr.ip())
                .map_err(|_| invalid("URL cannot carry a host"))?;
        }

        let client = builder.build()?;
        Ok(client.get(dial).header(HOST, host_header))
    }
}

impl Probe for ThroughputProbe {
    async fn probe(&self, ip: &str) -> ScanResult {
        let start = Instant::now();
        match self.download(ip).await {
            Ok(total) => {
                let elapsed = start.elapsed().as_secs_f64().max(MIN_ELAPSED_SECS);
                let mbps = total as f64 / BYTES_PER_MB / elapsed;
                tracing::debug!(%ip, port = self.port, total, elapsed, mbps, "download finished");
                ScanResult::throughput_ok(ip, self.port, mbps)
            }
            Err(e) => {
                tracing::debug!(%ip, port = self.port, error = %e, "download failed");
                ScanResult::failed(ip, self.port, error_chain(&e))
            }
        }
    }
}

/// Turn a target string into a socket address. IP literals are used as-is,
/// anything else goes through the system resolver.
async fn resolve_target(ip: &str, port: u16) -> Result<SocketAddr, ThroughputError> {
    if let Ok(addr) = ip.parse::<IpAddr>() {
        return Ok(SocketAddr::new(addr, port));
    }
    tokio::net::lookup_host((ip, port))
        .await
        .map_err(|source| ThroughputError::Resolve {
            target: ip.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| ThroughputError::NoAddress(ip.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_for(url: &str) -> ThroughputProbe {
        ThroughputProbe::new(8443, url, &ScanConfig::default())
    }

    fn built(url: &str, addr: &str) -> reqwest::Request {
        let addr: SocketAddr = addr.parse().unwrap();
        probe_for(url).forced_request(addr).unwrap().build().unwrap()
    }

    fn host_of(req: &reqwest::Request) -> &str {
        req.headers()[HOST].to_str().unwrap()
    }

    #[test]
    fn hostname_url_dials_target_port_with_original_host() {
        let req = built("https://speed.example.com/100mb", "203.0.113.5:8443");
        assert_eq!(req.url().host_str(), Some("speed.example.com"));
        assert_eq!(req.url().port(), Some(8443));
        assert_eq!(req.url().path(), "/100mb");
        assert_eq!(host_of(&req), "speed.example.com");
    }

    #[test]
    fn explicit_url_port_stays_in_host_header() {
        let req = built("http://speed.example.com:8080/file", "203.0.113.5:9000");
        assert_eq!(req.url().port(), Some(9000));
        assert_eq!(host_of(&req), "speed.example.com:8080");
    }

    #[test]
    fn ip_literal_url_keeps_its_host_header() {
        let req = built("http://198.51.100.1/file", "203.0.113.5:8443");
        assert_eq!(req.url().host_str(), Some("203.0.113.5"));
        assert_eq!(host_of(&req), "198.51.100.1");

        let req = built("http://[2001:db8::7]:81/file", "203.0.113.5:8443");
        assert_eq!(host_of(&req), "[2001:db8::7]:81");
    }

    #[test]
    fn default_port_is_normalised() {
        let req = built("https://speed.example.com:443/", "203.0.113.5:443");
        assert_eq!(req.url().port_or_known_default(), Some(443));
        assert_eq!(host_of(&req), "speed.example.com");
    }

    #[test]
    fn bad_url_is_reported() {
        let addr: SocketAddr = "203.0.113.5:443".parse().unwrap();
        let err = probe_for("not a url").forced_request(addr).unwrap_err();
        assert!(matches!(err, ThroughputError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn literal_targets_skip_resolution() {
        let addr = resolve_target("2001:db8::1", 443).await.unwrap();
        assert_eq!(addr, "[2001:db8::1]:443".parse::<SocketAddr>().unwrap());
    }
}
