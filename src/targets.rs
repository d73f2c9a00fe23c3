use anyhow::{Context, Result};
use ipnet::IpNet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use thiserror::Error;

use crate::types::Target;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid CIDR {input:?}: {source}")]
    InvalidCidr {
        input: String,
        #[source]
        source: ipnet::AddrParseError,
    },
}

/// Expand raw target lines into at most `cap` IP strings, preserving input order.
///
/// Each line may hold several newline-separated fragments. Fragments are trimmed
/// and blanks dropped. Fragments containing `/` are expanded as CIDR blocks (see
/// [`expand_cidr`]); anything else is passed through verbatim. Malformed CIDR
/// fragments are logged and skipped. Input past the cap is ignored.
pub fn expand_targets<S: AsRef<str>>(lines: &[S], cap: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    'lines: for line in lines {
        for fragment in line.as_ref().lines() {
            if out.len() >= cap {
                break 'lines;
            }
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            if fragment.contains('/') {
                match expand_cidr(fragment, cap - out.len()) {
                    Ok(ips) => out.extend(ips),
                    Err(e) => tracing::warn!(error = %e, "skipping target fragment"),
                }
            } else {
                out.push(fragment.to_string());
            }
        }
    }
    out.truncate(cap);
    out
}

/// Expand and number targets; `order` is the index in the capped sequence.
pub fn expand_to_targets<S: AsRef<str>>(lines: &[S], cap: usize) -> Vec<Target> {
    expand_targets(lines, cap)
        .into_iter()
        .enumerate()
        .map(|(order, ip)| Target { order, ip })
        .collect()
}

/// Enumerate the addresses of a CIDR block in ascending order, yielding at most `limit`.
///
/// Host bits in the input are masked off first (`10.0.0.5/30` is `10.0.0.4/30`).
/// Blocks with more than two addresses lose their first and last address
/// (network/broadcast); blocks of one or two addresses are returned whole.
pub fn expand_cidr(cidr: &str, limit: usize) -> Result<Vec<String>, TargetError> {
    let net: IpNet = cidr.parse().map_err(|source| TargetError::InvalidCidr {
        input: cidr.to_string(),
        source,
    })?;
    let range = AddrRange::from(net.trunc());
    Ok(range.usable().take(limit).map(|ip| ip.to_string()).collect())
}

/// Inclusive address block as plain integers, so stepping yields fresh values
/// instead of mutating a shared address buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AddrRange {
    first: u128,
    last: u128,
    v6: bool,
}

impl From<IpNet> for AddrRange {
    fn from(net: IpNet) -> Self {
        match net {
            IpNet::V4(n) => Self {
                first: u32::from(n.network()) as u128,
                last: u32::from(n.broadcast()) as u128,
                v6: false,
            },
            IpNet::V6(n) => Self {
                first: u128::from(n.network()),
                last: u128::from(n.broadcast()),
                v6: true,
            },
        }
    }
}

impl AddrRange {
    fn usable(self) -> impl Iterator<Item = IpAddr> {
        // More than two addresses means last - first >= 2.
        let (lo, hi) = if self.last - self.first >= 2 {
            (self.first + 1, self.last - 1)
        } else {
            (self.first, self.last)
        };
        (lo..=hi).map(move |n| self.addr(n))
    }

    fn addr(&self, n: u128) -> IpAddr {
        if self.v6 {
            IpAddr::V6(Ipv6Addr::from(n))
        } else {
            IpAddr::V4(Ipv4Addr::from(n as u32))
        }
    }
}

/// Parse a targets file: one IP or CIDR per line, `#` starts a comment.
pub fn parse_targets_str(s: &str) -> Vec<String> {
    s.lines()
        .map(|raw| raw.split('#').next().map(str::trim).unwrap_or(""))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load a targets file from disk.
pub fn load_targets_from_path(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read targets file: {}", path.as_ref().display()))?;
    Ok(parse_targets_str(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_30_drops_network_and_broadcast() {
        let ips = expand_cidr("192.168.1.0/30", usize::MAX).unwrap();
        assert_eq!(ips, vec!["192.168.1.1", "192.168.1.2"]);
    }

    #[test]
    fn tiny_blocks_are_kept_whole() {
        assert_eq!(
            expand_cidr("10.0.0.0/31", usize::MAX).unwrap(),
            vec!["10.0.0.0", "10.0.0.1"]
        );
        assert_eq!(expand_cidr("10.0.0.7/32", usize::MAX).unwrap(), vec!["10.0.0.7"]);
    }

    #[test]
    fn host_bits_are_masked() {
        let ips = expand_cidr("10.0.0.6/30", usize::MAX).unwrap();
        assert_eq!(ips, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn ipv6_block_uses_same_rule() {
        let ips = expand_cidr("2001:db8::/126", usize::MAX).unwrap();
        assert_eq!(ips, vec!["2001:db8::1", "2001:db8::2"]);
    }

    #[test]
    fn huge_block_is_bounded_by_limit() {
        let ips = expand_cidr("2001:db8::/32", 3).unwrap();
        assert_eq!(ips, vec!["2001:db8::1", "2001:db8::2", "2001:db8::3"]);
        let ips = expand_cidr("0.0.0.0/0", 2).unwrap();
        assert_eq!(ips, vec!["0.0.0.1", "0.0.0.2"]);
    }

    #[test]
    fn invalid_cidr_is_error() {
        assert!(expand_cidr("10.0.0.0/33", 10).is_err());
        assert!(expand_cidr("not-an-ip/24", 10).is_err());
    }

    #[test]
    fn multi_line_fragments_and_blanks() {
        let lines = vec!["  1.1.1.1 \n\n1.0.0.1\r\n".to_string(), "   ".to_string()];
        assert_eq!(expand_targets(&lines, 100), vec!["1.1.1.1", "1.0.0.1"]);
    }

    #[test]
    fn malformed_cidr_does_not_abort() {
        let lines = ["1.1.1.1", "300.0.0.0/24", "10.0.0.0/30"];
        assert_eq!(
            expand_targets(&lines, 100),
            vec!["1.1.1.1", "10.0.0.1", "10.0.0.2"]
        );
    }

    #[test]
    fn bare_fragments_are_not_validated() {
        let lines = ["example.invalid", "999.1.1.1"];
        assert_eq!(expand_targets(&lines, 10), vec!["example.invalid", "999.1.1.1"]);
    }

    #[test]
    fn parse_file_with_comments() {
        let input = r#"
            # cloudflare
            104.16.0.0/30  # edge
            1.1.1.1

        "#;
        assert_eq!(parse_targets_str(input), vec!["104.16.0.0/30", "1.1.1.1"]);
    }
}
