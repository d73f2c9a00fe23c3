use edge_scan_rs::config::DEFAULT_TARGET_CAP;
use edge_scan_rs::targets::{expand_cidr, expand_targets, expand_to_targets};
use std::net::Ipv4Addr;

#[test]
fn slash_30_expands_to_two_hosts() {
    let ips = expand_targets(&["203.0.113.0/30"], DEFAULT_TARGET_CAP);
    assert_eq!(ips, vec!["203.0.113.1", "203.0.113.2"]);
}

#[test]
fn bare_ip_is_kept() {
    let ips = expand_targets(&["203.0.113.5"], DEFAULT_TARGET_CAP);
    assert_eq!(ips, vec!["203.0.113.5"]);
}

#[test]
fn blocks_larger_than_two_lose_both_edges() {
    for prefix in 22..=30u8 {
        let cidr = format!("198.51.100.0/{prefix}");
        let size = 1usize << (32 - prefix);
        let ips = expand_cidr(&cidr, usize::MAX).unwrap();
        assert_eq!(ips.len(), size - 2, "{cidr}");

        let first: Ipv4Addr = ips.first().unwrap().parse().unwrap();
        let last: Ipv4Addr = ips.last().unwrap().parse().unwrap();
        let base = u32::from(Ipv4Addr::new(198, 51, 100, 0));
        assert_eq!(u32::from(first), base + 1);
        assert_eq!(u32::from(last), base + size as u32 - 2);
    }
}

#[test]
fn ascending_and_contiguous() {
    let ips = expand_cidr("10.9.0.0/26", usize::MAX).unwrap();
    let nums: Vec<u32> = ips
        .iter()
        .map(|s| u32::from(s.parse::<Ipv4Addr>().unwrap()))
        .collect();
    assert!(nums.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn cap_truncates_in_input_order() {
    // Two /16 blocks give well over 10,000 addresses.
    let lines = ["1.1.1.1", "10.0.0.0/16", "10.1.0.0/16"];
    let ips = expand_targets(&lines, DEFAULT_TARGET_CAP);
    assert_eq!(ips.len(), DEFAULT_TARGET_CAP);
    assert_eq!(ips[0], "1.1.1.1");
    assert_eq!(ips[1], "10.0.0.1");
    let last = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + 9_999);
    assert_eq!(ips[DEFAULT_TARGET_CAP - 1], last.to_string());
    assert!(!ips.iter().any(|ip| ip.starts_with("10.1.")));
}

#[test]
fn cap_applies_to_bare_ips_too() {
    let lines: Vec<String> = (0..50).map(|i| format!("192.0.2.{i}")).collect();
    let ips = expand_targets(&lines, 7);
    assert_eq!(ips, lines[..7].to_vec());
}

#[test]
fn orders_are_dense_indices() {
    let lines = ["192.0.2.0/29\n192.0.2.100", "bogus/99", "192.0.2.200"];
    let targets = expand_to_targets(&lines, DEFAULT_TARGET_CAP);
    assert_eq!(targets.len(), 6 + 1 + 1);
    for (i, t) in targets.iter().enumerate() {
        assert_eq!(t.order, i);
    }
    assert_eq!(targets[6].ip, "192.0.2.100");
    assert_eq!(targets[7].ip, "192.0.2.200");
}
