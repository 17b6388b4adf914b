//! IP/CIDR normalization and aggregation.
//!
//! Candidates are located inside arbitrary rule lines (`IP-CIDR,1.2.3.0/24,no-resolve`,
//! `- '10.0.0.1'`, ...), parsed non-strictly, split by address family and
//! collapsed into the minimal set of disjoint CIDR blocks.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

static RULE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:ip-?cidr6?|ip6|ip)\s*[:,]?\s*").expect("ip rule prefix regex")
});

static NETWORK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?:\d{1,3}\.){3}\d{1,3}(?:/\d{1,3})?
        |
        (?:[0-9A-Fa-f]{0,4}:){2,7}(?:\d{1,3}(?:\.\d{1,3}){3}|[0-9A-Fa-f]{1,4})?(?:/\d{1,3})?
        ",
    )
    .expect("network regex")
});

/// Locate and parse the first network in `candidate`.
///
/// Host bits are masked away (`192.168.1.5/24` becomes `192.168.1.0/24`) and a
/// bare address becomes a host route. `/0` networks are returned as-is;
/// [`NetworkCollection`] is where they are dropped.
pub fn parse_network(candidate: &str) -> Option<IpNet> {
    let trimmed = candidate.trim();
    let rest = RULE_PREFIX
        .find(trimmed)
        .map_or(trimmed, |m| &trimmed[m.end()..]);
    let literal = NETWORK
        .find_iter(rest)
        .find(|m| is_whole_literal(rest, m.start(), m.end()))?
        .as_str();

    let net = if literal.contains('/') {
        literal.parse::<IpNet>().ok()?
    } else {
        IpNet::from(literal.parse::<IpAddr>().ok()?)
    };
    Some(net.trunc())
}

/// A match is only taken when it is not a slice of a longer address-like
/// token, so `10.0.0.1000` is rejected instead of read as `10.0.0.100`.
/// An IPv4 literal may be followed by `:port`.
fn is_whole_literal(text: &str, start: usize, end: usize) -> bool {
    let literal = &text[start..end];
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();

    if before.is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':')) {
        return false;
    }
    match after {
        None => true,
        Some(c) if c.is_ascii_alphanumeric() || matches!(c, '.' | '/') => false,
        Some(':') => !literal.contains(':'),
        Some(_) => true,
    }
}

/// Networks gathered from candidate lines, split by family.
#[derive(Debug, Clone, Default)]
pub struct NetworkCollection {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
    /// `/0` networks seen and dropped.
    pub default_routes: usize,
    /// Candidates with no parsable network.
    pub invalid: usize,
    /// First candidate counted in `invalid`, for error reporting.
    pub first_invalid: Option<String>,
}

impl NetworkCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one candidate line. Returns `true` if it contributed a network.
    pub fn insert(&mut self, candidate: &str) -> bool {
        match parse_network(candidate) {
            Some(net) if net.prefix_len() == 0 => {
                self.default_routes += 1;
                false
            }
            Some(IpNet::V4(net)) => {
                self.v4.push(net);
                true
            }
            Some(IpNet::V6(net)) => {
                self.v6.push(net);
                true
            }
            None => {
                self.invalid += 1;
                if self.first_invalid.is_none() {
                    self.first_invalid = Some(candidate.to_string());
                }
                false
            }
        }
    }

    /// Number of accepted (pre-collapse) networks.
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Minimal disjoint covering set: IPv4 first, then IPv6, each ascending.
    ///
    /// Two halves that merge into a whole address family stay as the two
    /// `/1` halves: a collapsed set never contains a `/0`.
    pub fn collapse(&self) -> Vec<IpNet> {
        let mut result: Vec<IpNet> = Ipv4Net::aggregate(&self.v4)
            .into_iter()
            .map(IpNet::V4)
            .chain(Ipv6Net::aggregate(&self.v6).into_iter().map(IpNet::V6))
            .flat_map(split_default_route)
            .collect();
        result.sort();
        result
    }
}

fn split_default_route(net: IpNet) -> Vec<IpNet> {
    if net.prefix_len() > 0 {
        return vec![net];
    }
    net.subnets(1)
        .map(|halves| halves.collect())
        .unwrap_or_else(|_| vec![net])
}

impl<S: AsRef<str>> FromIterator<S> for NetworkCollection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut collection = NetworkCollection::new();
        for candidate in iter {
            collection.insert(candidate.as_ref());
        }
        collection
    }
}

/// Parse and collapse a batch of candidates in one go.
pub fn collapse_networks<I, S>(candidates: I) -> Vec<IpNet>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates.into_iter().collect::<NetworkCollection>().collapse()
}

/// Calculate the total number of individual addresses covered by a list of CIDRs.
///
/// Uses saturating arithmetic to prevent overflow on large IPv6 prefixes.
pub fn count_ips(nets: &[IpNet]) -> u128 {
    nets.iter()
        .map(|net| {
            let shift = net.max_prefix_len() - net.prefix_len();
            // 1 << 128 would overflow u128
            if shift >= 128 {
                u128::MAX
            } else {
                1u128 << shift
            }
        })
        .fold(0u128, |acc, count| acc.saturating_add(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nets(list: &[&str]) -> Vec<IpNet> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_collapse_contiguous() {
        let collapsed = collapse_networks(["192.168.0.0/24", "192.168.1.0/24"]);
        assert_eq!(collapsed, nets(&["192.168.0.0/23"]));
    }

    #[test]
    fn test_collapse_unaligned_neighbours_stay_split() {
        let collapsed = collapse_networks(["192.168.1.0/24", "192.168.2.0/24"]);
        assert_eq!(collapsed, nets(&["192.168.1.0/24", "192.168.2.0/24"]));
    }

    #[test]
    fn test_collapse_overlapping() {
        let collapsed = collapse_networks(["10.0.0.0/8", "10.1.2.0/24", "10.1.2.3"]);
        assert_eq!(collapsed, nets(&["10.0.0.0/8"]));
    }

    #[test]
    fn test_collapse_non_contiguous() {
        let collapsed = collapse_networks(["192.168.0.0/24", "10.0.0.0/8"]);
        assert_eq!(collapsed, nets(&["10.0.0.0/8", "192.168.0.0/24"]));
    }

    #[test]
    fn test_default_route_dropped() {
        let collection: NetworkCollection = ["10.0.0.0/0"].into_iter().collect();
        assert!(collection.collapse().is_empty());
        assert_eq!(collection.default_routes, 1);
        assert_eq!(collection.invalid, 0);

        let collapsed = collapse_networks(["::/0", "2001:db8::/32"]);
        assert_eq!(collapsed, nets(&["2001:db8::/32"]));
    }

    #[test]
    fn test_halves_never_merge_into_default_route() {
        let collapsed = collapse_networks(["0.0.0.0/2", "64.0.0.0/2", "128.0.0.0/1"]);
        assert_eq!(collapsed, nets(&["0.0.0.0/1", "128.0.0.0/1"]));

        let collapsed = collapse_networks(["::/1", "8000::/1"]);
        assert_eq!(collapsed, nets(&["::/1", "8000::/1"]));
    }

    #[test]
    fn test_host_bits_masked() {
        assert_eq!(parse_network("192.168.1.5/24"), Some("192.168.1.0/24".parse().unwrap()));
        assert_eq!(parse_network("2001:db8::1/32"), Some("2001:db8::/32".parse().unwrap()));
    }

    #[test]
    fn test_bare_addresses_become_host_routes() {
        assert_eq!(parse_network("8.8.8.8"), Some("8.8.8.8/32".parse().unwrap()));
        assert_eq!(parse_network("::1"), Some("::1/128".parse().unwrap()));
    }

    #[test]
    fn test_rule_syntax_tolerated() {
        assert_eq!(
            parse_network("IP-CIDR,1.1.1.0/24,no-resolve"),
            Some("1.1.1.0/24".parse().unwrap())
        );
        assert_eq!(
            parse_network("IP-CIDR6,2606:4700::/32,no-resolve"),
            Some("2606:4700::/32".parse().unwrap())
        );
        assert_eq!(parse_network("ip6:2001:db8::/48"), Some("2001:db8::/48".parse().unwrap()));
        assert_eq!(parse_network("1.2.3.4:8080"), Some("1.2.3.4/32".parse().unwrap()));
    }

    #[test]
    fn test_partial_literals_rejected() {
        assert_eq!(parse_network("10.0.0.1000"), None);
        assert_eq!(parse_network("1234.1.1.1"), None);
        assert_eq!(parse_network("2001:db8::12345"), None);
        assert_eq!(parse_network("1.2.3.4.5"), None);
        assert_eq!(parse_network("10.0.0.0/2444"), None);
        assert_eq!(parse_network("1:2:3:4:5:6:7:8:9"), None);
        assert!(collapse_networks(["10.0.0.1000"]).is_empty());

        assert_eq!(parse_network("- '10.0.0.1'"), Some("10.0.0.1/32".parse().unwrap()));
        assert_eq!(parse_network("10.0.0.0/8,no-resolve"), Some("10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn test_ipv4_mapped_ipv6() {
        assert_eq!(
            parse_network("::ffff:1.2.3.4"),
            Some("::ffff:1.2.3.4/128".parse().unwrap())
        );
    }

    #[test]
    fn test_invalid_entries_dropped() {
        let collection: NetworkCollection =
            ["example.com", "300.1.1.1", "10.0.0.0/33", "10.0.0.0/8"].into_iter().collect();
        assert_eq!(collection.collapse(), nets(&["10.0.0.0/8"]));
        assert_eq!(collection.invalid, 3);
        assert_eq!(collection.first_invalid.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_ipv4_before_ipv6() {
        let collapsed = collapse_networks(["2001:db8::/32", "192.0.2.0/24", "::1", "10.0.0.1"]);
        assert_eq!(
            collapsed,
            nets(&["10.0.0.1/32", "192.0.2.0/24", "::1/128", "2001:db8::/32"])
        );
    }

    #[test]
    fn test_collapse_empty() {
        assert!(collapse_networks(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_count_ips() {
        let list = nets(&["192.168.0.0/24", "10.0.0.0/8"]);
        assert_eq!(count_ips(&list), 256 + 16_777_216);
    }

    #[test]
    fn test_count_ips_overflow_protection() {
        let list = nets(&["0.0.0.0/0"]);
        assert_eq!(count_ips(&list), 1u128 << 32);

        let list = nets(&["::/0", "::/1"]);
        assert_eq!(count_ips(&list), u128::MAX);
    }
}
