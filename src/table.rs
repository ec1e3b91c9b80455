//! Per-country CIDR range table with a longest-prefix index.
//!
//! A [`RangeTable`] is built once through [`RangeTableBuilder`] and never
//! mutated afterwards. Alongside the country → ranges mapping it keeps, per
//! address family, an index keyed by prefix length so that a lookup costs at
//! most one hash probe per distinct prefix length instead of a scan over
//! every range.

use ahash::AHashMap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// IP address family of a range list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Both families, IPv4 first.
    pub const ALL: [Family; 2] = [Family::V4, Family::V6];

    /// Name used in upstream URLs and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        }
    }

    /// Family of a network.
    pub fn of(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A range that matched a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMatch {
    /// Winning country code
    pub country: Arc<str>,
    /// Prefix length of the winning range
    pub prefix_len: u8,
}

/// Immutable mapping from country code to its IPv4 and IPv6 ranges.
///
/// Ranges of different countries may overlap. Lookups resolve overlaps by
/// preferring the longest prefix, then the lexicographically smallest
/// country code.
#[derive(Debug, Default)]
pub struct RangeTable {
    v4: AHashMap<Arc<str>, Vec<Ipv4Net>>,
    v6: AHashMap<Arc<str>, Vec<Ipv6Net>>,
    v4_index: PrefixIndex,
    v6_index: PrefixIndex,
}

impl RangeTable {
    /// Start building a new table.
    pub fn builder() -> RangeTableBuilder {
        RangeTableBuilder::new()
    }

    /// Find the country whose range contains `ip`.
    pub fn lookup(&self, ip: IpAddr) -> Option<RangeMatch> {
        match ip {
            IpAddr::V4(v4) => self.lookup_v4(v4),
            IpAddr::V6(v6) => self.lookup_v6(v6),
        }
    }

    /// Find the country whose IPv4 range contains `ip`.
    pub fn lookup_v4(&self, ip: Ipv4Addr) -> Option<RangeMatch> {
        self.v4_index.lookup(u128::from(u32::from(ip)))
    }

    /// Find the country whose IPv6 range contains `ip`.
    pub fn lookup_v6(&self, ip: Ipv6Addr) -> Option<RangeMatch> {
        self.v6_index.lookup(u128::from(ip))
    }

    /// IPv4 ranges of a country, in insertion order.
    pub fn v4_ranges(&self, country: &str) -> &[Ipv4Net] {
        self.v4.get(country).map(Vec::as_slice).unwrap_or_default()
    }

    /// IPv6 ranges of a country, in insertion order.
    pub fn v6_ranges(&self, country: &str) -> &[Ipv6Net] {
        self.v6.get(country).map(Vec::as_slice).unwrap_or_default()
    }

    /// IPv4 entries sorted by country code.
    pub fn v4_entries(&self) -> Vec<(&str, &[Ipv4Net])> {
        let mut entries: Vec<_> = self
            .v4
            .iter()
            .map(|(code, nets)| (code.as_ref(), nets.as_slice()))
            .collect();
        entries.sort_unstable_by_key(|(code, _)| *code);
        entries
    }

    /// IPv6 entries sorted by country code.
    pub fn v6_entries(&self) -> Vec<(&str, &[Ipv6Net])> {
        let mut entries: Vec<_> = self
            .v6
            .iter()
            .map(|(code, nets)| (code.as_ref(), nets.as_slice()))
            .collect();
        entries.sort_unstable_by_key(|(code, _)| *code);
        entries
    }

    /// Number of countries with at least one range of the given family.
    pub fn country_count(&self, family: Family) -> usize {
        match family {
            Family::V4 => self.v4.len(),
            Family::V6 => self.v6.len(),
        }
    }

    /// Total number of ranges of the given family.
    pub fn range_count(&self, family: Family) -> usize {
        match family {
            Family::V4 => self.v4.values().map(Vec::len).sum(),
            Family::V6 => self.v6.values().map(Vec::len).sum(),
        }
    }

    /// Check if the table holds no ranges at all.
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// Accumulates ranges per country and family, then freezes them into a
/// [`RangeTable`].
#[derive(Debug, Default)]
pub struct RangeTableBuilder {
    v4: AHashMap<Arc<str>, Vec<Ipv4Net>>,
    v6: AHashMap<Arc<str>, Vec<Ipv6Net>>,
}

impl RangeTableBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one range for a country.
    ///
    /// The range is truncated to its network address.
    pub fn add(&mut self, country: &str, net: IpNet) -> &mut Self {
        let country = intern(country);
        match net.trunc() {
            IpNet::V4(v4) => self.v4.entry(country).or_default().push(v4),
            IpNet::V6(v6) => self.v6.entry(country).or_default().push(v6),
        }
        self
    }

    /// Add many ranges for a country.
    ///
    /// An empty iterator leaves the country absent from the table.
    pub fn extend<I>(&mut self, country: &str, nets: I) -> &mut Self
    where
        I: IntoIterator<Item = IpNet>,
    {
        for net in nets {
            self.add(country, net);
        }
        self
    }

    /// Freeze the accumulated ranges and build the lookup index.
    pub fn build(self) -> RangeTable {
        let v4_index = PrefixIndex::build(
            32,
            self.v4.iter().flat_map(|(code, nets)| {
                nets.iter()
                    .map(move |n| (code, u128::from(u32::from(n.network())), n.prefix_len()))
            }),
        );
        let v6_index = PrefixIndex::build(
            128,
            self.v6.iter().flat_map(|(code, nets)| {
                nets.iter()
                    .map(move |n| (code, u128::from(n.network()), n.prefix_len()))
            }),
        );

        RangeTable {
            v4: self.v4,
            v6: self.v6,
            v4_index,
            v6_index,
        }
    }
}

fn intern(country: &str) -> Arc<str> {
    Arc::from(country.trim().to_ascii_lowercase())
}

/// Prefix length → (masked network → country codes).
#[derive(Debug, Default)]
struct PrefixIndex {
    width: u8,
    /// Longest prefix first; codes in each slot sorted and deduplicated
    buckets: Vec<(u8, AHashMap<u128, Vec<Arc<str>>>)>,
}

impl PrefixIndex {
    fn build<'a, I>(width: u8, entries: I) -> Self
    where
        I: Iterator<Item = (&'a Arc<str>, u128, u8)>,
    {
        let mut by_len: BTreeMap<u8, AHashMap<u128, Vec<Arc<str>>>> = BTreeMap::new();
        for (code, network, prefix_len) in entries {
            by_len
                .entry(prefix_len)
                .or_default()
                .entry(network)
                .or_default()
                .push(Arc::clone(code));
        }

        let buckets = by_len
            .into_iter()
            .rev()
            .map(|(len, mut slots)| {
                for codes in slots.values_mut() {
                    codes.sort_unstable();
                    codes.dedup();
                }
                (len, slots)
            })
            .collect();

        Self { width, buckets }
    }

    fn lookup(&self, addr: u128) -> Option<RangeMatch> {
        self.buckets.iter().find_map(|(len, slots)| {
            let codes = slots.get(&mask(addr, self.width, *len))?;
            codes.first().map(|code| RangeMatch {
                country: Arc::clone(code),
                prefix_len: *len,
            })
        })
    }
}

/// Clear the host bits of `addr` for a prefix of `prefix_len` out of `width`.
fn mask(addr: u128, width: u8, prefix_len: u8) -> u128 {
    let host_bits = u32::from(width.saturating_sub(prefix_len));
    if host_bits >= 128 {
        0
    } else {
        (addr >> host_bits) << host_bits
    }
}
