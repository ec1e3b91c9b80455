//! IP → country resolution over an atomically swapped range table.

use arc_swap::ArcSwapOption;
use ipnet::IpNet;
use once_cell::sync::Lazy;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};
use crate::table::{Family, RangeTable};

/// Age after which a published table no longer counts as fresh.
///
/// Independent of the refresh period.
pub const FRESHNESS_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Ranges that are never looked up.
static NON_GLOBAL_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "0.0.0.0/8",       // "This" network
        "10.0.0.0/8",      // Private
        "100.64.0.0/10",   // Shared address space
        "127.0.0.0/8",     // Loopback
        "169.254.0.0/16",  // Link-local
        "172.16.0.0/12",   // Private
        "192.0.0.0/24",    // IETF protocol assignments
        "192.0.2.0/24",    // Documentation
        "192.168.0.0/16",  // Private
        "198.18.0.0/15",   // Benchmarking
        "198.51.100.0/24", // Documentation
        "203.0.113.0/24",  // Documentation
        "224.0.0.0/4",     // Multicast
        "240.0.0.0/4",     // Reserved + broadcast
        "::/128",          // Unspecified
        "::1/128",         // Loopback
        "fc00::/7",        // Unique local
        "fe80::/10",       // Link-local
        "ff00::/8",        // Multicast
        "2001:db8::/32",   // Documentation
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect()
});

/// Outcome of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A published range contains the address
    Resolved(Arc<str>),
    /// Private, loopback or otherwise non-globally-routable address
    Rejected,
    /// No table has been published or restored yet
    NotReady,
    /// Table present, no range contains the address
    NotFound,
}

impl Resolution {
    /// Country code when resolved.
    pub fn country(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(code) => Some(code.as_ref()),
            _ => None,
        }
    }

    /// Whether a country was found.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    /// Short label for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Resolved(_) => "resolved",
            Resolution::Rejected => "rejected",
            Resolution::NotReady => "not_ready",
            Resolution::NotFound => "not_found",
        }
    }
}

/// A published table together with the time it was refreshed.
///
/// Existence of a state is what makes the resolver ready.
#[derive(Debug)]
pub struct ResolutionState {
    pub table: RangeTable,
    pub refreshed_at: SystemTime,
}

impl ResolutionState {
    /// Wrap a table refreshed right now.
    pub fn now(table: RangeTable) -> Self {
        Self {
            table,
            refreshed_at: SystemTime::now(),
        }
    }

    /// Whether the state is younger than [`FRESHNESS_THRESHOLD`].
    pub fn is_fresh(&self) -> bool {
        match self.refreshed_at.elapsed() {
            Ok(age) => age < FRESHNESS_THRESHOLD,
            // Timestamp in the future (clock moved backwards)
            Err(_) => true,
        }
    }
}

/// Query surface shared by the refresher and all connection handlers.
///
/// Queries load the current state with a single atomic pointer read and run
/// entirely against that snapshot; a concurrent [`Resolver::publish`] never
/// affects a query already in progress.
#[derive(Debug, Default)]
pub struct Resolver {
    state: ArcSwapOption<ResolutionState>,
}

impl Resolver {
    /// Create a resolver with nothing published.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an address to a country code.
    pub fn query(&self, ip: IpAddr) -> Resolution {
        let ip = canonical(ip);
        if is_non_global(ip) {
            return Resolution::Rejected;
        }

        let guard = self.state.load();
        match &*guard {
            None => Resolution::NotReady,
            Some(state) => match state.table.lookup(ip) {
                Some(hit) => Resolution::Resolved(hit.country),
                None => Resolution::NotFound,
            },
        }
    }

    /// Parse and resolve an address given as text.
    pub fn query_str(&self, ip: &str) -> Result<Resolution> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| Error::InvalidIpAddress(ip.to_string()))?;
        Ok(self.query(ip))
    }

    /// Replace the served table with `table`, stamped with the current time.
    ///
    /// Returns the newly published state.
    pub fn publish(&self, table: RangeTable) -> Arc<ResolutionState> {
        let state = Arc::new(ResolutionState::now(table));
        self.state.store(Some(Arc::clone(&state)));
        log::info!(
            "Published range table: {} IPv4 countries, {} IPv6 countries",
            state.table.country_count(Family::V4),
            state.table.country_count(Family::V6),
        );
        state
    }

    /// Install a previously persisted state, keeping its timestamp.
    pub fn restore(&self, state: ResolutionState) {
        self.state.store(Some(Arc::new(state)));
    }

    /// Current state, if any.
    pub fn state(&self) -> Option<Arc<ResolutionState>> {
        self.state.load_full()
    }

    /// Whether a table has ever been published or restored.
    pub fn is_ready(&self) -> bool {
        self.state.load().is_some()
    }

    /// Whether the last publish happened within [`FRESHNESS_THRESHOLD`].
    pub fn is_fresh(&self) -> bool {
        self.state
            .load_full()
            .map(|state| state.is_fresh())
            .unwrap_or(false)
    }

    /// Time of the last successful refresh.
    pub fn refreshed_at(&self) -> Option<SystemTime> {
        self.state.load_full().map(|state| state.refreshed_at)
    }
}

/// Unwrap IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`).
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}

/// Check if an address is private, loopback or otherwise not globally routable.
pub fn is_non_global(ip: IpAddr) -> bool {
    let ip = canonical(ip);
    NON_GLOBAL_NETS.iter().any(|net| net.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> RangeTable {
        let mut builder = RangeTable::builder();
        for (code, cidr) in entries {
            builder.add(code, cidr.parse().unwrap());
        }
        builder.build()
    }

    fn query(resolver: &Resolver, ip: &str) -> Resolution {
        resolver.query(ip.parse().unwrap())
    }

    #[test]
    fn test_not_ready_before_publish() {
        let resolver = Resolver::new();
        assert!(!resolver.is_ready());
        assert!(!resolver.is_fresh());
        assert!(resolver.refreshed_at().is_none());
        assert_eq!(query(&resolver, "1.1.1.1"), Resolution::NotReady);
        assert_eq!(query(&resolver, "2606:4700::1111"), Resolution::NotReady);
    }

    #[test]
    fn test_resolved_after_publish() {
        let resolver = Resolver::new();
        resolver.publish(table(&[("us", "1.1.1.0/24"), ("jp", "2001:200::/23")]));

        assert!(resolver.is_ready());
        assert!(resolver.is_fresh());
        assert_eq!(query(&resolver, "1.1.1.1"), Resolution::Resolved("us".into()));
        assert_eq!(query(&resolver, "2001:200::5"), Resolution::Resolved("jp".into()));
        assert_eq!(query(&resolver, "9.9.9.9"), Resolution::NotFound);
    }

    #[test]
    fn test_non_global_rejected_regardless_of_state() {
        let resolver = Resolver::new();
        let private = [
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.10.10",
            "100.64.0.1",
            "0.0.0.0",
            "255.255.255.255",
            "::1",
            "::",
            "fd00::1",
            "fe80::1",
            "::ffff:192.168.1.1",
        ];

        for ip in private {
            assert_eq!(query(&resolver, ip), Resolution::Rejected, "{ip}");
        }

        // A published range covering private space does not change that
        resolver.publish(table(&[("zz", "0.0.0.0/0"), ("zz", "::/0")]));
        for ip in private {
            assert_eq!(query(&resolver, ip), Resolution::Rejected, "{ip}");
        }
    }

    #[test]
    fn test_ipv4_mapped_uses_ipv4_table() {
        let resolver = Resolver::new();
        resolver.publish(table(&[("us", "1.1.1.0/24")]));
        assert_eq!(
            query(&resolver, "::ffff:1.1.1.1"),
            Resolution::Resolved("us".into())
        );
    }

    #[test]
    fn test_longest_prefix_tie_break() {
        let resolver = Resolver::new();
        resolver.publish(table(&[("aa", "1.1.1.0/24"), ("bb", "1.1.1.0/28")]));
        assert_eq!(query(&resolver, "1.1.1.1"), Resolution::Resolved("bb".into()));
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let resolver = Resolver::new();
        resolver.publish(table(&[("us", "23.0.0.0/12"), ("ca", "23.0.0.0/12")]));
        assert_eq!(query(&resolver, "23.1.2.3"), Resolution::Resolved("ca".into()));
    }

    #[test]
    fn test_query_str() {
        let resolver = Resolver::new();
        resolver.publish(table(&[("us", "1.1.1.0/24")]));

        assert_eq!(
            resolver.query_str(" 1.1.1.9 ").unwrap(),
            Resolution::Resolved("us".into())
        );
        assert!(matches!(
            resolver.query_str("not-an-ip"),
            Err(Error::InvalidIpAddress(_))
        ));
        assert!(matches!(
            resolver.query_str("1.1.1.0/24"),
            Err(Error::InvalidIpAddress(_))
        ));
    }

    #[test]
    fn test_in_flight_state_survives_publish() {
        let resolver = Resolver::new();
        resolver.publish(table(&[("us", "1.1.1.0/24")]));

        let old = resolver.state().unwrap();
        resolver.publish(table(&[("de", "1.1.1.0/24")]));

        assert_eq!(&*old.table.lookup("1.1.1.1".parse().unwrap()).unwrap().country, "us");
        assert_eq!(query(&resolver, "1.1.1.1"), Resolution::Resolved("de".into()));
    }

    #[test]
    fn test_restore_keeps_timestamp() {
        let resolver = Resolver::new();
        let two_hours_ago = SystemTime::now() - Duration::from_secs(2 * 60 * 60);
        resolver.restore(ResolutionState {
            table: table(&[("us", "1.1.1.0/24")]),
            refreshed_at: two_hours_ago,
        });

        assert!(resolver.is_ready());
        assert!(!resolver.is_fresh());
        assert_eq!(resolver.refreshed_at(), Some(two_hours_ago));
        assert_eq!(query(&resolver, "1.1.1.1"), Resolution::Resolved("us".into()));
    }

    #[test]
    fn test_resolution_accessors() {
        let resolved = Resolution::Resolved("ca".into());
        assert_eq!(resolved.country(), Some("ca"));
        assert!(resolved.is_resolved());
        assert_eq!(resolved.as_str(), "resolved");

        assert_eq!(Resolution::NotFound.country(), None);
        assert!(!Resolution::Rejected.is_resolved());
        assert_eq!(Resolution::NotReady.as_str(), "not_ready");
    }

    #[test]
    fn test_is_non_global() {
        assert!(is_non_global("192.0.2.1".parse().unwrap()));
        assert!(is_non_global("2001:db8::1".parse().unwrap()));
        assert!(is_non_global("224.0.0.1".parse().unwrap()));
        assert!(!is_non_global("8.8.8.8".parse().unwrap()));
        assert!(!is_non_global("2606:4700::1111".parse().unwrap()));
        assert!(!is_non_global("::ffff:8.8.8.8".parse().unwrap()));
    }
}
