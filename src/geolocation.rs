//! Service handle tying resolver, snapshot and refresher together.

use std::net::IpAddr;
use std::sync::Arc;

use crate::config::GeolocationConfig;
use crate::error::Result;
use crate::refresher::{Refresher, RefresherHandle};
use crate::resolver::{Resolution, Resolver};
use crate::snapshot::SnapshotStore;
use crate::source::{HttpSource, RangeSource};

/// A running geolocation service.
///
/// On start the last snapshot (if any) is loaded so queries can be answered
/// before the first download completes, then the refresher thread is
/// started. Dropping the handle stops the refresher.
///
/// # Example
///
/// ```ignore
/// use yourip::{Geolocation, GeolocationConfig};
///
/// let geo = Geolocation::start(GeolocationConfig::default().with_refresh_hours(24))?;
/// let resolution = geo.query("8.8.8.8".parse()?);
/// println!("{}", resolution.country().unwrap_or(""));
/// ```
pub struct Geolocation {
    resolver: Arc<Resolver>,
    refresher: Option<RefresherHandle>,
}

impl Geolocation {
    /// Start with block lists downloaded over HTTP.
    pub fn start(config: GeolocationConfig) -> Result<Self> {
        let source = HttpSource::from_config(&config)?;
        Self::start_with_source(config, Arc::new(source))
    }

    /// Start with a custom range source.
    pub fn start_with_source(
        config: GeolocationConfig,
        source: Arc<dyn RangeSource>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let resolver = Arc::new(Resolver::new());
        let store = SnapshotStore::new(&config.snapshot_path);

        // An unreadable snapshot only costs the head start
        match store.load() {
            Ok(Some(state)) => resolver.restore(state),
            Ok(None) => {}
            Err(e) => log::warn!("Ignoring snapshot: {}", e),
        }

        let refresher = Refresher::new(Arc::clone(&resolver), source, store, &config).spawn()?;

        Ok(Self {
            resolver,
            refresher: Some(refresher),
        })
    }

    /// Shared resolver, for handing to connection handlers.
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Resolve an address.
    pub fn query(&self, ip: IpAddr) -> Resolution {
        self.resolver.query(ip)
    }

    /// Parse and resolve an address.
    pub fn query_str(&self, ip: &str) -> Result<Resolution> {
        self.resolver.query_str(ip)
    }

    /// Whether a table has been published or restored.
    pub fn is_ready(&self) -> bool {
        self.resolver.is_ready()
    }

    /// Whether the served table was refreshed within the last hour.
    pub fn is_fresh(&self) -> bool {
        self.resolver.is_fresh()
    }

    /// Stop the refresher and wait for it to exit.
    pub fn shutdown(mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.shutdown();
        }
    }
}
