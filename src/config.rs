//! Geolocation configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::country::{default_countries, normalize_country_code};
use crate::error::{Error, Result};

/// Default upstream block list repository.
pub const DEFAULT_BASE_URL: &str =
    "https://raw.githubusercontent.com/onionj/country-ip-blocks-alternative/master";

/// Default snapshot file, relative to the working directory.
pub const DEFAULT_SNAPSHOT_PATH: &str = "ipGeolocationCIDR.json";

/// Default refresh period in hours.
pub const DEFAULT_REFRESH_HOURS: u64 = 200;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default first retry delay after a failed refresh.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Default upper bound for the retry delay.
pub const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// Settings for the resolver, its refresher and snapshot store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeolocationConfig {
    /// Time between successful refreshes
    pub refresh_period: Duration,
    /// Snapshot file location
    pub snapshot_path: PathBuf,
    /// Root URL of the per-country block lists
    pub base_url: String,
    /// Timeout for each block list request
    pub request_timeout: Duration,
    /// Delay before the first retry after a failed refresh
    pub retry_backoff: Duration,
    /// Upper bound for the doubling retry delay
    pub max_retry_backoff: Duration,
    /// Country codes to download
    pub countries: Vec<String>,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(DEFAULT_REFRESH_HOURS * 60 * 60),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retry_backoff: DEFAULT_MAX_RETRY_BACKOFF,
            countries: default_countries(),
        }
    }
}

impl GeolocationConfig {
    /// Set the refresh period in whole hours.
    pub fn with_refresh_hours(mut self, hours: u64) -> Self {
        self.refresh_period = Duration::from_secs(hours.saturating_mul(60 * 60));
        self
    }

    /// Set the refresh period.
    pub fn with_refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period = period;
        self
    }

    /// Set the snapshot file location.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Set the block list root URL.
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry backoff bounds.
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff = initial;
        self.max_retry_backoff = max;
        self
    }

    /// Restrict the downloaded countries.
    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.countries = countries
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect();
        self
    }

    /// Check the configuration and normalize country codes.
    pub fn validate(mut self) -> Result<Self> {
        if self.refresh_period.is_zero() {
            return Err(Error::Config("refresh period must be positive".to_string()));
        }
        if self.retry_backoff.is_zero() || self.retry_backoff > self.max_retry_backoff {
            return Err(Error::Config(format!(
                "retry backoff {:?} must be positive and at most {:?}",
                self.retry_backoff, self.max_retry_backoff
            )));
        }
        if self.countries.is_empty() {
            return Err(Error::Config("country list is empty".to_string()));
        }

        let mut countries = self
            .countries
            .iter()
            .map(|c| normalize_country_code(c))
            .collect::<Result<Vec<_>>>()?;
        countries.sort_unstable();
        countries.dedup();
        self.countries = countries;

        Ok(self)
    }
}
