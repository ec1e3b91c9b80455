//! Background refresh of the range table.
//!
//! One thread loops forever: wait until the published table is due, download
//! every country and family into a fresh [`RangeTable`], publish it, save the
//! snapshot. A failed download aborts the cycle, leaves the served table
//! untouched and retries after a doubling, capped delay.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::config::GeolocationConfig;
use crate::error::{Error, Result};
use crate::resolver::{ResolutionState, Resolver};
use crate::snapshot::SnapshotStore;
use crate::source::RangeSource;
use crate::table::{Family, RangeTable};

/// Wakeable stop flag shared between the refresher thread and its handle.
#[derive(Debug, Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `timeout` or until triggered. Returns `true` if triggered.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut stopped),
            }
        }
        *stopped
    }
}

/// Doubling retry delay with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    /// Create a backoff starting at `initial` and capped at `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// Delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2),
        }
        .min(self.max);
        self.current = Some(next);
        next
    }

    /// Start over after a success.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Builds new range tables and publishes them to a [`Resolver`].
pub struct Refresher {
    resolver: Arc<Resolver>,
    source: Arc<dyn RangeSource>,
    store: SnapshotStore,
    countries: Vec<String>,
    refresh_period: Duration,
    backoff: Backoff,
    shutdown: Arc<Shutdown>,
}

impl Refresher {
    /// Create a refresher for `resolver`.
    pub fn new(
        resolver: Arc<Resolver>,
        source: Arc<dyn RangeSource>,
        store: SnapshotStore,
        config: &GeolocationConfig,
    ) -> Self {
        Self {
            resolver,
            source,
            store,
            countries: config.countries.clone(),
            refresh_period: config.refresh_period,
            backoff: Backoff::new(config.retry_backoff, config.max_retry_backoff),
            shutdown: Arc::new(Shutdown::default()),
        }
    }

    /// Download every configured country and family into a new table.
    ///
    /// Fails on the first list that cannot be fetched.
    pub fn fetch_table(&self) -> Result<RangeTable> {
        let mut builder = RangeTable::builder();
        let total = self.countries.len();

        for (index, country) in self.countries.iter().enumerate() {
            if self.shutdown.is_triggered() {
                return Err(Error::Cancelled);
            }
            for family in Family::ALL {
                let ranges = self.source.fetch(country, family)?;
                builder.extend(country, ranges);
            }
            log::debug!("Downloaded {} CIDR ({}/{})", country, index + 1, total);
        }

        Ok(builder.build())
    }

    /// Run one full cycle: fetch, publish, save.
    ///
    /// A snapshot save failure is logged and does not fail the cycle.
    pub fn refresh_once(&self) -> Result<Arc<ResolutionState>> {
        log::info!("Refreshing range table for {} countries", self.countries.len());

        let table = self.fetch_table()?;
        let state = self.resolver.publish(table);

        if let Err(e) = self.store.save(&state) {
            log::warn!("Failed to save snapshot {:?}: {}", self.store.path(), e);
        }

        Ok(state)
    }

    /// Time to wait before the next cycle.
    ///
    /// Zero when nothing is published yet or the table is overdue.
    pub fn next_delay(&self) -> Duration {
        let Some(refreshed_at) = self.resolver.refreshed_at() else {
            return Duration::ZERO;
        };

        match refreshed_at.checked_add(self.refresh_period) {
            Some(due) => due
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
            None => self.refresh_period,
        }
    }

    /// Start the refresh loop on a dedicated thread.
    pub fn spawn(self) -> Result<RefresherHandle> {
        let shutdown = Arc::clone(&self.shutdown);
        let thread = thread::Builder::new()
            .name("yourip-refresher".to_string())
            .spawn(move || self.run())?;

        Ok(RefresherHandle {
            shutdown,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        loop {
            let delay = self.next_delay();
            if !delay.is_zero() {
                log::debug!("Range table fresh for another {:?}", delay);
                if self.shutdown.wait(delay) {
                    break;
                }
            }

            match self.refresh_once() {
                Ok(_) => self.backoff.reset(),
                Err(Error::Cancelled) => break,
                Err(e) => {
                    let retry_in = self.backoff.next_delay();
                    log::warn!("Refresh failed, retrying in {:?}: {}", retry_in, e);
                    if self.shutdown.wait(retry_in) {
                        break;
                    }
                }
            }
        }

        log::info!("Refresher stopped");
    }
}

/// Handle to a running refresher thread.
///
/// Dropping the handle stops scheduling further cycles without waiting.
pub struct RefresherHandle {
    shutdown: Arc<Shutdown>,
    thread: Option<JoinHandle<()>>,
}

impl RefresherHandle {
    /// Stop the refresher and wait for its thread to exit.
    ///
    /// A download in progress finishes (bounded by the request timeout)
    /// before the thread notices.
    pub fn shutdown(mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Refresher thread panicked");
            }
        }
    }

    /// Whether the refresher thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
