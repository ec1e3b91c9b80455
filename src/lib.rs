//! yourip - IP address to country resolution from per-country CIDR block lists.
//!
//! The resolver answers "which country is this address in?" from an
//! in-memory table of per-country network ranges. A background thread keeps
//! the table current by re-downloading the upstream block lists on a fixed
//! period and swaps each new table in atomically; the last good table is
//! also persisted so a restart can answer queries before the first download
//! finishes.
//!
//! # Features
//!
//! - **Deterministic matching**: overlapping ranges resolve to the longest
//!   prefix, then the smallest country code
//! - **Lock-free queries**: readers load the current table with one atomic
//!   pointer read; publishing never blocks them
//! - **Fault tolerant refresh**: malformed lines are skipped, a failed
//!   download keeps the previous table and retries with backoff
//! - **Snapshots**: atomic JSON snapshot written after every refresh
//! - **TCP front end**: plain text, HTTP text, JSON and animated replies
//!
//! # Quick Start
//!
//! ```ignore
//! use yourip::{Geolocation, GeolocationConfig, Resolution};
//!
//! let geo = Geolocation::start(GeolocationConfig::default().with_refresh_hours(24))?;
//!
//! match geo.query("8.8.8.8".parse()?) {
//!     Resolution::Resolved(country) => println!("country: {}", country),
//!     Resolution::NotReady => println!("still downloading"),
//!     Resolution::Rejected | Resolution::NotFound => println!("unknown"),
//! }
//! ```
//!
//! # Building tables by hand
//!
//! ```
//! use yourip::{RangeTable, Resolution, Resolver};
//!
//! let mut builder = RangeTable::builder();
//! builder.add("aa", "1.1.1.0/24".parse().unwrap());
//! builder.add("bb", "1.1.1.0/28".parse().unwrap());
//!
//! let resolver = Resolver::new();
//! resolver.publish(builder.build());
//!
//! assert_eq!(
//!     resolver.query("1.1.1.1".parse().unwrap()),
//!     Resolution::Resolved("bb".into())
//! );
//! ```

mod error;
mod geolocation;
mod table;

pub mod config;
pub mod country;
pub mod refresher;
pub mod resolver;
pub mod server;
pub mod snapshot;
pub mod source;

// Re-export core types
pub use error::{Error, Result};
pub use geolocation::Geolocation;
pub use table::{Family, RangeMatch, RangeTable, RangeTableBuilder};

pub use config::GeolocationConfig;
pub use refresher::{Refresher, RefresherHandle};
pub use resolver::{Resolution, ResolutionState, Resolver, FRESHNESS_THRESHOLD};
pub use snapshot::SnapshotStore;
pub use source::{HttpSource, RangeSource};
