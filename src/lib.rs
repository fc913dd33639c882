//! Fixture, lineup and player-profile scraping with a deduplicating player store.

pub mod config;
pub mod error;
pub mod fixtures;
pub mod html;
pub mod http_client;
pub mod lineups;
pub mod match_resolver;
pub mod pipeline;
pub mod profile;
pub mod resolver;
pub mod store;
pub mod ttl_cache;

pub use config::ScoutConfig;
pub use error::{FetchError, Result, ScoutError};
pub use pipeline::{Scout, SyncOutcome, SyncSummary};
pub use store::{PlayerId, PlayerStore};
