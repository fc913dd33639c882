//! The `Scout` facade: one object wiring cache, fetcher, extractors and the
//! player store together.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ScoutConfig, default_db_path};
use crate::error::{Result, ScoutError};
use crate::fixtures::{CompetitionFilter, Fixture, FixtureDiscovery, match_id_from_href};
use crate::http_client::{CachedFetcher, FetchHtml, HttpFetcher, with_retry};
use crate::lineups::{LineupExtractor, Lineups, lineups_url};
use crate::match_resolver::{MatchUrlResolver, TeamHints};
use crate::profile::{CareerRow, PlayerProfile, ProfileExtractor, ScrapedProfile};
use crate::resolver::{EntityResolver, MatchRule, Resolution};
use crate::store::{PlayerId, PlayerStore, ResolutionWarning};
use crate::ttl_cache::TtlCache;

const FIXTURE_PATH: &str = "/partido/";
const SYNC_ATTEMPTS: u32 = 2;
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub player_id: PlayerId,
    pub matched_by: MatchRule,
    pub career_rows: usize,
    pub warnings: Vec<ResolutionWarning>,
}

/// Result of syncing one roster entry's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub profile_url: String,
    pub player_name: String,
    pub summary: Option<SyncSummary>,
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn is_ok(&self) -> bool {
        self.summary.is_some()
    }
}

pub struct Scout {
    config: Arc<ScoutConfig>,
    cache: Arc<TtlCache<String>>,
    discovery: Arc<FixtureDiscovery>,
    match_urls: MatchUrlResolver,
    lineups: LineupExtractor,
    profiles: ProfileExtractor,
    resolver: EntityResolver,
}

impl Scout {
    /// Wire the pipeline around any page source. Pages are cached for
    /// `config.cache_ttl` in front of `fetcher`.
    pub fn new(config: ScoutConfig, fetcher: Arc<dyn FetchHtml>, store: Arc<PlayerStore>) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(TtlCache::new(config.cache_ttl));
        let fetcher: Arc<dyn FetchHtml> = Arc::new(CachedFetcher::new(fetcher, cache.clone()));
        let discovery = Arc::new(FixtureDiscovery::new(fetcher.clone(), config.clone()));
        Self {
            match_urls: MatchUrlResolver::new(discovery.clone(), config.fallback_day_offsets.clone()),
            lineups: LineupExtractor::new(fetcher.clone(), config.clone()),
            profiles: ProfileExtractor::new(fetcher, config.clone()),
            resolver: EntityResolver::new(store).refuse_ambiguous(config.strict_name_matches),
            discovery,
            cache,
            config,
        }
    }

    /// Live HTTP fetcher and the on-disk store named by the config.
    pub fn from_config(config: ScoutConfig) -> Result<Self> {
        let path = config
            .db_path
            .clone()
            .or_else(default_db_path)
            .ok_or_else(|| ScoutError::validation("no store path; set SCOUT_DB"))?;
        let store = Arc::new(PlayerStore::open(&path)?);
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Ok(Self::new(config, fetcher, store))
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PlayerStore> {
        self.resolver.store()
    }

    /// Fixtures listed for `date`, narrowed by a comma-separated competition filter.
    /// Every listed fixture primes the match-URL memo, filtered out or not.
    pub fn discover_fixtures(&self, date: NaiveDate, competition_filter: &str) -> Result<Vec<Fixture>> {
        let filter = CompetitionFilter::parse(competition_filter);
        self.discovery
            .discover(date, &filter, |all| self.match_urls.remember(all))
    }

    pub fn resolve_fixture_url(
        &self,
        match_id: &str,
        hints: &TeamHints,
        fixture_date: Option<NaiveDate>,
        cancel: Option<&AtomicBool>,
    ) -> Result<String> {
        self.match_urls.resolve(match_id, hints, fixture_date, cancel)
    }

    pub fn extract_lineups(&self, fixture_url: &str) -> Result<Lineups> {
        let lineups = self.lineups.extract(fixture_url);
        self.evict_unusable(&lineups_url(fixture_url), lineups)
    }

    /// Lineups for a fixture URL or a bare match id. Anything that is not a
    /// fixture URL is treated as a source of the match id.
    pub fn lineups_for_match(
        &self,
        id_or_url: &str,
        hints: &TeamHints,
        fixture_date: Option<NaiveDate>,
    ) -> Result<Lineups> {
        let input = id_or_url.trim();
        if input.starts_with("http") && input.contains(FIXTURE_PATH) {
            return self.extract_lineups(input);
        }
        let match_id = if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            input.to_string()
        } else {
            match_id_from_href(input)
                .ok_or_else(|| ScoutError::validation(format!("no match id in {input:?}")))?
        };
        let url = self.resolve_fixture_url(&match_id, hints, fixture_date, None)?;
        self.extract_lineups(&url)
    }

    pub fn extract_player_profile(&self, profile_url: &str) -> Result<ScrapedProfile> {
        let scraped = self.profiles.extract(profile_url);
        self.evict_unusable(profile_url, scraped)
    }

    /// A page that fetched but failed to parse or validate leaves the cache;
    /// the next call refetches it.
    fn evict_unusable<T>(&self, url: &str, result: Result<T>) -> Result<T> {
        if let Err(err @ (ScoutError::Parse(_) | ScoutError::Validation(_))) = &result
            && self.cache.remove(url).is_some()
        {
            debug!(url, error = %err, "evicted unusable page from cache");
        }
        result
    }

    pub fn resolve_player(&self, bio: &PlayerProfile, explicit: Option<PlayerId>) -> Result<Resolution> {
        self.resolver.resolve(bio, explicit)
    }

    pub fn upsert_career_row(&self, player_id: PlayerId, row: &CareerRow) -> Result<()> {
        self.resolver.upsert_career_row(player_id, row)
    }

    /// Scrape a profile and persist bio and career. A profile without a
    /// trustworthy name writes nothing.
    pub fn sync_player(&self, profile_url: &str, explicit: Option<PlayerId>) -> Result<SyncSummary> {
        let scraped = self.extract_player_profile(profile_url)?;
        let resolution = self
            .resolver
            .resolve_with_career(&scraped.bio, &scraped.career, explicit)?;
        Ok(SyncSummary {
            player_id: resolution.player_id,
            matched_by: resolution.matched_by,
            career_rows: scraped.career.len(),
            warnings: resolution.warnings,
        })
    }

    /// Sync every linked profile of a lineup on the fetch pool. Failures are
    /// reported per player; a raised `cancel` skips players not yet started.
    pub fn sync_lineup(&self, lineups: &Lineups, cancel: Option<&AtomicBool>) -> Vec<SyncOutcome> {
        let mut seen = HashSet::new();
        let targets: Vec<(String, String)> = lineups
            .entries()
            .filter_map(|e| e.profile_url.clone().map(|url| (url, e.name.clone())))
            .filter(|(url, _)| seen.insert(url.clone()))
            .collect();

        let outcomes: Vec<SyncOutcome> = with_fetch_pool(self.config.fetch_parallelism, || {
            targets
                .par_iter()
                .map(|(url, name)| {
                    let result = if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                        Err(ScoutError::Cancelled)
                    } else {
                        with_retry(|| self.sync_player(url, None), SYNC_ATTEMPTS, SYNC_RETRY_DELAY)
                    };
                    if let Err(err) = &result {
                        warn!(url = %url, error = %err, "player sync failed");
                    }
                    SyncOutcome {
                        profile_url: url.clone(),
                        player_name: name.clone(),
                        error: result.as_ref().err().map(|e| e.to_string()),
                        summary: result.ok(),
                    }
                })
                .collect()
        });

        let synced = outcomes.iter().filter(|o| o.is_ok()).count();
        info!(total = outcomes.len(), synced, "lineup sync finished");
        outcomes
    }

    /// Drop cached pages and remembered match URLs.
    pub fn clear_caches(&self) {
        self.cache.clear();
        self.match_urls.forget_all();
        info!("cleared caches");
    }
}

fn with_fetch_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

/// Parse a caller-supplied `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ScoutError::validation(format!("invalid date {raw:?}, expected YYYY-MM-DD")))
}
