use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};
use crate::fixtures::{Fixture, FixtureDiscovery};

/// Optional team names supplied by the caller, used only to sanity-check a hit.
#[derive(Debug, Clone, Default)]
pub struct TeamHints {
    pub home: Option<String>,
    pub away: Option<String>,
}

impl TeamHints {
    pub fn new(home: Option<&str>, away: Option<&str>) -> Self {
        let clean = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            home: clean(home),
            away: clean(away),
        }
    }

    fn agrees_with(&self, fixture: &Fixture) -> bool {
        let same = |hint: &Option<String>, team: &str| {
            hint.as_deref().is_none_or(|h| {
                let (h, t) = (h.to_lowercase(), team.to_lowercase());
                t.contains(&h) || h.contains(&t)
            })
        };
        same(&self.home, &fixture.home_team) && same(&self.away, &fixture.away_team)
    }
}

/// Maps a bare match id to its canonical fixture URL by scanning day listings.
/// Hits are remembered for the life of the process; ids never change.
pub struct MatchUrlResolver {
    discovery: Arc<FixtureDiscovery>,
    fallback_day_offsets: Vec<i64>,
    known: Mutex<HashMap<String, String>>,
}

impl MatchUrlResolver {
    pub fn new(discovery: Arc<FixtureDiscovery>, fallback_day_offsets: Vec<i64>) -> Self {
        Self {
            discovery,
            fallback_day_offsets,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn known_url(&self, match_id: &str) -> Option<String> {
        self.lock().get(match_id).cloned()
    }

    /// Record canonical URLs already seen by a discovery call.
    pub fn remember(&self, fixtures: &[Fixture]) {
        let mut known = self.lock();
        for f in fixtures {
            if let Some(url) = f.canonical_url.as_ref() {
                known.entry(f.match_id.clone()).or_insert_with(|| url.clone());
            }
        }
    }

    pub fn forget_all(&self) {
        self.lock().clear();
    }

    pub fn resolve(
        &self,
        match_id: &str,
        hints: &TeamHints,
        fixture_date: Option<NaiveDate>,
        cancel: Option<&AtomicBool>,
    ) -> Result<String> {
        self.resolve_from(match_id, hints, fixture_date, Local::now().date_naive(), cancel)
    }

    /// Same as [`resolve`](Self::resolve) with an explicit "today" anchoring the fallback window.
    pub fn resolve_from(
        &self,
        match_id: &str,
        hints: &TeamHints,
        fixture_date: Option<NaiveDate>,
        today: NaiveDate,
        cancel: Option<&AtomicBool>,
    ) -> Result<String> {
        let match_id = match_id.trim();
        if match_id.is_empty() {
            return Err(ScoutError::validation("empty match id"));
        }
        if let Some(url) = self.known_url(match_id) {
            debug!(match_id, "match url memo hit");
            return Ok(url);
        }

        let mut dates: Vec<NaiveDate> = Vec::new();
        if let Some(date) = fixture_date {
            dates.push(date);
        }
        for offset in &self.fallback_day_offsets {
            let Some(date) = today.checked_add_signed(ChronoDuration::days(*offset)) else {
                continue;
            };
            if !dates.contains(&date) {
                dates.push(date);
            }
        }

        for date in dates {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(ScoutError::Cancelled);
            }
            // One bad listing day must not abort the scan of the others.
            let fixtures = match self.discovery.fixtures_on(date) {
                Ok(fixtures) => fixtures,
                Err(err) => {
                    warn!(%date, error = %err, "listing unavailable while resolving match url");
                    continue;
                }
            };
            self.remember(&fixtures);
            if let Some(fixture) = find_fixture(&fixtures, match_id)
                && let Some(url) = fixture.canonical_url.clone()
            {
                if !hints.agrees_with(fixture) {
                    warn!(
                        match_id,
                        home = %fixture.home_team,
                        away = %fixture.away_team,
                        "resolved fixture does not match team hints"
                    );
                }
                info!(match_id, %date, url = %url, "resolved match url");
                // An exact entry recorded by `remember` always wins.
                let url = self
                    .lock()
                    .entry(match_id.to_string())
                    .or_insert(url)
                    .clone();
                return Ok(url);
            }
        }

        Err(ScoutError::not_found(format!("fixture url for match {match_id}")))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exact id first. The URL scan only covers listings whose id could not be
/// parsed, and it matches whole path segments so `912345678` never stands in
/// for `12345678`.
fn find_fixture<'a>(fixtures: &'a [Fixture], match_id: &str) -> Option<&'a Fixture> {
    fixtures.iter().find(|f| f.match_id == match_id).or_else(|| {
        fixtures.iter().find(|f| {
            f.canonical_url
                .as_deref()
                .is_some_and(|url| url.split(['/', '?', '#']).any(|seg| seg == match_id))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureStatus;

    fn fixture(home: &str, away: &str) -> Fixture {
        Fixture {
            match_id: "20241234567".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            home_team: home.to_string(),
            away_team: away.to_string(),
            kickoff_or_status: "TBD".to_string(),
            status: FixtureStatus::Scheduled,
            competition: None,
            home_crest_url: None,
            away_crest_url: None,
            canonical_url: None,
            home_score: None,
            away_score: None,
        }
    }

    fn listed(match_id: &str, url: &str) -> Fixture {
        Fixture {
            match_id: match_id.to_string(),
            canonical_url: Some(url.to_string()),
            ..fixture("Home", "Away")
        }
    }

    #[test]
    fn exact_id_beats_a_longer_id_containing_it() {
        let fixtures = vec![
            listed("912345678", "https://x.test/partido/wrong/b/912345678"),
            listed("12345678", "https://x.test/partido/right/b/12345678"),
        ];
        let hit = find_fixture(&fixtures, "12345678").unwrap();
        assert_eq!(hit.canonical_url.as_deref(), Some("https://x.test/partido/right/b/12345678"));

        let unparsed = vec![listed("", "https://x.test/partido/wrong/b/912345678")];
        assert!(find_fixture(&unparsed, "12345678").is_none());
    }

    #[test]
    fn hints_compare_loosely() {
        let f = fixture("Real Betis Balompié", "Sevilla FC");
        assert!(TeamHints::default().agrees_with(&f));
        assert!(TeamHints::new(Some("real betis"), None).agrees_with(&f));
        assert!(TeamHints::new(Some(""), Some("Sevilla")).agrees_with(&f));
        assert!(!TeamHints::new(Some("Getafe"), None).agrees_with(&f));
    }
}
