use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ScoutConfig;
use crate::error::{Result, ScoutError};
use crate::html::{absolutize, ancestors, attr, first, has_class, sel, text_of};
use crate::http_client::FetchHtml;

pub const MIN_MATCH_ID_DIGITS: usize = 8;
const COMPETITION_SEARCH_DEPTH: usize = 6;

static LISTING: Lazy<Selector> = Lazy::new(|| sel("#tableMatches"));
static MATCH_LINK: Lazy<Selector> = Lazy::new(|| sel("a.match-link"));
static TEAM_BOX: Lazy<Selector> = Lazy::new(|| sel("div.team-box"));
static TEAM_NAME: Lazy<Selector> = Lazy::new(|| sel(".team-name"));
static TEAM_SHIELD: Lazy<Selector> = Lazy::new(|| sel("img.team-shield"));
static MARKER: Lazy<Selector> = Lazy::new(|| sel(".marker"));
static MATCH_HOUR: Lazy<Selector> = Lazy::new(|| sel(".match_hour"));
static SPAN: Lazy<Selector> = Lazy::new(|| sel("span"));
static PANEL_TITLE: Lazy<Selector> = Lazy::new(|| sel(".panel-title"));
static SCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*-\s*(\d+)").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Scheduled,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub match_id: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    /// Kickoff time, `"finished"`, or `"TBD"` when the marker is missing.
    pub kickoff_or_status: String,
    pub status: FixtureStatus,
    pub competition: Option<String>,
    pub home_crest_url: Option<String>,
    pub away_crest_url: Option<String>,
    pub canonical_url: Option<String>,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

impl Fixture {
    pub fn is_finished(&self) -> bool {
        self.status == FixtureStatus::Finished
    }
}

/// Comma-separated, case-insensitive "contains" filter on competition labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompetitionFilter {
    tokens: Vec<String>,
}

impl CompetitionFilter {
    pub fn parse(raw: &str) -> Self {
        let tokens = raw
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn matches(&self, competition: Option<&str>) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        let Some(label) = competition else {
            return false;
        };
        let label = label.to_lowercase();
        self.tokens.iter().any(|t| label.contains(t.as_str()))
    }

    pub fn apply(&self, fixtures: Vec<Fixture>) -> Vec<Fixture> {
        if self.is_empty() {
            return fixtures;
        }
        fixtures
            .into_iter()
            .filter(|f| self.matches(f.competition.as_deref()))
            .collect()
    }
}

pub struct FixtureDiscovery {
    fetcher: Arc<dyn FetchHtml>,
    config: Arc<ScoutConfig>,
}

impl FixtureDiscovery {
    pub fn new(fetcher: Arc<dyn FetchHtml>, config: Arc<ScoutConfig>) -> Self {
        Self { fetcher, config }
    }

    /// All fixtures listed for `date` (unfiltered, page order).
    pub fn fixtures_on(&self, date: NaiveDate) -> Result<Vec<Fixture>> {
        let url = self.config.livescore_url(date);
        let html = self.fetcher.fetch(&url)?;
        let fixtures = parse_fixture_listing(&html, date, &self.config.base_url)?;
        debug!(%date, count = fixtures.len(), "parsed fixture listing");
        Ok(fixtures)
    }

    /// Fixtures for `date` that pass `filter`. `seen` gets the whole listing
    /// before filtering.
    pub fn discover(
        &self,
        date: NaiveDate,
        filter: &CompetitionFilter,
        seen: impl FnOnce(&[Fixture]),
    ) -> Result<Vec<Fixture>> {
        let all = self.fixtures_on(date)?;
        seen(&all);
        let fixtures = filter.apply(all);
        info!(%date, count = fixtures.len(), "discovered fixtures");
        Ok(fixtures)
    }
}

/// Parse a day's listing page. Blocks missing team names or a match id are
/// skipped; a page with no listing at all is a parse error.
pub fn parse_fixture_listing(html: &str, date: NaiveDate, base_url: &str) -> Result<Vec<Fixture>> {
    let doc = Html::parse_document(html);
    let links: Vec<ElementRef<'_>> = match doc.select(&LISTING).next() {
        Some(listing) => listing.select(&MATCH_LINK).collect(),
        None => doc.select(&MATCH_LINK).collect(),
    };
    if links.is_empty() && doc.select(&LISTING).next().is_none() {
        return Err(ScoutError::parse(format!("no fixture listing for {date}")));
    }

    let mut out: Vec<Fixture> = Vec::with_capacity(links.len());
    for link in links {
        let Some(fixture) = parse_fixture_link(link, date, base_url) else {
            continue;
        };
        if out.iter().any(|f| f.match_id == fixture.match_id) {
            continue;
        }
        out.push(fixture);
    }
    Ok(out)
}

fn parse_fixture_link(link: ElementRef<'_>, date: NaiveDate, base_url: &str) -> Option<Fixture> {
    let href = attr(link, "href")?;
    let match_id = match_id_from_href(href)?;
    let team_box = first(link, &TEAM_BOX)?;

    let names: Vec<String> = team_box
        .select(&TEAM_NAME)
        .map(text_of)
        .filter(|n| !n.is_empty())
        .collect();
    if names.len() < 2 {
        return None;
    }

    let mut crests = team_box
        .select(&TEAM_SHIELD)
        .map(|img| attr(img, "src").map(|src| absolutize(base_url, src)));
    let home_crest_url = crests.next().flatten();
    let away_crest_url = crests.next().flatten();

    let (kickoff_or_status, status, home_score, away_score) = read_marker(team_box);

    Some(Fixture {
        match_id,
        date,
        home_team: names[0].clone(),
        away_team: names[1].clone(),
        kickoff_or_status,
        status,
        competition: competition_label(link),
        home_crest_url,
        away_crest_url,
        canonical_url: Some(absolutize(base_url, href)),
        home_score,
        away_score,
    })
}

fn read_marker(team_box: ElementRef<'_>) -> (String, FixtureStatus, Option<u32>, Option<u32>) {
    let scheduled = |kickoff: String| (kickoff, FixtureStatus::Scheduled, None, None);
    let Some(marker) = first(team_box, &MARKER) else {
        return scheduled("TBD".to_string());
    };
    if let Some(hour) = first(marker, &MATCH_HOUR) {
        let kickoff = text_of(hour);
        return scheduled(if kickoff.is_empty() { "TBD".to_string() } else { kickoff });
    }
    let raw = first(marker, &SPAN).map(text_of).unwrap_or_else(|| text_of(marker));
    match parse_score(&raw) {
        Some((home, away)) => (
            "finished".to_string(),
            FixtureStatus::Finished,
            Some(home),
            Some(away),
        ),
        None => scheduled("TBD".to_string()),
    }
}

pub fn parse_score(raw: &str) -> Option<(u32, u32)> {
    let caps = SCORE_RE.captures(raw)?;
    let home = caps.get(1)?.as_str().parse().ok()?;
    let away = caps.get(2)?.as_str().parse().ok()?;
    Some((home, away))
}

/// Title of the nearest enclosing competition panel.
fn competition_label(link: ElementRef<'_>) -> Option<String> {
    if let Some(label) = attr(link, "data-competition") {
        return Some(label.to_string());
    }
    ancestors(link, COMPETITION_SEARCH_DEPTH)
        .filter(|el| has_class(*el, "panel"))
        .find_map(|panel| first(panel, &PANEL_TITLE).map(text_of))
        .filter(|label| !label.is_empty())
}

/// Longest purely numeric path segment with at least eight digits.
pub fn match_id_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.split('/')
        .filter(|seg| seg.len() >= MIN_MATCH_ID_DIGITS && seg.chars().all(|c| c.is_ascii_digit()))
        .max_by_key(|seg| seg.len())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_id_is_longest_numeric_segment() {
        assert_eq!(
            match_id_from_href("/partido/team-a/team-b/2024/202491234567").as_deref(),
            Some("202491234567")
        );
        assert_eq!(
            match_id_from_href("https://x.test/partido/a/b/12345678?tab=1").as_deref(),
            Some("12345678")
        );
        assert_eq!(match_id_from_href("/partido/a/b/1234567"), None);
        assert_eq!(match_id_from_href("/partido/a/b/12345678x"), None);
    }

    #[test]
    fn score_marker_needs_two_numbers() {
        assert_eq!(parse_score("2-1"), Some((2, 1)));
        assert_eq!(parse_score(" 0 - 0 "), Some((0, 0)));
        assert_eq!(parse_score("20:45"), None);
    }

    #[test]
    fn filter_tokens_are_case_insensitive_substrings() {
        let filter = CompetitionFilter::parse(" division a , Copa ");
        assert!(filter.matches(Some("Spain - Division A")));
        assert!(filter.matches(Some("COPA DEL REY")));
        assert!(!filter.matches(Some("Division B")));
        assert!(!filter.matches(None));

        let empty = CompetitionFilter::parse(" , ");
        assert!(empty.is_empty());
        assert!(empty.matches(None));
    }
}
