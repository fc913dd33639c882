use std::sync::Arc;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ScoutConfig;
use crate::error::{Result, ScoutError};
use crate::html::{
    absolutize, ancestors, attr, clean_text, first, has_class, sel, text_of, upgrade_image_url,
};
use crate::http_client::FetchHtml;

pub const LINEUPS_SEGMENT: &str = "alineaciones";
pub const MIN_SIDE_ENTRIES: usize = 11;
/// How many containers above a player block are inspected for a side marker.
pub const SIDE_SEARCH_DEPTH: usize = 5;
const PHOTO_SIZE: u32 = 500;
const PROFILE_PATH: &str = "/jugador/";

static STARTERS_PANEL: Lazy<Selector> = Lazy::new(|| sel("div.panel.panel-lineup"));
static BENCH_PANEL: Lazy<Selector> = Lazy::new(|| sel("div.panel.panel-bench"));
static PLAYER_WRAPPER: Lazy<Selector> = Lazy::new(|| sel("div.player-wrapper"));
static BENCH_LINK: Lazy<Selector> = Lazy::new(|| sel("a.col-bench"));
static FIELD_PLAYER_LINK: Lazy<Selector> = Lazy::new(|| sel(r#"a[data-cy="fieldPlayer"]"#));
static ANY_LINK: Lazy<Selector> = Lazy::new(|| sel("a"));
static LD_JSON: Lazy<Selector> = Lazy::new(|| sel(r#"script[type="application/ld+json"]"#));
static LINEUP_NAME: Lazy<Selector> = Lazy::new(|| sel("div.name.name-lineups"));
static BENCH_NAME: Lazy<Selector> = Lazy::new(|| sel("p.name"));
static STARTER_NUMBER: Lazy<Selector> = Lazy::new(|| sel("div.name.num-lineups span.bold"));
static BENCH_NUMBER: Lazy<Selector> = Lazy::new(|| sel("span.number.bold"));
static BOLD: Lazy<Selector> = Lazy::new(|| sel("span.bold"));
static ROLE_LABEL: Lazy<Selector> = Lazy::new(|| sel("div.role-box span.t-up"));
static IMG: Lazy<Selector> = Lazy::new(|| sel("img"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    /// Shirt number as printed, or `"?"`.
    pub shirt_number: String,
    /// Normalised position, or `"N/A"`.
    pub position: String,
    pub is_starter: bool,
    pub photo_url: Option<String>,
    pub profile_url: Option<String>,
    /// Side read from the markup; `Unknown` entries were placed by balance.
    pub side: Side,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterSide {
    pub starters: Vec<RosterEntry>,
    pub bench: Vec<RosterEntry>,
}

impl RosterSide {
    pub fn len(&self) -> usize {
        self.starters.len() + self.bench.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = &RosterEntry> {
        self.starters.iter().chain(self.bench.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lineups {
    pub home: RosterSide,
    pub away: RosterSide,
}

impl Lineups {
    pub fn entries(&self) -> impl Iterator<Item = &RosterEntry> {
        self.home.entries().chain(self.away.entries())
    }

    fn side_mut(&mut self, side: Side) -> &mut RosterSide {
        match side {
            Side::Away => &mut self.away,
            Side::Home | Side::Unknown => &mut self.home,
        }
    }
}

/// Tie-break for entries whose side cannot be read from the markup: the side
/// with fewer entries in the same group gets the player, home on a tie.
pub fn balance_side(home_count: usize, away_count: usize) -> Side {
    if home_count <= away_count {
        Side::Home
    } else {
        Side::Away
    }
}

pub struct LineupExtractor {
    fetcher: Arc<dyn FetchHtml>,
    config: Arc<ScoutConfig>,
}

impl LineupExtractor {
    pub fn new(fetcher: Arc<dyn FetchHtml>, config: Arc<ScoutConfig>) -> Self {
        Self { fetcher, config }
    }

    pub fn extract(&self, fixture_url: &str) -> Result<Lineups> {
        let url = lineups_url(fixture_url);
        let html = self.fetcher.fetch(&url)?;
        let lineups = parse_lineups(&html, &self.config.base_url)?;
        info!(
            url = %url,
            home = lineups.home.len(),
            away = lineups.away.len(),
            "extracted lineups"
        );
        Ok(lineups)
    }
}

/// Lineups sub-page of a fixture URL.
pub fn lineups_url(fixture_url: &str) -> String {
    let clean = fixture_url
        .split(['#', '?'])
        .next()
        .unwrap_or(fixture_url)
        .trim_end_matches('/');
    if clean.ends_with(&format!("/{LINEUPS_SEGMENT}")) {
        clean.to_string()
    } else {
        format!("{clean}/{LINEUPS_SEGMENT}")
    }
}

pub fn parse_lineups(html: &str, base_url: &str) -> Result<Lineups> {
    let doc = Html::parse_document(html);
    let Some(starters_panel) = doc.select(&STARTERS_PANEL).next() else {
        return Err(ScoutError::parse("lineups unavailable"));
    };

    let mut lineups = Lineups::default();

    for wrapper in starters_panel.select(&PLAYER_WRAPPER) {
        let Some(entry) = parse_roster_block(wrapper, true, base_url) else {
            continue;
        };
        let side = match entry.side {
            Side::Unknown => balance_side(lineups.home.starters.len(), lineups.away.starters.len()),
            known => known,
        };
        lineups.side_mut(side).starters.push(entry);
    }

    if let Some(bench_panel) = doc.select(&BENCH_PANEL).next() {
        for link in bench_panel.select(&BENCH_LINK) {
            let Some(entry) = parse_roster_block(link, false, base_url) else {
                continue;
            };
            let side = match entry.side {
                Side::Unknown => balance_side(lineups.home.bench.len(), lineups.away.bench.len()),
                known => known,
            };
            lineups.side_mut(side).bench.push(entry);
        }
    } else {
        debug!("no bench panel on lineups page");
    }

    let (home, away) = (lineups.home.len(), lineups.away.len());
    if home < MIN_SIDE_ENTRIES || away < MIN_SIDE_ENTRIES {
        warn!(home, away, "incomplete lineups rejected");
        return Err(ScoutError::validation(format!(
            "incomplete lineups: {home} vs {away}"
        )));
    }
    Ok(lineups)
}

/// Embedded schema.org person metadata carried by each player block.
#[derive(Debug, Default, Deserialize)]
struct PersonMeta {
    #[serde(rename = "@type")]
    kind: Option<String>,
    name: Option<String>,
    #[serde(alias = "jobTitle")]
    jobtitle: Option<String>,
    image: Option<Value>,
    url: Option<String>,
}

impl PersonMeta {
    fn image_url(&self) -> Option<String> {
        match self.image.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("url").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }
}

fn person_meta(block: ElementRef<'_>) -> Option<PersonMeta> {
    let script = first(block, &LD_JSON)?;
    let raw = script.text().collect::<String>();
    match serde_json::from_str::<PersonMeta>(raw.trim()) {
        Ok(meta) if meta.kind.as_deref() == Some("Person") => Some(meta),
        Ok(_) => None,
        Err(err) => {
            debug!(error = %err, "unreadable person metadata");
            None
        }
    }
}

fn parse_roster_block(block: ElementRef<'_>, is_starter: bool, base_url: &str) -> Option<RosterEntry> {
    let meta = person_meta(block).unwrap_or_default();
    let link = if has_class(block, "col-bench") || block.value().name() == "a" {
        Some(block)
    } else {
        first(block, &FIELD_PLAYER_LINK).or_else(|| first(block, &ANY_LINK))
    };

    let name = meta
        .name
        .as_deref()
        .map(clean_text)
        .filter(|n| !n.is_empty())
        .or_else(|| visible_name(block, link))?;

    let profile_url = meta
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|u| absolutize(base_url, u))
        .or_else(|| {
            link.and_then(|l| attr(l, "href"))
                .filter(|href| href.contains(PROFILE_PATH))
                .map(|href| absolutize(base_url, href))
        });

    let position = meta
        .jobtitle
        .as_deref()
        .and_then(normalize_position)
        .or_else(|| visible_position(block))
        .unwrap_or_else(|| "N/A".to_string());

    let photo_url = meta
        .image_url()
        .or_else(|| first(block, &IMG).and_then(|img| attr(img, "src")).map(str::to_string))
        .map(|src| absolutize(base_url, &src))
        .and_then(|src| upgrade_image_url(&src, PHOTO_SIZE));

    Some(RosterEntry {
        name,
        shirt_number: shirt_number(block).unwrap_or_else(|| "?".to_string()),
        position,
        is_starter,
        photo_url,
        profile_url,
        side: detect_side(block),
    })
}

fn visible_name(block: ElementRef<'_>, link: Option<ElementRef<'_>>) -> Option<String> {
    let candidate = first(block, &LINEUP_NAME)
        .or_else(|| first(block, &BENCH_NAME))
        .map(text_of)
        .or_else(|| link.map(text_of))?;
    let name = clean_text(&candidate);
    (!name.is_empty()).then_some(name)
}

fn shirt_number(block: ElementRef<'_>) -> Option<String> {
    let digits = |el: ElementRef<'_>| {
        let t = text_of(el);
        (!t.is_empty() && t.chars().all(|c| c.is_ascii_digit())).then_some(t)
    };
    first(block, &STARTER_NUMBER)
        .and_then(digits)
        .or_else(|| first(block, &BENCH_NUMBER).and_then(digits))
        .or_else(|| block.select(&BOLD).find_map(digits))
}

fn visible_position(block: ElementRef<'_>) -> Option<String> {
    let label = text_of(first(block, &ROLE_LABEL)?);
    label
        .split_whitespace()
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .find_map(normalize_position)
}

fn side_marker(el: ElementRef<'_>) -> Side {
    let classes: Vec<&str> = el.value().classes().collect();
    if classes.iter().any(|c| matches!(*c, "local" | "home")) {
        Side::Home
    } else if classes
        .iter()
        .any(|c| matches!(*c, "visitor" | "visitante" | "away"))
    {
        Side::Away
    } else {
        Side::Unknown
    }
}

/// Side marker on the block itself or one of its nearest containers.
pub fn detect_side(block: ElementRef<'_>) -> Side {
    std::iter::once(block)
        .chain(ancestors(block, SIDE_SEARCH_DEPTH))
        .map(side_marker)
        .find(|side| *side != Side::Unknown)
        .unwrap_or(Side::Unknown)
}

/// Map a position label or abbreviation to a canonical role name.
pub fn normalize_position(raw: &str) -> Option<String> {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    let canonical = match key.as_str() {
        "por" | "portero" | "gk" | "goalkeeper" => "Goalkeeper",
        "def" | "defensa" | "cb" | "lb" | "rb" | "defender" => "Defender",
        "med" | "medio" | "cm" | "dm" | "am" | "midfielder" => "Midfielder",
        "del" | "delantero" | "fw" | "st" | "forward" => "Forward",
        _ if key.chars().count() <= 10 => return Some(title_case(&key)),
        _ => return None,
    };
    Some(canonical.to_string())
}

fn title_case(raw: &str) -> String {
    raw.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
