use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ScoutConfig;
use crate::error::{Result, ScoutError};
use crate::html::{
    Strategy, absolutize, attr, collapse_ws, first, first_success, parse_count, parse_number, sel,
    text_of, upgrade_image_url,
};
use crate::http_client::FetchHtml;

const PHOTO_SIZE: u32 = 500;
const MIN_NAME_CHARS: usize = 2;
const MAX_NAME_CHARS: usize = 60;
/// Words that only ever appear in page chrome, never in a player's name.
const BOILERPLATE_WORDS: &[&str] = &[
    "estadísticas",
    "estadisticas",
    "statistics",
    "trayectoria",
    "career",
    "noticias",
];
const SITE_MARKER: &str = "besoccer";

static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| sel(r#"meta[property="og:title"], meta[name="og:title"]"#));
static TITLE: Lazy<Selector> = Lazy::new(|| sel("title"));
static H1: Lazy<Selector> = Lazy::new(|| sel("h1"));
static BREADCRUMB_LAST: Lazy<Selector> = Lazy::new(|| sel(".breadcrumb li:last-child"));
static PLAYER_IMG: Lazy<Selector> =
    Lazy::new(|| sel(r#".img-container img[src*="img_data/players"]"#));
static META_IMAGE: Lazy<Selector> = Lazy::new(|| {
    sel(r#"meta[property="og:image"], meta[name="og:image"], meta[name="twitter:image"], meta[property="twitter:image"]"#)
});
static FLAG: Lazy<Selector> = Lazy::new(|| sel(".img-container img.flag"));
static STAT: Lazy<Selector> = Lazy::new(|| sel(".panel-body.stat-list .stat"));
static BIG_ROW: Lazy<Selector> = Lazy::new(|| sel(".big-row"));
static SMALL_ROW: Lazy<Selector> = Lazy::new(|| sel(".small-row"));
static ROLE_BADGE: Lazy<Selector> = Lazy::new(|| sel(".round-row.bg-role span"));
static ROUND_VALUE: Lazy<Selector> = Lazy::new(|| sel(".round-row span"));
static PERSONAL_ROW: Lazy<Selector> =
    Lazy::new(|| sel(".panel-body.table-list .table-body .table-row"));
static DIV: Lazy<Selector> = Lazy::new(|| sel("div"));
static IMAGE_ROW: Lazy<Selector> = Lazy::new(|| sel(".image-row"));
static BIRTH_PARAGRAPH: Lazy<Selector> = Lazy::new(|| sel(".panel-body.ta-c p"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| sel("p"));
static PANEL_SUBTITLE: Lazy<Selector> = Lazy::new(|| sel(".panel-head .panel-subtitle"));
static POSITION_LIST_SPAN: Lazy<Selector> =
    Lazy::new(|| sel(".role-box ul.position-list li:first-child span"));
static CURRENT_TEAM: Lazy<Selector> = Lazy::new(|| sel(r#"a[data-cy="currentTeam"]"#));
static CURRENT_COMPETITION: Lazy<Selector> =
    Lazy::new(|| sel(r#"a[data-cy="currentCompetition"]"#));
static IMG: Lazy<Selector> = Lazy::new(|| sel("img"));
static CAREER_ROWS: Lazy<Selector> =
    Lazy::new(|| sel(".team-result table.table_parents tbody tr"));
static CAREER_ROWS_LOOSE: Lazy<Selector> = Lazy::new(|| sel("table.table_parents tr"));
static TD: Lazy<Selector> = Lazy::new(|| sel("td"));
static SPAN: Lazy<Selector> = Lazy::new(|| sel("span"));

static STATS_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:estad[íi]sticas|statistics|stats)\s+(.+?),").expect("static regex")
});
static BIRTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:nacido el|born on)\s+(\d{1,2})\s+(?:de\s+)?([a-záéíóúñ]+)\s+(?:de\s+)?(\d{4})")
        .expect("static regex")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    pub full_name: Option<String>,
    pub age: Option<u32>,
    pub birthdate: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub position: Option<String>,
    /// First entry of the detailed position list, e.g. "Lateral derecho".
    pub secondary_position: Option<String>,
    pub foot: Option<String>,
    pub shirt_number: Option<u32>,
    pub market_value_keur: Option<u32>,
    pub rating: Option<u32>,
    pub current_team: Option<String>,
    pub current_team_crest_url: Option<String>,
    pub current_competition: Option<String>,
    pub photo_url: Option<String>,
    pub source_url: Option<String>,
}

/// One season/club line of a career table. `competition == None` is the
/// season aggregate; other rows break it down per competition.
/// Statistic fields are `None` when their column group was not reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CareerRow {
    pub season: String,
    pub club: String,
    pub competition: Option<String>,
    pub matches_played: Option<u32>,
    pub goals: Option<u32>,
    pub assists: Option<u32>,
    pub yellow_cards: Option<u32>,
    pub red_cards: Option<u32>,
    pub starts: Option<u32>,
    pub substitutions: Option<u32>,
    pub minutes: Option<u32>,
    pub age_at_time: Option<u32>,
    pub rating: Option<f64>,
    pub elo: Option<u32>,
}

impl CareerRow {
    pub fn is_aggregate(&self) -> bool {
        self.competition.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedProfile {
    pub bio: PlayerProfile,
    pub career: Vec<CareerRow>,
}

pub struct ProfileExtractor {
    fetcher: Arc<dyn FetchHtml>,
    config: Arc<ScoutConfig>,
}

impl ProfileExtractor {
    pub fn new(fetcher: Arc<dyn FetchHtml>, config: Arc<ScoutConfig>) -> Self {
        Self { fetcher, config }
    }

    pub fn extract(&self, profile_url: &str) -> Result<ScrapedProfile> {
        let html = self.fetcher.fetch(profile_url)?;
        let profile = parse_profile(&html, profile_url, &self.config.base_url)?;
        info!(
            url = profile_url,
            name = %profile.bio.name,
            career_rows = profile.career.len(),
            "extracted player profile"
        );
        Ok(profile)
    }
}

pub fn parse_profile(html: &str, source_url: &str, base_url: &str) -> Result<ScrapedProfile> {
    let doc = Html::parse_document(html);
    let bio = parse_bio(&doc, source_url, base_url)?;
    let career = parse_career_table(&doc);
    Ok(ScrapedProfile { bio, career })
}

/// Reduce a title/heading candidate to a bare player name, or reject it.
pub fn sanitize_player_name(raw: &str) -> Option<String> {
    let mut name = collapse_ws(raw);
    if let Some(caps) = STATS_PREFIX_RE.captures(&name) {
        name = caps.get(1).map(|m| m.as_str().trim().to_string())?;
    }
    if let Some((head, _)) = name.split_once(" | ") {
        name = head.trim().to_string();
    }

    let lower = name.to_lowercase();
    if lower.contains(SITE_MARKER) {
        return None;
    }
    if lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| BOILERPLATE_WORDS.contains(&word))
    {
        return None;
    }
    let len = name.chars().count();
    if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&len) {
        return None;
    }
    Some(name)
}

const NAME_STRATEGIES: &[Strategy<Html, String>] = &[
    ("title-meta", name_from_title),
    ("heading", name_from_heading),
    ("breadcrumb", name_from_breadcrumb),
];

fn name_from_title(doc: &Html) -> Option<String> {
    let og = doc
        .select(&OG_TITLE)
        .find_map(|m| attr(m, "content"))
        .and_then(sanitize_player_name);
    og.or_else(|| doc.select(&TITLE).next().map(text_of).and_then(|t| sanitize_player_name(&t)))
}

fn name_from_heading(doc: &Html) -> Option<String> {
    sanitize_player_name(&text_of(doc.select(&H1).next()?))
}

fn name_from_breadcrumb(doc: &Html) -> Option<String> {
    sanitize_player_name(&text_of(doc.select(&BREADCRUMB_LAST).next()?))
}

fn parse_bio(doc: &Html, source_url: &str, base_url: &str) -> Result<PlayerProfile> {
    let Some((name, strategy)) = first_success(doc, NAME_STRATEGIES) else {
        return Err(ScoutError::validation(format!(
            "no trustworthy player name on {source_url}"
        )));
    };
    debug!(%name, strategy, "player name extracted");

    let mut bio = PlayerProfile {
        name,
        source_url: Some(source_url.to_string()),
        photo_url: photo_url(doc, base_url),
        ..PlayerProfile::default()
    };

    for stat in doc.select(&STAT) {
        read_stat(stat, &mut bio);
    }

    let personal = personal_data(doc);
    bio.full_name = first_text(doc, &PANEL_SUBTITLE).or(personal.full_name);
    bio.foot = personal.foot;
    bio.nationality = personal
        .nationality
        .or_else(|| flag_nationality(doc))
        .or(personal.birth_country);

    bio.birthdate = doc
        .select(&BIRTH_PARAGRAPH)
        .chain(doc.select(&PARAGRAPH))
        .find_map(|p| parse_birthdate(&text_of(p)));

    bio.secondary_position = first_text(doc, &POSITION_LIST_SPAN);
    if let Some(team) = doc.select(&CURRENT_TEAM).next() {
        bio.current_team = Some(text_of(team)).filter(|t| !t.is_empty());
        bio.current_team_crest_url = first(team, &IMG)
            .and_then(|img| attr(img, "src"))
            .map(|src| absolutize(base_url, src));
    }
    bio.current_competition = first_text(doc, &CURRENT_COMPETITION);

    Ok(bio)
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector).map(text_of).find(|t| !t.is_empty())
}

fn photo_url(doc: &Html, base_url: &str) -> Option<String> {
    doc.select(&PLAYER_IMG)
        .find_map(|img| attr(img, "src"))
        .or_else(|| doc.select(&META_IMAGE).find_map(|m| attr(m, "content")))
        .map(|src| absolutize(base_url, src))
        .and_then(|src| upgrade_image_url(&src, PHOTO_SIZE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatUnit {
    Age,
    Weight,
    Height,
    MillionsEur,
    ThousandsEur,
    Elo,
    ShirtNumber,
}

/// Identify a stat block by the unit printed under its value.
fn stat_unit(label: &str) -> Option<StatUnit> {
    let key: String = label
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    match key.as_str() {
        "años" | "anos" | "years" | "yrs" | "age" => Some(StatUnit::Age),
        "kgs" | "kg" => Some(StatUnit::Weight),
        "cms" | "cm" => Some(StatUnit::Height),
        "m€" | "meur" => Some(StatUnit::MillionsEur),
        "k€" | "keur" => Some(StatUnit::ThousandsEur),
        "elo" => Some(StatUnit::Elo),
        "dorsal" | "shirt" | "shirtnumber" | "number" => Some(StatUnit::ShirtNumber),
        _ => None,
    }
}

fn read_stat(stat: ElementRef<'_>, bio: &mut PlayerProfile) {
    if let Some(badge) = first(stat, &ROLE_BADGE) {
        let abbr = text_of(badge);
        if !abbr.is_empty() {
            bio.position = Some(abbr);
        }
    }

    let big = first(stat, &BIG_ROW).map(text_of).unwrap_or_default();
    let round = first(stat, &ROUND_VALUE).map(text_of);

    for unit in stat.select(&SMALL_ROW).filter_map(|s| stat_unit(&text_of(s))) {
        match unit {
            StatUnit::Age => bio.age = parse_count(&big).or(bio.age),
            StatUnit::Weight => bio.weight_kg = parse_number(&big).or(bio.weight_kg),
            StatUnit::Height => bio.height_cm = parse_number(&big).or(bio.height_cm),
            StatUnit::MillionsEur => {
                if let Some(v) = parse_number(&big) {
                    bio.market_value_keur = Some((v * 1000.0).round() as u32);
                }
            }
            StatUnit::ThousandsEur => {
                if let Some(v) = parse_number(&big) {
                    bio.market_value_keur = Some(v.round() as u32);
                }
            }
            StatUnit::Elo => {
                let value = round.as_deref().and_then(parse_count).or_else(|| parse_count(&big));
                bio.rating = value.or(bio.rating);
            }
            StatUnit::ShirtNumber => {
                let value = round.as_deref().and_then(parse_count).or_else(|| parse_count(&big));
                bio.shirt_number = value.or(bio.shirt_number);
            }
        }
    }
}

#[derive(Debug, Default)]
struct PersonalData {
    nationality: Option<String>,
    birth_country: Option<String>,
    foot: Option<String>,
    full_name: Option<String>,
}

fn personal_data(doc: &Html) -> PersonalData {
    let mut out = PersonalData::default();
    for row in doc.select(&PERSONAL_ROW) {
        let Some(key) = first(row, &DIV).map(text_of) else {
            continue;
        };
        let value = first(row, &IMAGE_ROW)
            .or_else(|| row.children().filter_map(ElementRef::wrap).last())
            .map(text_of)
            .filter(|v| !v.is_empty() && *v != key);
        let Some(value) = value else {
            continue;
        };
        let key = key.to_lowercase();
        if key.contains("nacionalidad") || key.contains("nationality") {
            out.nationality = Some(value);
        } else if key.contains("país nacimiento")
            || key.contains("pais nacimiento")
            || key.contains("country of birth")
        {
            out.birth_country = Some(value);
        } else if key.contains("pie preferido") || key.contains("preferred foot") {
            out.foot = Some(value);
        } else if key.contains("nombre completo") || key.contains("full name") {
            out.full_name = Some(value);
        }
    }
    out
}

fn flag_nationality(doc: &Html) -> Option<String> {
    let code = doc.select(&FLAG).find_map(|img| attr(img, "alt"))?;
    Some(country_from_code(code))
}

/// Country name for a flag's two-letter code; unknown codes are upper-cased.
pub fn country_from_code(code: &str) -> String {
    let code = code.trim().to_lowercase();
    let name = match code.as_str() {
        "es" => "España",
        "ar" => "Argentina",
        "fr" => "Francia",
        "it" => "Italia",
        "de" => "Alemania",
        "pt" => "Portugal",
        "br" => "Brasil",
        "gb" | "en" => "Inglaterra",
        "nl" => "Países Bajos",
        "uy" => "Uruguay",
        "mx" => "México",
        "cl" => "Chile",
        "co" => "Colombia",
        "pe" => "Perú",
        _ => return code.to_uppercase(),
    };
    name.to_string()
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "enero" | "january" => 1,
        "febrero" | "february" => 2,
        "marzo" | "march" => 3,
        "abril" | "april" => 4,
        "mayo" | "may" => 5,
        "junio" | "june" => 6,
        "julio" | "july" => 7,
        "agosto" | "august" => 8,
        "septiembre" | "setiembre" | "september" => 9,
        "octubre" | "october" => 10,
        "noviembre" | "november" => 11,
        "diciembre" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

/// Birth date from a sentence such as "Nacido el 11 mayo 1988 en Sevilla".
pub fn parse_birthdate(text: &str) -> Option<NaiveDate> {
    let caps = BIRTH_RE.captures(text)?;
    let day = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let month = month_number(caps.get(2)?.as_str())?;
    let year = caps.get(3)?.as_str().parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Two-level walk of the career table: a parent row opens a (season, club)
/// context and yields its aggregate; child rows until the next parent yield
/// per-competition breakdowns. Children before any parent are dropped.
pub fn parse_career_table(doc: &Html) -> Vec<CareerRow> {
    let mut rows: Vec<ElementRef<'_>> = doc.select(&CAREER_ROWS).collect();
    if rows.is_empty() {
        rows = doc.select(&CAREER_ROWS_LOOSE).collect();
    }

    let mut out = Vec::new();
    let mut context: Option<(String, String)> = None;
    for tr in rows {
        let classes: Vec<&str> = tr.value().classes().collect();
        let cells: Vec<ElementRef<'_>> = tr.select(&TD).collect();
        if cells.is_empty() {
            continue;
        }

        if classes.contains(&"parent_row") {
            let club = cell_label(cells[0]);
            let season = cells.get(1).map(|c| text_of(*c)).unwrap_or_default();
            if club.is_empty() || season.is_empty() {
                context = None;
                continue;
            }
            let mut row = CareerRow {
                season: season.clone(),
                club: club.clone(),
                ..CareerRow::default()
            };
            read_stat_groups(&cells, &mut row);
            out.push(row);
            context = Some((season, club));
        } else if classes.contains(&"parent_son") {
            let Some((season, club)) = context.as_ref() else {
                continue;
            };
            let competition = cell_label(cells[0]);
            if competition.is_empty() {
                continue;
            }
            let mut row = CareerRow {
                season: season.clone(),
                club: club.clone(),
                competition: Some(competition),
                ..CareerRow::default()
            };
            read_stat_groups(&cells, &mut row);
            out.push(row);
        }
    }
    debug!(rows = out.len(), "parsed career table");
    out
}

fn cell_label(cell: ElementRef<'_>) -> String {
    first(cell, &SPAN)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| text_of(cell))
}

fn group<'a>(cells: &[ElementRef<'a>], tab: &str, min: usize) -> Option<Vec<String>> {
    let values: Vec<String> = cells
        .iter()
        .filter(|c| c.value().attr("data-content-tab") == Some(tab))
        .map(|c| text_of(*c))
        .collect();
    (values.len() >= min).then_some(values)
}

/// A reported count that cannot be read counts as zero.
fn count_or_zero(raw: &str) -> Option<u32> {
    Some(parse_count(raw).unwrap_or(0))
}

fn read_stat_groups(cells: &[ElementRef<'_>], row: &mut CareerRow) {
    if let Some(perf) = group(cells, "tprc1", 5) {
        row.matches_played = count_or_zero(&perf[0]);
        row.goals = count_or_zero(&perf[1]);
        row.assists = count_or_zero(&perf[2]);
        row.yellow_cards = count_or_zero(&perf[3]);
        row.red_cards = count_or_zero(&perf[4]);
    }
    if let Some(part) = group(cells, "tptc1", 4) {
        row.matches_played = parse_count(&part[0]).or(row.matches_played).or(Some(0));
        row.starts = count_or_zero(&part[1]);
        row.substitutions = count_or_zero(&part[2]);
        row.minutes = count_or_zero(&part[3]);
    }
    if let Some(cond) = group(cells, "tcdc1", 3) {
        row.age_at_time = parse_count(&cond[0]);
        row.rating = parse_number(&cond[1]);
        row.elo = parse_count(&cond[2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_title_boilerplate() {
        assert_eq!(
            sanitize_player_name("Estadísticas Juan Pérez, Club X | Site").as_deref(),
            Some("Juan Pérez")
        );
        assert_eq!(
            sanitize_player_name("Statistics John Smith, Town FC").as_deref(),
            Some("John Smith")
        );
        assert_eq!(
            sanitize_player_name("  Sergio   Ramos | BeSoccer ").as_deref(),
            Some("Sergio Ramos")
        );
        assert_eq!(sanitize_player_name("Newson Jones").as_deref(), Some("Newson Jones"));
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(sanitize_player_name("J"), None);
        assert_eq!(sanitize_player_name(&"a".repeat(61)), None);
        assert_eq!(sanitize_player_name("Trayectoria de Juan"), None);
        assert_eq!(sanitize_player_name("BeSoccer"), None);
        assert_eq!(sanitize_player_name(""), None);
    }

    #[test]
    fn birthdates_in_both_languages() {
        assert_eq!(
            parse_birthdate("Nacido el 11 mayo 1988"),
            NaiveDate::from_ymd_opt(1988, 5, 11)
        );
        assert_eq!(
            parse_birthdate("Nacido el 17 de junio de 2003 en Sevilla"),
            NaiveDate::from_ymd_opt(2003, 6, 17)
        );
        assert_eq!(
            parse_birthdate("Born on 2 February 1999"),
            NaiveDate::from_ymd_opt(1999, 2, 2)
        );
        assert_eq!(parse_birthdate("Nacido el 31 febrero 2000"), None);
        assert_eq!(parse_birthdate("Nacido el 3 brumario 2000"), None);
    }

    #[test]
    fn stat_units_by_label() {
        assert_eq!(stat_unit("Años"), Some(StatUnit::Age));
        assert_eq!(stat_unit("kgs"), Some(StatUnit::Weight));
        assert_eq!(stat_unit("M.€"), Some(StatUnit::MillionsEur));
        assert_eq!(stat_unit("K€"), Some(StatUnit::ThousandsEur));
        assert_eq!(stat_unit("ELO"), Some(StatUnit::Elo));
        assert_eq!(stat_unit("Dorsal"), Some(StatUnit::ShirtNumber));
        assert_eq!(stat_unit("España"), None);
    }

    #[test]
    fn flag_codes_map_to_names() {
        assert_eq!(country_from_code("ES"), "España");
        assert_eq!(country_from_code("gb"), "Inglaterra");
        assert_eq!(country_from_code("jp"), "JP");
    }
}
