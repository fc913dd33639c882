use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://es.besoccer.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const DEFAULT_ACCEPT_LANGUAGE: &str = "es-ES,es;q=0.5";
const CACHE_DIR: &str = "scout";
const DB_FILE: &str = "players.sqlite";

#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub base_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout: Duration,
    pub min_body_bytes: usize,
    pub cache_ttl: Duration,
    /// Day offsets relative to today scanned when resolving a bare match id.
    pub fallback_day_offsets: Vec<i64>,
    pub db_path: Option<PathBuf>,
    pub fetch_parallelism: usize,
    /// Refuse ambiguous name-only matches instead of merging into the oldest.
    pub strict_name_matches: bool,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            request_timeout: Duration::from_secs(8),
            min_body_bytes: 1000,
            cache_ttl: Duration::from_secs(1800),
            fallback_day_offsets: vec![-1, 0, 1],
            db_path: default_db_path(),
            fetch_parallelism: 4,
            strict_name_matches: false,
        }
    }
}

impl ScoutConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = env_string("SCOUT_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        let user_agent = env_string("SCOUT_USER_AGENT").unwrap_or(defaults.user_agent);
        let accept_language =
            env_string("SCOUT_ACCEPT_LANGUAGE").unwrap_or(defaults.accept_language);
        let timeout_secs = env_parse::<u64>("SCOUT_TIMEOUT_SECS")
            .unwrap_or(defaults.request_timeout.as_secs())
            .clamp(1, 10);
        let min_body_bytes =
            env_parse::<usize>("SCOUT_MIN_BODY_BYTES").unwrap_or(defaults.min_body_bytes);
        let ttl_secs = env_parse::<u64>("SCOUT_CACHE_TTL_SECS")
            .unwrap_or(defaults.cache_ttl.as_secs())
            .clamp(60, 7200);
        let fallback_day_offsets = env_string("SCOUT_FALLBACK_DAYS")
            .map(|raw| parse_offsets(&raw))
            .unwrap_or(defaults.fallback_day_offsets);
        let db_path = env_string("SCOUT_DB")
            .map(PathBuf::from)
            .or(defaults.db_path);
        let fetch_parallelism = env_parse::<usize>("FETCH_PARALLELISM")
            .unwrap_or(defaults.fetch_parallelism)
            .clamp(1, 16);
        let strict_name_matches = env_string("SCOUT_STRICT_NAMES")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.strict_name_matches);

        Self {
            base_url,
            user_agent,
            accept_language,
            request_timeout: Duration::from_secs(timeout_secs),
            min_body_bytes,
            cache_ttl: Duration::from_secs(ttl_secs),
            fallback_day_offsets,
            db_path,
            fetch_parallelism,
            strict_name_matches,
        }
    }

    /// Listing page for one calendar day.
    pub fn livescore_url(&self, date: chrono::NaiveDate) -> String {
        format!("{}/livescore/{}", self.base_url, date.format("%Y-%m-%d"))
    }
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

pub fn default_db_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(DB_FILE))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_offsets(raw: &str) -> Vec<i64> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']) {
        let Ok(offset) = part.trim().parse::<i64>() else {
            continue;
        };
        if !out.contains(&offset) {
            out.push(offset);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets_and_dedups() {
        assert_eq!(parse_offsets("-1,0,1"), vec![-1, 0, 1]);
        assert_eq!(parse_offsets("0; 0 -2, x"), vec![0, -2]);
        assert!(parse_offsets("").is_empty());
    }

    #[test]
    fn livescore_url_uses_iso_date() {
        let cfg = ScoutConfig {
            base_url: "https://example.test".to_string(),
            ..ScoutConfig::default()
        };
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            cfg.livescore_url(date),
            "https://example.test/livescore/2024-03-09"
        );
    }
}
