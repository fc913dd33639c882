use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use scout_ingest::match_resolver::TeamHints;
use scout_ingest::pipeline::parse_date;
use scout_ingest::{PlayerId, Scout, ScoutConfig};

const USAGE: &str = "usage: scout <command> [args] [--db <path>]

commands:
  fixtures <YYYY-MM-DD> [--filter a,b]
  resolve <match-id> [--date D] [--home H] [--away A]
  lineups <id-or-url> [--date D] [--home H] [--away A]
  profile <url>
  sync <url> [--id N]
  sync-lineup <id-or-url> [--date D]
  career <player-id> [--all]";

/// Switches that never take a value.
const FLAGS: &[&str] = &["all", "help"];

#[derive(Debug, Default)]
struct CliArgs {
    positional: Vec<String>,
    options: HashMap<String, String>,
}

impl CliArgs {
    fn parse(raw: &[String]) -> Self {
        let mut out = CliArgs::default();
        let mut idx = 0;
        while idx < raw.len() {
            let arg = &raw[idx];
            idx += 1;
            let Some(key) = arg.strip_prefix("--") else {
                out.positional.push(arg.clone());
                continue;
            };
            if let Some((key, value)) = key.split_once('=') {
                out.options.insert(key.to_string(), value.trim().to_string());
                continue;
            }
            if FLAGS.contains(&key) {
                out.options.insert(key.to_string(), String::new());
                continue;
            }
            let Some(value) = raw.get(idx) else {
                continue;
            };
            idx += 1;
            out.options.insert(key.to_string(), value.trim().to_string());
        }
        out
    }

    fn command(&self) -> Option<&str> {
        self.positional.first().map(String::as_str)
    }

    fn target(&self) -> Result<&str> {
        self.positional
            .get(1)
            .map(String::as_str)
            .context("missing argument; see `scout --help`")
    }

    fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    fn date(&self) -> Result<Option<NaiveDate>> {
        self.option("date")
            .map(parse_date)
            .transpose()
            .context("parse --date")
    }

    fn hints(&self) -> TeamHints {
        TeamHints::new(self.option("home"), self.option("away"))
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let raw = std::env::args().skip(1).collect::<Vec<_>>();
    let args = CliArgs::parse(&raw);
    let Some(command) = args.command() else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    if args.flag("help") || command == "help" {
        println!("{USAGE}");
        return Ok(());
    }

    let mut config = ScoutConfig::from_env();
    if let Some(db) = args.option("db") {
        config.db_path = Some(PathBuf::from(db));
    }
    let scout = Scout::from_config(config).context("initialise scout pipeline")?;

    match command {
        "fixtures" => {
            let date = parse_date(args.target()?)?;
            let fixtures = scout
                .discover_fixtures(date, args.option("filter").unwrap_or(""))
                .with_context(|| format!("discover fixtures for {date}"))?;
            print_json(&fixtures)
        }
        "resolve" => {
            let match_id = args.target()?;
            let url = scout
                .resolve_fixture_url(match_id, &args.hints(), args.date()?, None)
                .with_context(|| format!("resolve match {match_id}"))?;
            print_json(&serde_json::json!({ "match_id": match_id, "url": url }))
        }
        "lineups" => {
            let target = args.target()?;
            let lineups = scout
                .lineups_for_match(target, &args.hints(), args.date()?)
                .with_context(|| format!("extract lineups for {target}"))?;
            print_json(&lineups)
        }
        "profile" => {
            let url = args.target()?;
            let profile = scout
                .extract_player_profile(url)
                .with_context(|| format!("extract profile {url}"))?;
            print_json(&profile)
        }
        "sync" => {
            let url = args.target()?;
            let explicit = args
                .option("id")
                .map(|raw| raw.parse::<i64>().map(PlayerId))
                .transpose()
                .context("parse --id")?;
            let summary = scout
                .sync_player(url, explicit)
                .with_context(|| format!("sync player {url}"))?;
            print_json(&summary)
        }
        "sync-lineup" => {
            let target = args.target()?;
            let lineups = scout
                .lineups_for_match(target, &args.hints(), args.date()?)
                .with_context(|| format!("extract lineups for {target}"))?;
            let outcomes = scout.sync_lineup(&lineups, None);
            print_json(&outcomes)
        }
        "career" => {
            let id = PlayerId(args.target()?.parse::<i64>().context("parse player id")?);
            let player = scout
                .store()
                .get_player(id)?
                .with_context(|| format!("player {id} not found"))?;
            let career = scout.store().player_career(id, args.flag("all"))?;
            print_json(&serde_json::json!({ "player": player, "career": career }))
        }
        other => Err(anyhow!("unknown command {other:?}\n\n{USAGE}")),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialise output")?;
    println!("{out}");
    Ok(())
}
