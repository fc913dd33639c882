use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};
use crate::html::collapse_ws;
use crate::profile::{CareerRow, PlayerProfile};

/// Opaque store identifier of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub i64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    #[serde(flatten)]
    pub profile: PlayerProfile,
    pub updated_at: String,
}

/// A name-only resolution that had more than one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionWarning {
    pub name: String,
    pub candidate_ids: Vec<PlayerId>,
    pub chosen_id: PlayerId,
    pub source_url: Option<String>,
    pub created_at: String,
}

/// Lookup key for names: lower-case, whitespace collapsed.
pub fn name_key(name: &str) -> String {
    collapse_ws(name).to_lowercase()
}

pub struct PlayerStore {
    conn: Mutex<Connection>,
}

impl PlayerStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            // Opening below reports the real failure; this names the cause.
            warn!(dir = %parent.display(), error = %err, "could not create store directory");
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        info!(path = %path.display(), "opened player store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction; an error rolls everything back.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn get_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
        get_player(&self.lock(), id)
    }

    pub fn player_count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Career rows, newest season first. Aggregates only unless
    /// `include_competitions` asks for the per-competition breakdown too.
    pub fn player_career(&self, id: PlayerId, include_competitions: bool) -> Result<Vec<CareerRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT season, club, competition, matches_played, goals, assists,
                   yellow_cards, red_cards, starts, substitutions, minutes,
                   age_at_time, rating, elo
            FROM player_career
            WHERE player_id = ?1 AND (?2 OR competition = '')
            ORDER BY season DESC, club ASC, competition ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![id.0, include_competitions], career_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upsert one career row for an existing player.
    pub fn upsert_career_row(&self, id: PlayerId, row: &CareerRow) -> Result<()> {
        self.with_tx(|tx| {
            if !player_exists(tx, id)? {
                return Err(ScoutError::UnknownPlayer(id.0));
            }
            upsert_career(tx, id, row)
        })
    }

    pub fn resolution_warnings(&self) -> Result<Vec<ResolutionWarning>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name, candidate_ids, chosen_id, source_url, created_at
             FROM resolution_warnings ORDER BY id ASC",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(name, candidates, chosen, source_url, created_at)| -> Result<_> {
                Ok(ResolutionWarning {
                    name,
                    candidate_ids: serde_json::from_str(&candidates)?,
                    chosen_id: PlayerId(chosen),
                    source_url,
                    created_at,
                })
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            age INTEGER NULL,
            birthdate TEXT NULL,
            nationality TEXT NULL,
            height_cm REAL NULL,
            weight_kg REAL NULL,
            position TEXT NULL,
            foot TEXT NULL,
            shirt_number INTEGER NULL,
            market_value_keur INTEGER NULL,
            rating INTEGER NULL,
            photo_url TEXT NULL,
            source_url TEXT NULL,
            updated_at TEXT NOT NULL,
            full_name TEXT NULL,
            secondary_position TEXT NULL,
            current_team TEXT NULL,
            current_team_crest_url TEXT NULL,
            current_competition TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_players_name_key ON players(name_key);
        CREATE INDEX IF NOT EXISTS idx_players_source_url ON players(source_url);

        CREATE TABLE IF NOT EXISTS player_career (
            player_id INTEGER NOT NULL REFERENCES players(id),
            season TEXT NOT NULL,
            club TEXT NOT NULL,
            competition TEXT NOT NULL DEFAULT '',
            matches_played INTEGER NULL,
            goals INTEGER NULL,
            assists INTEGER NULL,
            yellow_cards INTEGER NULL,
            red_cards INTEGER NULL,
            starts INTEGER NULL,
            substitutions INTEGER NULL,
            minutes INTEGER NULL,
            age_at_time INTEGER NULL,
            rating REAL NULL,
            elo INTEGER NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(player_id, season, club, competition)
        );
        CREATE INDEX IF NOT EXISTS idx_career_player ON player_career(player_id);

        CREATE TABLE IF NOT EXISTS resolution_warnings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            candidate_ids TEXT NOT NULL,
            chosen_id INTEGER NOT NULL,
            source_url TEXT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )?;
    add_missing_columns(conn, "players", LATER_PLAYER_COLUMNS)?;
    Ok(())
}

/// Player columns added after the first schema; older files gain them on open.
const LATER_PLAYER_COLUMNS: &[&str] = &[
    "full_name",
    "secondary_position",
    "current_team",
    "current_team_crest_url",
    "current_competition",
];

fn add_missing_columns(conn: &Connection, table: &str, columns: &[&str]) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for column in columns {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} TEXT NULL"))?;
            info!(table, column, "added store column");
        }
    }
    Ok(())
}

const PLAYER_COLUMNS: &str = "id, name, age, birthdate, nationality, height_cm, weight_kg, \
     position, foot, shirt_number, market_value_keur, rating, photo_url, source_url, updated_at, \
     full_name, secondary_position, current_team, current_team_crest_url, current_competition";

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerRecord> {
    let birthdate: Option<String> = row.get(3)?;
    Ok(PlayerRecord {
        id: PlayerId(row.get(0)?),
        profile: PlayerProfile {
            name: row.get(1)?,
            full_name: row.get(15)?,
            age: row.get(2)?,
            birthdate: birthdate.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            nationality: row.get(4)?,
            height_cm: row.get(5)?,
            weight_kg: row.get(6)?,
            position: row.get(7)?,
            secondary_position: row.get(16)?,
            foot: row.get(8)?,
            shirt_number: row.get(9)?,
            market_value_keur: row.get(10)?,
            rating: row.get(11)?,
            current_team: row.get(17)?,
            current_team_crest_url: row.get(18)?,
            current_competition: row.get(19)?,
            photo_url: row.get(12)?,
            source_url: row.get(13)?,
        },
        updated_at: row.get(14)?,
    })
}

fn career_from_row(row: &Row<'_>) -> rusqlite::Result<CareerRow> {
    let competition: String = row.get(2)?;
    Ok(CareerRow {
        season: row.get(0)?,
        club: row.get(1)?,
        competition: (!competition.is_empty()).then_some(competition),
        matches_played: row.get(3)?,
        goals: row.get(4)?,
        assists: row.get(5)?,
        yellow_cards: row.get(6)?,
        red_cards: row.get(7)?,
        starts: row.get(8)?,
        substitutions: row.get(9)?,
        minutes: row.get(10)?,
        age_at_time: row.get(11)?,
        rating: row.get(12)?,
        elo: row.get(13)?,
    })
}

pub(crate) fn get_player(conn: &Connection, id: PlayerId) -> Result<Option<PlayerRecord>> {
    let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.0], player_from_row).optional()?)
}

pub(crate) fn player_exists(conn: &Connection, id: PlayerId) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM players WHERE id = ?1", params![id.0], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn find_by_source_url(conn: &Connection, url: &str) -> Result<Option<PlayerId>> {
    let id = conn
        .query_row(
            "SELECT id FROM players WHERE source_url = ?1 ORDER BY id ASC LIMIT 1",
            params![url],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id.map(PlayerId))
}

pub(crate) fn find_by_name_and_birthdate(
    conn: &Connection,
    name: &str,
    birthdate: NaiveDate,
) -> Result<Option<PlayerId>> {
    let id = conn
        .query_row(
            "SELECT id FROM players WHERE name_key = ?1 AND birthdate = ?2 ORDER BY id ASC LIMIT 1",
            params![name_key(name), birthdate.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id.map(PlayerId))
}

/// Players sharing the name, oldest first. With a known birth date, players
/// recorded with a different one are not candidates.
pub(crate) fn find_by_name(
    conn: &Connection,
    name: &str,
    birthdate: Option<NaiveDate>,
) -> Result<Vec<PlayerId>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM players
         WHERE name_key = ?1 AND (?2 IS NULL OR birthdate IS NULL OR birthdate = ?2)
         ORDER BY id ASC",
    )?;
    let ids = stmt
        .query_map(
            params![name_key(name), birthdate.map(|d| d.to_string())],
            |row| row.get::<_, i64>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().map(PlayerId).collect())
}

pub(crate) fn insert_player(conn: &Connection, profile: &PlayerProfile) -> Result<PlayerId> {
    conn.execute(
        r#"
        INSERT INTO players (
            name, name_key, age, birthdate, nationality, height_cm, weight_kg,
            position, foot, shirt_number, market_value_keur, rating,
            photo_url, source_url, updated_at,
            full_name, secondary_position, current_team, current_team_crest_url,
            current_competition
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20
        )
        "#,
        params![
            collapse_ws(&profile.name),
            name_key(&profile.name),
            profile.age,
            profile.birthdate.map(|d| d.to_string()),
            non_empty(&profile.nationality),
            profile.height_cm,
            profile.weight_kg,
            non_empty(&profile.position),
            non_empty(&profile.foot),
            profile.shirt_number,
            profile.market_value_keur,
            profile.rating,
            non_empty(&profile.photo_url),
            non_empty(&profile.source_url),
            Utc::now().to_rfc3339(),
            non_empty(&profile.full_name),
            non_empty(&profile.secondary_position),
            non_empty(&profile.current_team),
            non_empty(&profile.current_team_crest_url),
            non_empty(&profile.current_competition),
        ],
    )?;
    let id = PlayerId(conn.last_insert_rowid());
    debug!(%id, name = %profile.name, "inserted player");
    Ok(id)
}

/// Non-destructive merge: a field only changes when the incoming value is
/// present and non-empty.
pub(crate) fn merge_player(conn: &Connection, id: PlayerId, profile: &PlayerProfile) -> Result<()> {
    let name = Some(collapse_ws(&profile.name)).filter(|n| !n.is_empty());
    let changed = conn.execute(
        r#"
        UPDATE players SET
            name = COALESCE(?2, name),
            name_key = COALESCE(?3, name_key),
            age = COALESCE(?4, age),
            birthdate = COALESCE(?5, birthdate),
            nationality = COALESCE(?6, nationality),
            height_cm = COALESCE(?7, height_cm),
            weight_kg = COALESCE(?8, weight_kg),
            position = COALESCE(?9, position),
            foot = COALESCE(?10, foot),
            shirt_number = COALESCE(?11, shirt_number),
            market_value_keur = COALESCE(?12, market_value_keur),
            rating = COALESCE(?13, rating),
            photo_url = COALESCE(?14, photo_url),
            source_url = COALESCE(?15, source_url),
            updated_at = ?16,
            full_name = COALESCE(?17, full_name),
            secondary_position = COALESCE(?18, secondary_position),
            current_team = COALESCE(?19, current_team),
            current_team_crest_url = COALESCE(?20, current_team_crest_url),
            current_competition = COALESCE(?21, current_competition)
        WHERE id = ?1
        "#,
        params![
            id.0,
            name.as_deref(),
            name.as_deref().map(name_key),
            profile.age,
            profile.birthdate.map(|d| d.to_string()),
            non_empty(&profile.nationality),
            profile.height_cm,
            profile.weight_kg,
            non_empty(&profile.position),
            non_empty(&profile.foot),
            profile.shirt_number,
            profile.market_value_keur,
            profile.rating,
            non_empty(&profile.photo_url),
            non_empty(&profile.source_url),
            Utc::now().to_rfc3339(),
            non_empty(&profile.full_name),
            non_empty(&profile.secondary_position),
            non_empty(&profile.current_team),
            non_empty(&profile.current_team_crest_url),
            non_empty(&profile.current_competition),
        ],
    )?;
    if changed == 0 {
        return Err(ScoutError::UnknownPlayer(id.0));
    }
    debug!(%id, "merged player");
    Ok(())
}

pub(crate) fn upsert_career(conn: &Connection, id: PlayerId, row: &CareerRow) -> Result<()> {
    let season = row.season.trim();
    let club = row.club.trim();
    if season.is_empty() || club.is_empty() {
        return Err(ScoutError::validation("career row needs a season and a club"));
    }
    conn.execute(
        r#"
        INSERT INTO player_career (
            player_id, season, club, competition,
            matches_played, goals, assists, yellow_cards, red_cards,
            starts, substitutions, minutes, age_at_time, rating, elo, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT(player_id, season, club, competition) DO UPDATE SET
            matches_played = COALESCE(excluded.matches_played, player_career.matches_played),
            goals = COALESCE(excluded.goals, player_career.goals),
            assists = COALESCE(excluded.assists, player_career.assists),
            yellow_cards = COALESCE(excluded.yellow_cards, player_career.yellow_cards),
            red_cards = COALESCE(excluded.red_cards, player_career.red_cards),
            starts = COALESCE(excluded.starts, player_career.starts),
            substitutions = COALESCE(excluded.substitutions, player_career.substitutions),
            minutes = COALESCE(excluded.minutes, player_career.minutes),
            age_at_time = COALESCE(excluded.age_at_time, player_career.age_at_time),
            rating = COALESCE(excluded.rating, player_career.rating),
            elo = COALESCE(excluded.elo, player_career.elo),
            updated_at = excluded.updated_at
        "#,
        params![
            id.0,
            season,
            club,
            row.competition.as_deref().map(str::trim).unwrap_or(""),
            row.matches_played,
            row.goals,
            row.assists,
            row.yellow_cards,
            row.red_cards,
            row.starts,
            row.substitutions,
            row.minutes,
            row.age_at_time,
            row.rating,
            row.elo,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_warning(conn: &Connection, warning: &ResolutionWarning) -> Result<()> {
    conn.execute(
        "INSERT INTO resolution_warnings (name, candidate_ids, chosen_id, source_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            warning.name,
            serde_json::to_string(&warning.candidate_ids)?,
            warning.chosen_id.0,
            warning.source_url,
            warning.created_at,
        ],
    )?;
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> PlayerProfile {
        PlayerProfile {
            name: name.to_string(),
            ..PlayerProfile::default()
        }
    }

    #[test]
    fn open_fails_when_the_directory_cannot_exist() {
        let blocker = std::env::temp_dir().join(format!("scout-store-blocker-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = PlayerStore::open(&blocker.join("players.sqlite"));
        std::fs::remove_file(&blocker).unwrap();
        assert!(matches!(result, Err(ScoutError::Store(_))));
    }

    #[test]
    fn older_files_gain_new_player_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE players (
                id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL,
                name_key TEXT NOT NULL, age INTEGER NULL, birthdate TEXT NULL,
                nationality TEXT NULL, height_cm REAL NULL, weight_kg REAL NULL,
                position TEXT NULL, foot TEXT NULL, shirt_number INTEGER NULL,
                market_value_keur INTEGER NULL, rating INTEGER NULL,
                photo_url TEXT NULL, source_url TEXT NULL, updated_at TEXT NOT NULL
            );",
        )
        .unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let mut p = profile("Juan Pérez");
        p.current_team = Some("Club X".to_string());
        let id = insert_player(&conn, &p).unwrap();
        let stored = get_player(&conn, id).unwrap().unwrap().profile;
        assert_eq!(stored.current_team.as_deref(), Some("Club X"));
        assert_eq!(stored.full_name, None);
    }

    #[test]
    fn name_keys_ignore_case_and_spacing() {
        assert_eq!(name_key("  Juan   PÉREZ "), "juan pérez");
    }

    #[test]
    fn empty_strings_never_overwrite() {
        let store = PlayerStore::open_in_memory().unwrap();
        let id = store
            .with_tx(|tx| {
                let mut p = profile("Juan Pérez");
                p.foot = Some("Derecho".to_string());
                insert_player(tx, &p)
            })
            .unwrap();

        store
            .with_tx(|tx| {
                let mut p = profile("Juan Pérez");
                p.foot = Some("   ".to_string());
                merge_player(tx, id, &p)
            })
            .unwrap();

        let record = store.get_player(id).unwrap().unwrap();
        assert_eq!(record.profile.foot.as_deref(), Some("Derecho"));
    }

    #[test]
    fn merge_into_missing_player_fails() {
        let store = PlayerStore::open_in_memory().unwrap();
        let err = store
            .with_tx(|tx| merge_player(tx, PlayerId(42), &profile("Nobody Here")))
            .unwrap_err();
        assert!(matches!(err, ScoutError::UnknownPlayer(42)));
    }

    #[test]
    fn aggregate_rows_store_empty_competition() {
        let store = PlayerStore::open_in_memory().unwrap();
        let id = store.with_tx(|tx| insert_player(tx, &profile("Ana Ruiz"))).unwrap();
        let aggregate = CareerRow {
            season: "2023/24".to_string(),
            club: "Club X".to_string(),
            matches_played: Some(30),
            ..CareerRow::default()
        };
        let breakdown = CareerRow {
            competition: Some("Liga".to_string()),
            matches_played: Some(25),
            ..aggregate.clone()
        };
        store.upsert_career_row(id, &aggregate).unwrap();
        store.upsert_career_row(id, &breakdown).unwrap();

        let only_aggregates = store.player_career(id, false).unwrap();
        assert_eq!(only_aggregates, vec![aggregate.clone()]);
        assert_eq!(store.player_career(id, true).unwrap().len(), 2);
    }
}
