use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ScoutError};
use crate::profile::{CareerRow, PlayerProfile, sanitize_player_name};
use crate::store::{self, PlayerId, PlayerStore, ResolutionWarning};

/// Which rule of the cascade identified the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    ExplicitId,
    SourceUrl,
    NameAndBirthdate,
    NameOnly,
    Created,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub player_id: PlayerId,
    pub matched_by: MatchRule,
    pub warnings: Vec<ResolutionWarning>,
}

/// Decides which stored player a scraped profile belongs to, then merges it.
pub struct EntityResolver {
    store: Arc<PlayerStore>,
    strict: bool,
}

impl EntityResolver {
    pub fn new(store: Arc<PlayerStore>) -> Self {
        Self {
            store,
            strict: false,
        }
    }

    /// When set, several name-only candidates fail with
    /// [`ScoutError::AmbiguousMatch`] and nothing is written.
    pub fn refuse_ambiguous(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn store(&self) -> &Arc<PlayerStore> {
        &self.store
    }

    /// Find-or-create and merge, atomically. An explicit id is updated in
    /// place and never searched for or created.
    pub fn resolve(&self, profile: &PlayerProfile, explicit: Option<PlayerId>) -> Result<Resolution> {
        let profile = &with_clean_name(profile)?;
        let resolution = self.store.with_tx(|tx| resolve_in(tx, profile, explicit, self.strict))?;
        info!(
            player_id = %resolution.player_id,
            matched_by = ?resolution.matched_by,
            name = %profile.name,
            "resolved player"
        );
        Ok(resolution)
    }

    /// Resolve and upsert the career in one transaction.
    pub fn resolve_with_career(
        &self,
        profile: &PlayerProfile,
        career: &[CareerRow],
        explicit: Option<PlayerId>,
    ) -> Result<Resolution> {
        let profile = &with_clean_name(profile)?;
        let resolution = self.store.with_tx(|tx| {
            let resolution = resolve_in(tx, profile, explicit, self.strict)?;
            for row in career {
                store::upsert_career(tx, resolution.player_id, row)?;
            }
            Ok(resolution)
        })?;
        info!(
            player_id = %resolution.player_id,
            matched_by = ?resolution.matched_by,
            career_rows = career.len(),
            "synced player"
        );
        Ok(resolution)
    }

    pub fn upsert_career_row(&self, player_id: PlayerId, row: &CareerRow) -> Result<()> {
        self.store.upsert_career_row(player_id, row)
    }
}

/// Caller-built profiles pass the same name sanitiser as scraped ones.
fn with_clean_name(profile: &PlayerProfile) -> Result<PlayerProfile> {
    let Some(name) = sanitize_player_name(&profile.name) else {
        return Err(ScoutError::validation(format!(
            "unusable player name {:?}",
            profile.name.trim()
        )));
    };
    Ok(PlayerProfile {
        name,
        ..profile.clone()
    })
}

fn resolve_in(
    conn: &Connection,
    profile: &PlayerProfile,
    explicit: Option<PlayerId>,
    strict: bool,
) -> Result<Resolution> {
    let merged = |id: PlayerId, matched_by: MatchRule| -> Result<Resolution> {
        store::merge_player(conn, id, profile)?;
        Ok(Resolution {
            player_id: id,
            matched_by,
            warnings: Vec::new(),
        })
    };

    if let Some(id) = explicit {
        if !store::player_exists(conn, id)? {
            return Err(ScoutError::UnknownPlayer(id.0));
        }
        return merged(id, MatchRule::ExplicitId);
    }

    let source_url = profile
        .source_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    if let Some(url) = source_url
        && let Some(id) = store::find_by_source_url(conn, url)?
    {
        return merged(id, MatchRule::SourceUrl);
    }

    if let Some(birthdate) = profile.birthdate
        && let Some(id) = store::find_by_name_and_birthdate(conn, &profile.name, birthdate)?
    {
        return merged(id, MatchRule::NameAndBirthdate);
    }

    let candidates = store::find_by_name(conn, &profile.name, profile.birthdate)?;
    match candidates.as_slice() {
        [] => {}
        [only] => return merged(*only, MatchRule::NameOnly),
        [_, ..] if strict => {
            return Err(ScoutError::AmbiguousMatch {
                name: profile.name.clone(),
                candidates: candidates.iter().map(|id| id.0).collect(),
            });
        }
        [oldest, ..] => {
            // Oldest record wins until someone disambiguates by hand.
            let warning = ResolutionWarning {
                name: profile.name.clone(),
                candidate_ids: candidates.clone(),
                chosen_id: *oldest,
                source_url: source_url.map(str::to_string),
                created_at: Utc::now().to_rfc3339(),
            };
            warn!(
                name = %profile.name,
                candidates = ?candidates,
                chosen = %oldest,
                "ambiguous name-only player match"
            );
            store::insert_warning(conn, &warning)?;
            let mut resolution = merged(*oldest, MatchRule::NameOnly)?;
            resolution.warnings.push(warning);
            return Ok(resolution);
        }
    }

    let id = store::insert_player(conn, profile)?;
    Ok(Resolution {
        player_id: id,
        matched_by: MatchRule::Created,
        warnings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn resolver() -> EntityResolver {
        EntityResolver::new(Arc::new(PlayerStore::open_in_memory().unwrap()))
    }

    fn profile(name: &str, url: Option<&str>) -> PlayerProfile {
        PlayerProfile {
            name: name.to_string(),
            source_url: url.map(str::to_string),
            ..PlayerProfile::default()
        }
    }

    #[test]
    fn explicit_id_must_exist() {
        let r = resolver();
        let err = r
            .resolve(&profile("Juan Pérez", None), Some(PlayerId(7)))
            .unwrap_err();
        assert!(matches!(err, ScoutError::UnknownPlayer(7)));
        assert_eq!(r.store().player_count().unwrap(), 0);
    }

    #[test]
    fn name_and_birthdate_beats_name_only() {
        let r = resolver();
        let born = NaiveDate::from_ymd_opt(1990, 3, 4);
        let mut first = profile("Luis García", None);
        first.birthdate = born;
        let a = r.resolve(&first, None).unwrap();
        assert_eq!(a.matched_by, MatchRule::Created);

        let again = r.resolve(&first, None).unwrap();
        assert_eq!(again.player_id, a.player_id);
        assert_eq!(again.matched_by, MatchRule::NameAndBirthdate);
    }

    #[test]
    fn different_birthdate_is_a_different_player() {
        let r = resolver();
        let mut older = profile("Luis García", None);
        older.birthdate = NaiveDate::from_ymd_opt(1980, 1, 1);
        let mut younger = profile("luis  garcía", None);
        younger.birthdate = NaiveDate::from_ymd_opt(2001, 1, 1);

        let a = r.resolve(&older, None).unwrap();
        let b = r.resolve(&younger, None).unwrap();
        assert_ne!(a.player_id, b.player_id);
        assert_eq!(b.matched_by, MatchRule::Created);
    }

    #[test]
    fn strict_resolver_refuses_ambiguous_names() {
        let r = resolver().refuse_ambiguous(true);
        for year in [1980, 2001] {
            let mut p = profile("Luis García", None);
            p.birthdate = NaiveDate::from_ymd_opt(year, 1, 1);
            r.resolve(&p, None).unwrap();
        }

        let err = r.resolve(&profile("Luis García", None), None).unwrap_err();
        match err {
            ScoutError::AmbiguousMatch { name, candidates } => {
                assert_eq!(name, "Luis García");
                assert_eq!(candidates, vec![1, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(r.store().resolution_warnings().unwrap().is_empty());
        assert_eq!(r.store().player_count().unwrap(), 2);
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = resolver().resolve(&profile("  ", None), None).unwrap_err();
        assert!(matches!(err, ScoutError::Validation(_)));
    }

    #[test]
    fn boilerplate_names_are_cleaned_before_storing() {
        let r = resolver();
        let res = r
            .resolve(&profile("Estadísticas Juan Pérez, Club X | BeSoccer", None), None)
            .unwrap();
        let stored = r.store().get_player(res.player_id).unwrap().unwrap();
        assert_eq!(stored.profile.name, "Juan Pérez");

        let err = r.resolve(&profile("BeSoccer", None), None).unwrap_err();
        assert!(matches!(err, ScoutError::Validation(_)));
        assert_eq!(r.store().player_count().unwrap(), 1);
    }
}
