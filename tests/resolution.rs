use std::sync::Arc;

use chrono::NaiveDate;

use scout_ingest::profile::{CareerRow, PlayerProfile};
use scout_ingest::resolver::{EntityResolver, MatchRule};
use scout_ingest::{PlayerId, PlayerStore, ScoutError};

fn resolver() -> EntityResolver {
    EntityResolver::new(Arc::new(PlayerStore::open_in_memory().expect("in-memory store")))
}

fn juan() -> PlayerProfile {
    PlayerProfile {
        name: "Juan Pérez".to_string(),
        full_name: Some("Juan Pérez García".to_string()),
        age: Some(35),
        birthdate: NaiveDate::from_ymd_opt(1988, 5, 11),
        nationality: Some("España".to_string()),
        height_cm: Some(180.0),
        weight_kg: Some(78.0),
        position: Some("DEF".to_string()),
        secondary_position: Some("Lateral derecho".to_string()),
        foot: Some("Derecho".to_string()),
        shirt_number: Some(4),
        market_value_keur: Some(12_500),
        rating: Some(81),
        current_team: Some("Club X".to_string()),
        current_team_crest_url: Some("https://cdn.test/club-x.png".to_string()),
        current_competition: Some("Liga".to_string()),
        photo_url: Some("https://cdn.test/juan.jpg".to_string()),
        source_url: Some("https://es.besoccer.com/jugador/juan-perez".to_string()),
    }
}

fn season(season: &str, club: &str, goals: u32) -> CareerRow {
    CareerRow {
        season: season.to_string(),
        club: club.to_string(),
        matches_played: Some(30),
        goals: Some(goals),
        ..CareerRow::default()
    }
}

#[test]
fn merging_twice_is_idempotent() {
    let r = resolver();
    let first = r.resolve(&juan(), None).unwrap();
    assert_eq!(first.matched_by, MatchRule::Created);
    let once = r.store().get_player(first.player_id).unwrap().unwrap();

    let second = r.resolve(&juan(), None).unwrap();
    assert_eq!(second.player_id, first.player_id);
    assert_eq!(second.matched_by, MatchRule::SourceUrl);
    let twice = r.store().get_player(first.player_id).unwrap().unwrap();

    assert_eq!(once.profile, twice.profile);
    assert_eq!(r.store().player_count().unwrap(), 1);
}

#[test]
fn absent_fields_never_erase_known_values() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;

    let partial = PlayerProfile {
        name: "Juan Pérez".to_string(),
        foot: Some("Izquierdo".to_string()),
        source_url: juan().source_url,
        ..PlayerProfile::default()
    };
    r.resolve(&partial, None).unwrap();

    let stored = r.store().get_player(id).unwrap().unwrap().profile;
    assert_eq!(stored.height_cm, Some(180.0));
    assert_eq!(stored.birthdate, NaiveDate::from_ymd_opt(1988, 5, 11));
    assert_eq!(stored.market_value_keur, Some(12_500));
    assert_eq!(stored.foot.as_deref(), Some("Izquierdo"));
    assert_eq!(stored.full_name.as_deref(), Some("Juan Pérez García"));
    assert_eq!(stored.current_team.as_deref(), Some("Club X"));
}

#[test]
fn current_club_details_follow_transfers() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;
    let stored = r.store().get_player(id).unwrap().unwrap().profile;
    assert_eq!(stored.secondary_position.as_deref(), Some("Lateral derecho"));
    assert_eq!(stored.current_team_crest_url.as_deref(), Some("https://cdn.test/club-x.png"));
    assert_eq!(stored.current_competition.as_deref(), Some("Liga"));

    let moved = PlayerProfile {
        current_team: Some("Club Y".to_string()),
        current_team_crest_url: Some("  ".to_string()),
        current_competition: Some("Copa".to_string()),
        ..juan()
    };
    r.resolve(&moved, None).unwrap();
    let stored = r.store().get_player(id).unwrap().unwrap().profile;
    assert_eq!(stored.current_team.as_deref(), Some("Club Y"));
    assert_eq!(stored.current_competition.as_deref(), Some("Copa"));
    assert_eq!(stored.current_team_crest_url.as_deref(), Some("https://cdn.test/club-x.png"));
}

#[test]
fn source_url_wins_over_name() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;

    let renamed = PlayerProfile {
        name: "Juan Pérez García".to_string(),
        source_url: juan().source_url,
        ..PlayerProfile::default()
    };
    let res = r.resolve(&renamed, None).unwrap();
    assert_eq!(res.player_id, id);
    assert_eq!(res.matched_by, MatchRule::SourceUrl);
    let stored = r.store().get_player(id).unwrap().unwrap().profile;
    assert_eq!(stored.name, "Juan Pérez García");
}

#[test]
fn explicit_id_updates_without_searching() {
    let r = resolver();
    let target = r.resolve(&juan(), None).unwrap().player_id;

    let other = PlayerProfile {
        name: "Someone Else".to_string(),
        source_url: Some("https://es.besoccer.com/jugador/someone-else".to_string()),
        ..PlayerProfile::default()
    };
    let res = r.resolve(&other, Some(target)).unwrap();
    assert_eq!(res.player_id, target);
    assert_eq!(res.matched_by, MatchRule::ExplicitId);
    assert_eq!(r.store().player_count().unwrap(), 1);

    let err = r.resolve(&other, Some(PlayerId(999))).unwrap_err();
    assert!(matches!(err, ScoutError::UnknownPlayer(999)));
}

#[test]
fn unique_name_matches_without_birthdate() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;
    let loose = PlayerProfile {
        name: "  juan   PÉREZ ".to_string(),
        ..PlayerProfile::default()
    };
    let res = r.resolve(&loose, None).unwrap();
    assert_eq!(res.player_id, id);
    assert_eq!(res.matched_by, MatchRule::NameOnly);
    assert!(res.warnings.is_empty());
}

#[test]
fn ambiguous_name_is_merged_into_oldest_and_recorded() {
    let r = resolver();
    let mut older = PlayerProfile {
        name: "Luis García".to_string(),
        birthdate: NaiveDate::from_ymd_opt(1980, 1, 1),
        ..PlayerProfile::default()
    };
    let a = r.resolve(&older, None).unwrap().player_id;
    older.birthdate = NaiveDate::from_ymd_opt(2001, 7, 9);
    let b = r.resolve(&older, None).unwrap().player_id;
    assert_ne!(a, b);

    let bare = PlayerProfile {
        name: "Luis García".to_string(),
        height_cm: Some(175.0),
        ..PlayerProfile::default()
    };
    let res = r.resolve(&bare, None).unwrap();
    assert_eq!(res.player_id, a);
    assert_eq!(res.matched_by, MatchRule::NameOnly);
    assert_eq!(res.warnings.len(), 1);
    assert_eq!(res.warnings[0].candidate_ids, vec![a, b]);

    let durable = r.store().resolution_warnings().unwrap();
    assert_eq!(durable.len(), 1);
    assert_eq!(durable[0].chosen_id, a);
    assert_eq!(durable[0].name, "Luis García");
}

#[test]
fn career_upsert_keeps_one_row_per_key() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;

    r.upsert_career_row(id, &season("2023/2024", "Club X", 2)).unwrap();
    r.upsert_career_row(id, &season("2023/2024", "Club X", 7)).unwrap();

    let rows = r.store().player_career(id, true).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].goals, Some(7));
}

#[test]
fn career_merge_is_non_destructive() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;

    let mut full = season("2023/2024", "Club X", 2);
    full.minutes = Some(2450);
    r.upsert_career_row(id, &full).unwrap();
    r.upsert_career_row(id, &season("2023/2024", "Club X", 3)).unwrap();

    let rows = r.store().player_career(id, false).unwrap();
    assert_eq!(rows[0].goals, Some(3));
    assert_eq!(rows[0].minutes, Some(2450));
}

#[test]
fn career_listing_is_newest_first() {
    let r = resolver();
    let id = r.resolve(&juan(), None).unwrap().player_id;
    for (s, club) in [("2021/2022", "Club Z"), ("2023/2024", "Club X"), ("2022/2023", "Club Y")] {
        r.upsert_career_row(id, &season(s, club, 1)).unwrap();
    }
    let breakdown = CareerRow {
        competition: Some("Liga".to_string()),
        ..season("2023/2024", "Club X", 1)
    };
    r.upsert_career_row(id, &breakdown).unwrap();

    let aggregates = r.store().player_career(id, false).unwrap();
    let seasons: Vec<&str> = aggregates.iter().map(|row| row.season.as_str()).collect();
    assert_eq!(seasons, vec!["2023/2024", "2022/2023", "2021/2022"]);
    assert_eq!(r.store().player_career(id, true).unwrap().len(), 4);
}

#[test]
fn career_for_unknown_player_is_refused() {
    let r = resolver();
    let err = r
        .upsert_career_row(PlayerId(5), &season("2023/2024", "Club X", 1))
        .unwrap_err();
    assert!(matches!(err, ScoutError::UnknownPlayer(5)));
}

#[test]
fn caller_supplied_names_are_sanitised() {
    let r = resolver();
    let titled = PlayerProfile {
        name: "Estadísticas Juan Pérez, Club X | BeSoccer".to_string(),
        ..juan()
    };
    let id = r.resolve(&titled, None).unwrap().player_id;
    let stored = r.store().get_player(id).unwrap().unwrap().profile;
    assert_eq!(stored.name, "Juan Pérez");

    // Same player under the clean name: no second record.
    assert_eq!(r.resolve(&juan(), None).unwrap().player_id, id);
    assert_eq!(r.store().player_count().unwrap(), 1);
}

#[test]
fn oversized_or_boilerplate_names_write_nothing() {
    let r = resolver();
    for name in ["x".repeat(200), "Noticias | BeSoccer".to_string()] {
        let profile = PlayerProfile {
            name,
            source_url: Some("https://es.besoccer.com/jugador/long".to_string()),
            ..PlayerProfile::default()
        };
        let err = r.resolve_with_career(&profile, &[season("2023/2024", "Club X", 1)], None);
        assert!(matches!(err, Err(ScoutError::Validation(_))));
    }
    assert_eq!(r.store().player_count().unwrap(), 0);
}
