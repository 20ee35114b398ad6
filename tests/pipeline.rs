use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use football_ingestion::cache::JsonCache;
use football_ingestion::fetcher::mock::{fetcher, MockTransport};
use football_ingestion::loader::FailureKind;
use football_ingestion::pipeline::Stage;
use football_ingestion::schema::{ForeignKey, Table};
use football_ingestion::store::{close_store, open_store};
use football_ingestion::{run, run_with, Config, RunReport};
use serde_json::{json, Value};

const BASE: &str = "https://api.example.org/v4";

fn config(root: &Path, skip_fetch: bool) -> Config {
    let vars = HashMap::from([
        ("API_URL", BASE.to_string()),
        ("API_TOKEN", "test-token".to_string()),
        ("STORE_LOCATION", root.join("dashdribble.db").display().to_string()),
        ("LEAGUE_DATA_FOLDER", root.join("historical_winners").display().to_string()),
        ("LEAGUE_TEAMS_DATA_FOLDER", root.join("current_league_teams").display().to_string()),
        ("TEAM_DATA_FOLDER", root.join("team_data").display().to_string()),
        ("COMPETITIONS", "PL".to_string()),
        ("SKIP_FETCH", skip_fetch.to_string()),
    ]);
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn premier_league() -> Value {
    json!({
        "id": 2021,
        "name": "Premier League",
        "code": "PL",
        "emblem": "https://crests.example.org/PL.png",
        "currentSeason": { "id": 2287, "currentMatchday": 8 },
        "area": { "id": 2072, "name": "England", "code": "ENG" }
    })
}

/// TOTAL and HOME groups, both listing every team.
fn standings(teams: &[(i64, &str)]) -> Value {
    let table: Vec<Value> = teams
        .iter()
        .enumerate()
        .map(|(i, (id, name))| {
            json!({
                "position": i + 1,
                "team": { "id": id, "name": name, "tla": name[..3].to_uppercase() },
                "playedGames": 8,
                "won": 5,
                "draw": 2,
                "lost": 1,
                "points": 17,
                "goalsFor": 14,
                "goalsAgainst": 6,
                "goalDifference": 8
            })
        })
        .collect();
    json!({
        "competition": { "id": 2021, "code": "PL" },
        "standings": [
            { "type": "TOTAL", "table": table },
            { "type": "HOME", "table": table }
        ]
    })
}

fn squad(coach_id: i64, player_ids: &[i64], venue: &str) -> Value {
    let players: Vec<Value> = player_ids
        .iter()
        .map(|id| json!({ "id": id, "name": format!("Player {id}"), "position": "Midfield" }))
        .collect();
    json!({
        "coach": {
            "id": coach_id,
            "name": format!("Coach {coach_id}"),
            "contract": { "start": "2023-07", "until": "2026-06" }
        },
        "squad": players,
        "venue": venue
    })
}

fn rows(report: &RunReport, table: Table) -> i64 {
    report
        .table_counts
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, n)| *n)
        .unwrap_or(-1)
}

fn seed_cache(config: &Config, teams: &[(i64, &str)], bundles: &[(i64, Value)]) {
    let cache = JsonCache::from_config(config);
    cache.write_league("PL", &premier_league()).unwrap();
    cache.write_standings("PL", &standings(teams)).unwrap();
    let bundles: BTreeMap<i64, Value> = bundles.iter().cloned().collect();
    cache.merge_team_bundles(&bundles).unwrap();
}

#[tokio::test]
async fn full_run_fetches_caches_and_loads() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), false);
    let transport = MockTransport::new()
        .with_json(&format!("{BASE}/competition/PL"), &premier_league())
        .with_json(
            &format!("{BASE}/competition/PL/standings"),
            &standings(&[(57, "Arsenal"), (61, "Chelsea")]),
        )
        .with_json(&format!("{BASE}/teams/57"), &squad(11, &[7, 8], "Emirates Stadium"))
        .with_response(&format!("{BASE}/teams/61"), 500, "upstream down");
    let mut fetcher = fetcher(transport, 9);

    let report = run_with(&config, Some(&mut fetcher)).await.unwrap();

    let urls: Vec<String> = fetcher.transport().requests().into_iter().map(|(u, _)| u).collect();
    assert_eq!(
        urls,
        vec![
            format!("{BASE}/competition/PL"),
            format!("{BASE}/competition/PL/standings"),
            format!("{BASE}/teams/57"),
            format!("{BASE}/teams/61"),
        ]
    );
    assert_eq!(report.requests_issued, 4);

    let fetch_failures: Vec<_> = report.failures_in(Stage::Fetch).collect();
    assert_eq!(fetch_failures.len(), 1);
    assert_eq!(fetch_failures[0].unit, "teams/61");

    let cache = JsonCache::from_config(&config);
    let cached = cache.read_team_bundles().unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].0, "57");

    assert_eq!(rows(&report, Table::Leagues), 1);
    assert_eq!(rows(&report, Table::LeagueTeams), 2);
    assert_eq!(rows(&report, Table::CurrentStandings), 4);
    assert_eq!(rows(&report, Table::Coaches), 1);
    assert_eq!(rows(&report, Table::Players), 2);
    assert_eq!(rows(&report, Table::Stadiums), 1);

    let teams = report.load.tally(Table::LeagueTeams);
    assert_eq!((teams.inserted, teams.skipped), (2, 2));
    assert!(report.finished_at.is_some());

    let report_file = dir.path().join("dashdribble.db.run_report.json");
    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(report_file).unwrap()).unwrap();
    assert_eq!(written["run_id"], report.run_id.to_string());
    assert_eq!(written["requests_issued"], 4);
    assert_eq!(written["failures"][0]["unit"], "teams/61");

    let fk_file = dir.path().join("dashdribble.db.foreign_keys.json");
    let keys: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(fk_file).unwrap()).unwrap();
    assert!(keys.contains(&serde_json::to_value(ForeignKey {
        table: "league_teams".to_string(),
        column: "league_id".to_string(),
        ref_table: "leagues".to_string(),
        ref_column: "id".to_string(),
    })
    .unwrap()));
}

#[tokio::test]
async fn second_run_only_appends_standings() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), true);
    seed_cache(
        &config,
        &[(57, "Arsenal"), (81, "Barcelona")],
        &[
            (57, squad(11, &[7, 8], "Emirates Stadium")),
            (81, squad(12, &[9], "Camp Nou")),
        ],
    );

    let first = run(&config).await.unwrap();
    let second = run(&config).await.unwrap();

    for table in [
        Table::Leagues,
        Table::LeagueTeams,
        Table::Coaches,
        Table::Players,
        Table::Stadiums,
    ] {
        assert_eq!(rows(&first, table), rows(&second, table), "{table}");
        assert_eq!(second.load.tally(table).inserted, 0, "{table}");
    }
    assert_eq!(rows(&first, Table::CurrentStandings), 4);
    assert_eq!(rows(&second, Table::CurrentStandings), 8);
    assert_ne!(first.run_id, second.run_id);

    let pool = open_store(&config.store_location).await.unwrap();
    let camp_nou: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM stadiums WHERE team_id = 81 AND venue_name = 'Camp Nou'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(camp_nou, 1);
    close_store(pool).await;
}

#[tokio::test]
async fn malformed_bundle_is_skipped_and_the_rest_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), true);
    let teams = [
        (57, "Arsenal"),
        (58, "Aston Villa"),
        (61, "Chelsea"),
        (62, "Everton"),
        (63, "Fulham"),
    ];
    seed_cache(
        &config,
        &teams,
        &[
            (57, squad(11, &[1], "Emirates Stadium")),
            (58, squad(12, &[2], "Villa Park")),
            (61, json!({ "squad": [{ "name": "No Id" }], "venue": "Stamford Bridge" })),
            (62, squad(14, &[4], "Goodison Park")),
            (63, squad(15, &[5], "Craven Cottage")),
        ],
    );

    let report = run(&config).await.unwrap();

    let skipped: Vec<_> = report.failures_in(Stage::Normalize).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].unit, "team 61");
    assert_eq!(rows(&report, Table::LeagueTeams), 5);
    assert_eq!(rows(&report, Table::Coaches), 4);
    assert_eq!(rows(&report, Table::Players), 4);
    assert_eq!(rows(&report, Table::Stadiums), 4);
}

#[tokio::test]
async fn records_without_a_parent_team_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), true);
    seed_cache(
        &config,
        &[(57, "Arsenal")],
        &[
            (57, squad(11, &[7], "Emirates Stadium")),
            (999, squad(99, &[90, 91], "Nowhere Park")),
        ],
    );

    let report = run(&config).await.unwrap();

    assert_eq!(report.load.tally(Table::Players).failed, 2);
    assert_eq!(report.load.tally(Table::Coaches).failed, 1);
    assert_eq!(report.load.tally(Table::Stadiums).failed, 1);
    assert!(report
        .load
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::ReferentialIntegrity));

    let pool = open_store(&config.store_location).await.unwrap();
    for table in ["coaches", "players", "stadiums"] {
        let orphans: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE team_id NOT IN (SELECT id FROM league_teams)"
        ))
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(orphans, 0, "{table}");
    }
    close_store(pool).await;
}

#[tokio::test]
async fn large_squad_fetch_pauses_for_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), false);
    let names: Vec<String> = (0..10).map(|i| format!("Team {i}")).collect();
    let teams: Vec<(i64, &str)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (100 + i as i64, name.as_str()))
        .collect();

    let mut transport = MockTransport::new()
        .with_json(&format!("{BASE}/competition/PL"), &premier_league())
        .with_json(&format!("{BASE}/competition/PL/standings"), &standings(&teams));
    for (id, _) in &teams {
        transport = transport.with_json(&format!("{BASE}/teams/{id}"), &squad(id * 10, &[*id], ""));
    }
    let mut fetcher = fetcher(transport, 9);

    let report = run_with(&config, Some(&mut fetcher)).await.unwrap();

    assert_eq!(report.requests_issued, 12);
    let window_pauses = fetcher
        .sleeper()
        .sleeps()
        .into_iter()
        .filter(|d| *d >= Duration::from_secs(60))
        .count();
    assert_eq!(window_pauses, 1);
    assert_eq!(rows(&report, Table::Players), 10);
    assert_eq!(rows(&report, Table::Stadiums), 0);
}

#[tokio::test]
async fn unreachable_store_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), true);
    config.store_location = dir
        .path()
        .join("no/such/dir/dashdribble.db")
        .display()
        .to_string();

    assert!(run(&config).await.is_err());
}

#[tokio::test]
async fn failed_fetches_do_not_load_cached_copies() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), false);
    let healthy = MockTransport::new()
        .with_json(&format!("{BASE}/competition/PL"), &premier_league())
        .with_json(
            &format!("{BASE}/competition/PL/standings"),
            &standings(&[(57, "Arsenal")]),
        )
        .with_json(&format!("{BASE}/teams/57"), &squad(11, &[7], "Emirates Stadium"));
    let mut first_fetcher = fetcher(healthy, 9);
    let first = run_with(&config, Some(&mut first_fetcher)).await.unwrap();
    assert_eq!(rows(&first, Table::CurrentStandings), 2);

    let down = MockTransport::new()
        .with_response(&format!("{BASE}/competition/PL"), 500, "upstream down")
        .with_response(&format!("{BASE}/competition/PL/standings"), 500, "upstream down");
    let mut second_fetcher = fetcher(down, 9);
    let second = run_with(&config, Some(&mut second_fetcher)).await.unwrap();

    // no team fetches driven by the standings file left by the first run
    assert_eq!(second_fetcher.transport().requests().len(), 2);
    assert_eq!(second.failures_in(Stage::Fetch).count(), 2);
    assert_eq!(second.failures.len(), 2);
    assert_eq!(second.load.totals().inserted + second.load.totals().skipped, 0);
    assert_eq!(rows(&second, Table::CurrentStandings), 2);

    // the cache still holds the last good documents for a later replay
    let cache = JsonCache::from_config(&config);
    assert_eq!(cache.read_standings("PL").unwrap(), standings(&[(57, "Arsenal")]));
    assert_eq!(cache.read_team_bundles().unwrap().len(), 1);
}
