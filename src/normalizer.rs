//! Pure mapping from provider JSON documents to entity records.
//!
//! Nothing here touches the store or the network. Optional provider fields
//! fall back to `""` or `0`; required identifiers fail with
//! [`NormalizeError::MissingField`] carrying the dotted path of the key.

use serde::Deserialize;
use serde_json::Value;

use crate::error::NormalizeError;
use crate::models::{Coach, League, Player, Stadium, Standing, Team, TeamBundle};

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct CompetitionDoc {
    id: Option<i64>,
    name: Option<String>,
    code: Option<String>,
    emblem: Option<String>,
    current_season: Option<SeasonDoc>,
    area: Option<AreaDoc>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SeasonDoc {
    id: Option<i64>,
    current_matchday: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AreaDoc {
    id: Option<i64>,
    name: Option<String>,
    code: Option<String>,
    flag: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StandingsDoc {
    competition: Option<CompetitionRef>,
    standings: Option<Vec<StandingGroup>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CompetitionRef {
    id: Option<i64>,
}

/// One published table (TOTAL, HOME, AWAY, ...)
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StandingGroup {
    table: Vec<TableEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct TableEntry {
    team: Option<TeamRef>,
    position: Option<i64>,
    played_games: Option<i64>,
    won: Option<i64>,
    draw: Option<i64>,
    lost: Option<i64>,
    points: Option<i64>,
    goals_for: Option<i64>,
    goals_against: Option<i64>,
    goal_difference: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct TeamRef {
    id: Option<i64>,
    name: Option<String>,
    short_name: Option<String>,
    tla: Option<String>,
    crest: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TeamDoc {
    coach: Option<CoachDoc>,
    squad: Option<Vec<PlayerDoc>>,
    venue: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct CoachDoc {
    id: Option<i64>,
    name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    nationality: Option<String>,
    contract: Option<ContractDoc>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ContractDoc {
    start: Option<String>,
    until: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PlayerDoc {
    id: Option<i64>,
    name: Option<String>,
    position: Option<String>,
    date_of_birth: Option<String>,
    nationality: Option<String>,
}

fn parse<'a, T: Deserialize<'a>>(doc: &'a Value, what: &str) -> Result<T, NormalizeError> {
    T::deserialize(doc).map_err(|e| NormalizeError::malformed(format!("{what}: {e}")))
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, NormalizeError> {
    value.ok_or_else(|| NormalizeError::missing(field))
}

/// Map a competition document into a [`League`].
pub fn normalize_league(doc: &Value) -> Result<League, NormalizeError> {
    let competition: CompetitionDoc = parse(doc, "competition")?;

    let id = require(competition.id, "id")?;
    let name = require(competition.name, "name")?;
    let code = require(competition.code, "code")?;
    let season = require(competition.current_season, "currentSeason")?;
    let current_season_id = require(season.id, "currentSeason.id")?;
    let area = require(competition.area, "area")?;
    let area_id = require(area.id, "area.id")?;

    Ok(League {
        id,
        name,
        code,
        emblem: competition.emblem.unwrap_or_default(),
        current_season_id,
        current_matchday: season.current_matchday.unwrap_or_default(),
        area_id,
        area_name: area.name.unwrap_or_default(),
        area_code: area.code.unwrap_or_default(),
        area_flag: area.flag.unwrap_or_default(),
    })
}

/// Flatten every entry of every standings group into teams and standings.
///
/// Teams appear once per group they are listed in; dedup happens on load.
pub fn normalize_standings(doc: &Value) -> Result<(Vec<Team>, Vec<Standing>), NormalizeError> {
    let parsed: StandingsDoc = parse(doc, "standings document")?;
    let league_id = require(
        parsed.competition.and_then(|c| c.id),
        "competition.id",
    )?;
    let groups = require(parsed.standings, "standings")?;

    let mut teams = Vec::new();
    let mut standings = Vec::new();

    for entry in groups.into_iter().flat_map(|g| g.table) {
        let team = require(entry.team, "standings.table.team")?;
        let team_id = require(team.id, "standings.table.team.id")?;
        let name = require(team.name, "standings.table.team.name")?;

        teams.push(Team {
            id: team_id,
            league_id,
            name,
            short_name: team.short_name.unwrap_or_default(),
            tla: team.tla.unwrap_or_default(),
            crest: team.crest.unwrap_or_default(),
        });

        standings.push(Standing {
            league_id,
            team_id,
            position: entry.position.unwrap_or_default(),
            played_games: entry.played_games.unwrap_or_default(),
            won: entry.won.unwrap_or_default(),
            draw: entry.draw.unwrap_or_default(),
            lost: entry.lost.unwrap_or_default(),
            points: entry.points.unwrap_or_default(),
            goals_for: entry.goals_for.unwrap_or_default(),
            goals_against: entry.goals_against.unwrap_or_default(),
            goal_difference: entry.goal_difference.unwrap_or_default(),
        });
    }

    Ok((teams, standings))
}

/// Map a team-with-squad document into its coach, players and stadium.
///
/// A coach without an id and a blank venue are treated as absent.
pub fn normalize_team_bundle(team_id: i64, doc: &Value) -> Result<TeamBundle, NormalizeError> {
    if !doc.is_object() {
        return Err(NormalizeError::malformed(format!(
            "team {team_id}: expected an object"
        )));
    }
    let parsed: TeamDoc = parse(doc, &format!("team {team_id}"))?;

    let coach = parsed.coach.and_then(|coach| {
        let id = coach.id?;
        let contract = coach.contract.unwrap_or_default();
        Some(Coach {
            id,
            team_id,
            name: coach.name.unwrap_or_default(),
            first_name: coach.first_name.unwrap_or_default(),
            last_name: coach.last_name.unwrap_or_default(),
            date_of_birth: coach.date_of_birth.unwrap_or_default(),
            nationality: coach.nationality.unwrap_or_default(),
            contract_start: contract.start.unwrap_or_default(),
            contract_until: contract.until.unwrap_or_default(),
        })
    });

    let players = parsed
        .squad
        .unwrap_or_default()
        .into_iter()
        .map(|player| {
            Ok(Player {
                id: require(player.id, "squad.id")?,
                team_id,
                name: player.name.unwrap_or_default(),
                position: player.position.unwrap_or_default(),
                date_of_birth: player.date_of_birth.unwrap_or_default(),
                nationality: player.nationality.unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, NormalizeError>>()?;

    let stadium = parsed
        .venue
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|venue_name| Stadium {
            team_id,
            venue_name,
        });

    Ok(TeamBundle {
        coach,
        players,
        stadium,
    })
}

/// Team ids listed in the first standings group, in table order.
pub fn team_ids_from_standings(doc: &Value) -> Result<Vec<i64>, NormalizeError> {
    let parsed: StandingsDoc = parse(doc, "standings document")?;
    let groups = require(parsed.standings, "standings")?;
    let first = require(groups.into_iter().next(), "standings")?;

    first
        .table
        .into_iter()
        .map(|entry| {
            entry
                .team
                .and_then(|t| t.id)
                .ok_or_else(|| NormalizeError::missing("standings.table.team.id"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn la_liga() -> Value {
        json!({
            "id": 2014,
            "name": "Primera Division",
            "code": "PD",
            "emblem": "https://crests.example.org/PD.png",
            "currentSeason": { "id": 2024, "currentMatchday": 12 },
            "area": { "id": 2114, "name": "Spain", "code": "ESP", "flag": "https://crests.example.org/760.svg" }
        })
    }

    #[test]
    fn league_reads_nested_season_and_area() {
        let league = normalize_league(&la_liga()).unwrap();
        assert_eq!(league.id, 2014);
        assert_eq!(league.current_season_id, 2024);
        assert_eq!(league.current_matchday, 12);
        assert_eq!(league.area_id, 2114);
        assert_eq!(league.area_name, "Spain");
        assert_eq!(league.area_code, "ESP");
    }

    #[test]
    fn league_without_area_is_missing_field() {
        let mut doc = la_liga();
        doc.as_object_mut().unwrap().remove("area");
        assert_eq!(
            normalize_league(&doc).unwrap_err(),
            NormalizeError::missing("area")
        );
    }

    #[test]
    fn league_required_nested_ids() {
        let mut doc = la_liga();
        doc["currentSeason"] = json!({ "currentMatchday": 3 });
        assert_eq!(
            normalize_league(&doc).unwrap_err(),
            NormalizeError::missing("currentSeason.id")
        );

        let mut doc = la_liga();
        doc["area"] = json!({ "name": "Spain" });
        assert_eq!(
            normalize_league(&doc).unwrap_err(),
            NormalizeError::missing("area.id")
        );
    }

    #[test]
    fn league_optional_fields_default() {
        let doc = json!({
            "id": 2021,
            "name": "Premier League",
            "code": "PL",
            "emblem": null,
            "currentSeason": { "id": 2287 },
            "area": { "id": 2072 }
        });
        let league = normalize_league(&doc).unwrap();
        assert_eq!(league.emblem, "");
        assert_eq!(league.current_matchday, 0);
        assert_eq!(league.area_name, "");
        assert_eq!(league.area_flag, "");
    }

    #[test]
    fn standings_flatten_every_group() {
        let entry = |id: i64, name: &str, position: i64| {
            json!({
                "position": position,
                "team": { "id": id, "name": name, "shortName": name, "tla": "XXX" },
                "playedGames": 10, "won": 6, "draw": 2, "lost": 2, "points": 20,
                "goalsFor": 18, "goalsAgainst": 9, "goalDifference": 9
            })
        };
        let doc = json!({
            "competition": { "id": 2014 },
            "standings": [
                { "type": "TOTAL", "table": [entry(81, "Barcelona", 1), entry(86, "Real Madrid", 2)] },
                { "type": "HOME", "table": [entry(86, "Real Madrid", 1), entry(81, "Barcelona", 2)] }
            ]
        });

        let (teams, standings) = normalize_standings(&doc).unwrap();
        assert_eq!(teams.len(), 4);
        assert_eq!(standings.len(), 4);
        assert!(teams.iter().all(|t| t.league_id == 2014));
        assert_eq!(teams[0].crest, "");
        assert_eq!(standings[0].team_id, 81);
        assert_eq!(standings[0].points, 20);
        assert_eq!(standings[2].team_id, 86);
        assert_eq!(standings[2].position, 1);
    }

    #[test]
    fn standings_require_competition_and_team_id() {
        let doc = json!({ "standings": [] });
        assert_eq!(
            normalize_standings(&doc).unwrap_err(),
            NormalizeError::missing("competition.id")
        );

        let doc = json!({
            "competition": { "id": 2014 },
            "standings": [{ "table": [{ "team": { "name": "Nobody" } }] }]
        });
        assert_eq!(
            normalize_standings(&doc).unwrap_err(),
            NormalizeError::missing("standings.table.team.id")
        );
    }

    #[test]
    fn team_bundle_maps_coach_players_and_venue() {
        let doc = json!({
            "id": 81,
            "venue": "Camp Nou",
            "coach": {
                "id": 11, "name": "Hansi Flick", "firstName": "Hans-Dieter",
                "lastName": "Flick", "dateOfBirth": "1965-02-24", "nationality": "Germany",
                "contract": { "start": "2024-07", "until": "2026-06" }
            },
            "squad": [
                { "id": 1, "name": "Marc-André ter Stegen", "position": "Goalkeeper", "nationality": "Germany" },
                { "id": 2, "name": "Pedri" }
            ]
        });

        let bundle = normalize_team_bundle(81, &doc).unwrap();
        let coach = bundle.coach.unwrap();
        assert_eq!(coach.team_id, 81);
        assert_eq!(coach.contract_until, "2026-06");
        assert_eq!(bundle.players.len(), 2);
        assert_eq!(bundle.players[1].position, "");
        assert_eq!(
            bundle.stadium,
            Some(Stadium {
                team_id: 81,
                venue_name: "Camp Nou".to_string()
            })
        );
    }

    #[test]
    fn team_bundle_absent_parts_emit_nothing() {
        let doc = json!({ "id": 5, "coach": { "id": null, "name": null }, "venue": "  " });
        let bundle = normalize_team_bundle(5, &doc).unwrap();
        assert_eq!(bundle, TeamBundle::default());

        let bundle = normalize_team_bundle(5, &json!({})).unwrap();
        assert_eq!(bundle, TeamBundle::default());
    }

    #[test]
    fn team_bundle_rejects_malformed_documents() {
        assert!(matches!(
            normalize_team_bundle(5, &json!("not a team")),
            Err(NormalizeError::Malformed { .. })
        ));
        assert!(matches!(
            normalize_team_bundle(5, &json!({ "squad": "nobody" })),
            Err(NormalizeError::Malformed { .. })
        ));
        assert_eq!(
            normalize_team_bundle(5, &json!({ "squad": [{ "name": "No Id" }] })).unwrap_err(),
            NormalizeError::missing("squad.id")
        );
    }

    #[test]
    fn team_ids_come_from_first_group() {
        let doc = json!({
            "competition": { "id": 2014 },
            "standings": [
                { "table": [{ "team": { "id": 81 } }, { "team": { "id": 86 } }] },
                { "table": [{ "team": { "id": 99 } }] }
            ]
        });
        assert_eq!(team_ids_from_standings(&doc).unwrap(), vec![81, 86]);
        assert_eq!(
            team_ids_from_standings(&json!({ "standings": [] })).unwrap_err(),
            NormalizeError::missing("standings")
        );
    }
}
