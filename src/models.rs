//! Flat entity records, one struct per table.

/// Row of `leagues`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct League {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub emblem: String,
    pub current_season_id: i64,
    pub current_matchday: i64,
    pub area_id: i64,
    pub area_name: String,
    pub area_code: String,
    pub area_flag: String,
}

/// Row of `league_teams`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: i64,
    pub league_id: i64,
    pub name: String,
    pub short_name: String,
    pub tla: String,
    pub crest: String,
}

/// Row of `current_standings`. The surrogate id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub league_id: i64,
    pub team_id: i64,
    pub position: i64,
    pub played_games: i64,
    pub won: i64,
    pub draw: i64,
    pub lost: i64,
    pub points: i64,
    pub goals_for: i64,
    pub goals_against: i64,
    pub goal_difference: i64,
}

/// Row of `coaches`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coach {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub nationality: String,
    pub contract_start: String,
    pub contract_until: String,
}

/// Row of `players`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub position: String,
    pub date_of_birth: String,
    pub nationality: String,
}

/// Row of `stadiums`, unique on (team_id, venue_name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stadium {
    pub team_id: i64,
    pub venue_name: String,
}

/// Everything extracted from one team document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamBundle {
    pub coach: Option<Coach>,
    pub players: Vec<Player>,
    pub stadium: Option<Stadium>,
}
