//! Table declarations and idempotent schema creation.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::StoreError;

/// The six tables produced by ingestion, in parent-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Leagues,
    LeagueTeams,
    CurrentStandings,
    Coaches,
    Players,
    Stadiums,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Leagues,
        Table::LeagueTeams,
        Table::CurrentStandings,
        Table::Coaches,
        Table::Players,
        Table::Stadiums,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Leagues => "leagues",
            Table::LeagueTeams => "league_teams",
            Table::CurrentStandings => "current_standings",
            Table::Coaches => "coaches",
            Table::Players => "players",
            Table::Stadiums => "stadiums",
        }
    }

    /// Columns identifying a record for insert-if-absent.
    /// Empty means the table is append-only.
    pub fn natural_key(&self) -> &'static [&'static str] {
        match self {
            Table::Leagues | Table::LeagueTeams | Table::Coaches | Table::Players => &["id"],
            Table::Stadiums => &["team_id", "venue_name"],
            Table::CurrentStandings => &[],
        }
    }

    fn ddl(&self) -> &'static str {
        match self {
            Table::Leagues => {
                r#"
                CREATE TABLE IF NOT EXISTS leagues (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL,
                    emblem TEXT,
                    current_season_id INTEGER NOT NULL,
                    current_matchday INTEGER,
                    area_id INTEGER NOT NULL,
                    area_name TEXT,
                    area_code TEXT,
                    area_flag TEXT
                )
                "#
            }
            Table::LeagueTeams => {
                r#"
                CREATE TABLE IF NOT EXISTS league_teams (
                    id INTEGER PRIMARY KEY,
                    league_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    short_name TEXT,
                    tla TEXT,
                    crest TEXT,
                    FOREIGN KEY (league_id) REFERENCES leagues (id)
                )
                "#
            }
            Table::CurrentStandings => {
                r#"
                CREATE TABLE IF NOT EXISTS current_standings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    league_id INTEGER NOT NULL,
                    team_id INTEGER NOT NULL,
                    position INTEGER,
                    played_games INTEGER,
                    won INTEGER,
                    draw INTEGER,
                    lost INTEGER,
                    points INTEGER,
                    goals_for INTEGER,
                    goals_against INTEGER,
                    goal_difference INTEGER,
                    FOREIGN KEY (league_id) REFERENCES leagues (id),
                    FOREIGN KEY (team_id) REFERENCES league_teams (id)
                )
                "#
            }
            Table::Coaches => {
                r#"
                CREATE TABLE IF NOT EXISTS coaches (
                    id INTEGER PRIMARY KEY,
                    team_id INTEGER,
                    name TEXT,
                    first_name TEXT,
                    last_name TEXT,
                    date_of_birth TEXT,
                    nationality TEXT,
                    contract_start TEXT,
                    contract_until TEXT,
                    FOREIGN KEY (team_id) REFERENCES league_teams (id)
                )
                "#
            }
            Table::Players => {
                r#"
                CREATE TABLE IF NOT EXISTS players (
                    id INTEGER PRIMARY KEY,
                    team_id INTEGER,
                    name TEXT,
                    position TEXT,
                    date_of_birth TEXT,
                    nationality TEXT,
                    FOREIGN KEY (team_id) REFERENCES league_teams (id)
                )
                "#
            }
            Table::Stadiums => {
                r#"
                CREATE TABLE IF NOT EXISTS stadiums (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER,
                    venue_name TEXT,
                    FOREIGN KEY (team_id) REFERENCES league_teams (id)
                )
                "#
            }
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A foreign key as declared in the store, for downstream migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Create every table that does not exist yet. Never drops or alters.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    for table in Table::ALL {
        sqlx::query(table.ddl())
            .execute(pool)
            .await
            .map_err(|source| StoreError::Schema {
                table: table.name(),
                source,
            })?;
        debug!(table = table.name(), "Table ensured");
    }
    info!("Schema ready ({} tables)", Table::ALL.len());
    Ok(())
}

/// Foreign keys declared on the ingestion tables.
pub async fn declared_foreign_keys(pool: &SqlitePool) -> Result<Vec<ForeignKey>, StoreError> {
    let mut keys = Vec::new();
    for table in Table::ALL {
        // pragma_foreign_key_list columns: id, seq, table, from, to, ...
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
        )
        .bind(table.name())
        .fetch_all(pool)
        .await?;

        keys.extend(rows.into_iter().map(|(ref_table, column, ref_column)| ForeignKey {
            table: table.name().to_string(),
            column,
            ref_table,
            ref_column,
        }));
    }
    Ok(keys)
}

/// Row count per table, in parent-first order.
pub async fn table_row_counts(pool: &SqlitePool) -> Result<Vec<(Table, i64)>, StoreError> {
    let mut counts = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
            .fetch_one(pool)
            .await?;
        counts.push((table, count));
    }
    Ok(counts)
}
