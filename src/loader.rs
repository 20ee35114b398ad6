//! Idempotent, referential-order-safe persistence of normalized records.
//!
//! Every record is written by a single statement. A record whose parent
//! row is missing is rejected before the insert is attempted; a failed
//! record is tallied and logged, and its siblings are still loaded.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::models::{Coach, League, Player, Stadium, Standing, Team, TeamBundle};
use crate::schema::Table;

type InsertQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Skipped,
}

/// One natural-key column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValue<'a> {
    Int(i64),
    Text(&'a str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub inserted: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ReferentialIntegrity,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub table: Table,
    pub key: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Aggregate record outcomes of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub tallies: BTreeMap<Table, Tally>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn tally(&self, table: Table) -> Tally {
        self.tallies.get(&table).copied().unwrap_or_default()
    }

    pub fn totals(&self) -> Tally {
        self.tallies.values().fold(Tally::default(), |acc, t| Tally {
            inserted: acc.inserted + t.inserted,
            skipped: acc.skipped + t.skipped,
            failed: acc.failed + t.failed,
        })
    }
}

fn describe_key(columns: &[&str], values: &[KeyValue<'_>]) -> String {
    let mut out = String::new();
    for (i, (column, value)) in columns.iter().zip(values).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = match value {
            KeyValue::Int(v) => write!(out, "{column}={v}"),
            KeyValue::Text(v) => write!(out, "{column}={v:?}"),
        };
    }
    out
}

fn store_error(table: Table, key: &str, source: sqlx::Error) -> LoadError {
    LoadError::Store {
        table: table.name(),
        key: key.to_string(),
        source,
    }
}

pub struct Loader<'p> {
    pool: &'p SqlitePool,
    report: LoadReport,
}

impl<'p> Loader<'p> {
    pub fn new(pool: &'p SqlitePool) -> Self {
        Self {
            pool,
            report: LoadReport::default(),
        }
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn into_report(self) -> LoadReport {
        self.report
    }

    async fn exists(
        &self,
        table: Table,
        columns: &[&str],
        key: &[KeyValue<'_>],
    ) -> Result<bool, sqlx::Error> {
        let predicate = columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {predicate})",
            table.name()
        );

        let mut query = sqlx::query_scalar::<Sqlite, bool>(&sql);
        for value in key {
            query = match *value {
                KeyValue::Int(v) => query.bind(v),
                KeyValue::Text(v) => query.bind(v),
            };
        }
        query.fetch_one(self.pool).await
    }

    async fn require_parent(
        &self,
        table: Table,
        key: &str,
        parent: Table,
        parent_id: i64,
    ) -> Result<(), LoadError> {
        let present = self
            .exists(parent, parent.natural_key(), &[KeyValue::Int(parent_id)])
            .await
            .map_err(|source| store_error(table, key, source))?;
        if present {
            Ok(())
        } else {
            Err(LoadError::ReferentialIntegrity {
                table: table.name(),
                key: key.to_string(),
                parent_table: parent.name(),
                parent_id,
            })
        }
    }

    /// Insert unless a row with the same natural key already exists.
    ///
    /// `key` holds one value per column of [`Table::natural_key`]; tables
    /// without a natural key are always appended.
    pub async fn insert_if_absent<'q>(
        &self,
        table: Table,
        key: &[KeyValue<'q>],
        insert: InsertQuery<'q>,
    ) -> Result<InsertOutcome, LoadError> {
        let columns = table.natural_key();
        debug_assert_eq!(columns.len(), key.len());
        let label = describe_key(columns, key);

        if !columns.is_empty()
            && self
                .exists(table, columns, key)
                .await
                .map_err(|source| store_error(table, &label, source))?
        {
            debug!(%table, key = %label, "Already present, skipping");
            return Ok(InsertOutcome::Skipped);
        }

        insert
            .execute(self.pool)
            .await
            .map_err(|source| store_error(table, &label, source))?;
        Ok(InsertOutcome::Inserted)
    }

    /// Bulk-path insert: the statement must be `INSERT OR IGNORE`, and the
    /// affected row count tells whether the key was new.
    pub async fn insert_or_ignore<'q>(
        &self,
        table: Table,
        key: &[KeyValue<'q>],
        insert: InsertQuery<'q>,
    ) -> Result<InsertOutcome, LoadError> {
        let label = describe_key(table.natural_key(), key);
        let result = insert
            .execute(self.pool)
            .await
            .map_err(|source| store_error(table, &label, source))?;
        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Skipped
        } else {
            InsertOutcome::Inserted
        })
    }

    pub async fn insert_league(&self, league: &League) -> Result<InsertOutcome, LoadError> {
        let insert = sqlx::query(
            r#"
            INSERT INTO leagues (
                id, name, code, emblem, current_season_id, current_matchday,
                area_id, area_name, area_code, area_flag
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(league.id)
        .bind(&league.name)
        .bind(&league.code)
        .bind(&league.emblem)
        .bind(league.current_season_id)
        .bind(league.current_matchday)
        .bind(league.area_id)
        .bind(&league.area_name)
        .bind(&league.area_code)
        .bind(&league.area_flag);

        self.insert_if_absent(Table::Leagues, &[KeyValue::Int(league.id)], insert)
            .await
    }

    pub async fn insert_team(&self, team: &Team) -> Result<InsertOutcome, LoadError> {
        let key = [KeyValue::Int(team.id)];
        let label = describe_key(Table::LeagueTeams.natural_key(), &key);
        self.require_parent(Table::LeagueTeams, &label, Table::Leagues, team.league_id)
            .await?;

        let insert = sqlx::query(
            r#"
            INSERT OR IGNORE INTO league_teams (id, league_id, name, short_name, tla, crest)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(team.id)
        .bind(team.league_id)
        .bind(&team.name)
        .bind(&team.short_name)
        .bind(&team.tla)
        .bind(&team.crest);

        self.insert_or_ignore(Table::LeagueTeams, &key, insert).await
    }

    /// Standings are append-only: every call adds a row.
    pub async fn insert_standing(&self, standing: &Standing) -> Result<InsertOutcome, LoadError> {
        let label = format!(
            "league_id={}, team_id={}",
            standing.league_id, standing.team_id
        );
        self.require_parent(
            Table::CurrentStandings,
            &label,
            Table::Leagues,
            standing.league_id,
        )
        .await?;
        self.require_parent(
            Table::CurrentStandings,
            &label,
            Table::LeagueTeams,
            standing.team_id,
        )
        .await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO current_standings (
                league_id, team_id, position, played_games, won, draw, lost,
                points, goals_for, goals_against, goal_difference
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(standing.league_id)
        .bind(standing.team_id)
        .bind(standing.position)
        .bind(standing.played_games)
        .bind(standing.won)
        .bind(standing.draw)
        .bind(standing.lost)
        .bind(standing.points)
        .bind(standing.goals_for)
        .bind(standing.goals_against)
        .bind(standing.goal_difference);

        self.insert_if_absent(Table::CurrentStandings, &[], insert)
            .await
            .map_err(|err| match err {
                LoadError::Store { table, source, .. } => LoadError::Store {
                    table,
                    key: label.clone(),
                    source,
                },
                other => other,
            })
    }

    pub async fn insert_coach(&self, coach: &Coach) -> Result<InsertOutcome, LoadError> {
        let key = [KeyValue::Int(coach.id)];
        let label = describe_key(Table::Coaches.natural_key(), &key);
        self.require_parent(Table::Coaches, &label, Table::LeagueTeams, coach.team_id)
            .await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO coaches (
                id, team_id, name, first_name, last_name, date_of_birth,
                nationality, contract_start, contract_until
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(coach.id)
        .bind(coach.team_id)
        .bind(&coach.name)
        .bind(&coach.first_name)
        .bind(&coach.last_name)
        .bind(&coach.date_of_birth)
        .bind(&coach.nationality)
        .bind(&coach.contract_start)
        .bind(&coach.contract_until);

        self.insert_if_absent(Table::Coaches, &key, insert).await
    }

    pub async fn insert_player(&self, player: &Player) -> Result<InsertOutcome, LoadError> {
        let key = [KeyValue::Int(player.id)];
        let label = describe_key(Table::Players.natural_key(), &key);
        self.require_parent(Table::Players, &label, Table::LeagueTeams, player.team_id)
            .await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO players (id, team_id, name, position, date_of_birth, nationality)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(player.id)
        .bind(player.team_id)
        .bind(&player.name)
        .bind(&player.position)
        .bind(&player.date_of_birth)
        .bind(&player.nationality);

        self.insert_if_absent(Table::Players, &key, insert).await
    }

    pub async fn insert_stadium(&self, stadium: &Stadium) -> Result<InsertOutcome, LoadError> {
        let key = [
            KeyValue::Int(stadium.team_id),
            KeyValue::Text(&stadium.venue_name),
        ];
        let label = describe_key(Table::Stadiums.natural_key(), &key);
        self.require_parent(Table::Stadiums, &label, Table::LeagueTeams, stadium.team_id)
            .await?;

        let insert = sqlx::query("INSERT INTO stadiums (team_id, venue_name) VALUES (?, ?)")
            .bind(stadium.team_id)
            .bind(&stadium.venue_name);

        self.insert_if_absent(Table::Stadiums, &key, insert).await
    }

    fn record(
        &mut self,
        table: Table,
        result: Result<InsertOutcome, LoadError>,
    ) -> Option<InsertOutcome> {
        let tally = self.report.tallies.entry(table).or_default();
        match result {
            Ok(outcome) => {
                match outcome {
                    InsertOutcome::Inserted => tally.inserted += 1,
                    InsertOutcome::Skipped => tally.skipped += 1,
                }
                Some(outcome)
            }
            Err(err) => {
                tally.failed += 1;
                warn!(%table, error = %err, "Record not loaded");
                let (key, kind) = match &err {
                    LoadError::ReferentialIntegrity { key, .. } => {
                        (key.clone(), FailureKind::ReferentialIntegrity)
                    }
                    LoadError::Store { key, .. } => (key.clone(), FailureKind::Store),
                };
                self.report.failures.push(LoadFailure {
                    table,
                    key,
                    kind,
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    pub async fn load_league(&mut self, league: &League) -> Option<InsertOutcome> {
        let result = self.insert_league(league).await;
        self.record(Table::Leagues, result)
    }

    /// Teams first, then standings, so every standing finds its team.
    pub async fn load_standings(&mut self, teams: &[Team], standings: &[Standing]) {
        for team in teams {
            let result = self.insert_team(team).await;
            self.record(Table::LeagueTeams, result);
        }
        for standing in standings {
            let result = self.insert_standing(standing).await;
            self.record(Table::CurrentStandings, result);
        }
    }

    pub async fn load_team_bundle(&mut self, bundle: &TeamBundle) {
        if let Some(coach) = &bundle.coach {
            let result = self.insert_coach(coach).await;
            self.record(Table::Coaches, result);
        }
        for player in &bundle.players {
            let result = self.insert_player(player).await;
            self.record(Table::Players, result);
        }
        if let Some(stadium) = &bundle.stadium {
            let result = self.insert_stadium(stadium).await;
            self.record(Table::Stadiums, result);
        }
    }
}
