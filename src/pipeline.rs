//! One ingestion run: fetch into the JSON cache, then normalize and load.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::JsonCache;
use crate::config::Config;
use crate::fetcher::{
    competition_path, standings_path, team_path, HttpTransport, RateLimitedFetcher,
    ReqwestTransport, Sleeper, TokioSleeper,
};
use crate::loader::{LoadReport, Loader};
use crate::normalizer::{
    normalize_league, normalize_standings, normalize_team_bundle, team_ids_from_standings,
};
use crate::schema::{declared_foreign_keys, ensure_schema, table_row_counts, Table};
use crate::store::{close_store, open_store};

/// Explicit list of competitions a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub competitions: Vec<String>,
}

impl Manifest {
    pub fn new<I, S>(competitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            competitions: competitions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.competitions.iter().cloned())
    }
}

/// Raw documents of one run, in load order.
#[derive(Debug, Clone, Default)]
pub struct IngestionBatch {
    /// `(league code, competition document)`
    pub leagues: Vec<(String, Value)>,
    /// `(league code, standings document)`
    pub standings: Vec<(String, Value)>,
    /// `(team id as written, team document)`
    pub team_bundles: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Cache,
    Normalize,
}

/// A resource or document skipped this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub stage: Stage,
    pub unit: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub requests_issued: u64,
    pub failures: Vec<UnitFailure>,
    pub load: LoadReport,
    pub table_counts: Vec<(Table, i64)>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            requests_issued: 0,
            failures: Vec::new(),
            load: LoadReport::default(),
            table_counts: Vec::new(),
        }
    }

    fn fail(&mut self, stage: Stage, unit: impl Into<String>, reason: impl ToString) {
        let unit = unit.into();
        let reason = reason.to_string();
        warn!(?stage, unit = %unit, reason = %reason, "Skipping unit");
        self.failures.push(UnitFailure {
            stage,
            unit,
            reason,
        });
    }

    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &UnitFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch competition and standings documents for every league in the
/// manifest, then the team document of every team in the first standings
/// group, caching each successful response.
///
/// The returned batch holds only what was fetched in this run: a resource
/// that failed is unavailable until the next run, even if an older copy is
/// still cached.
pub async fn fetch_stage<T, S, C>(
    fetcher: &mut RateLimitedFetcher<T, S, C>,
    cache: &JsonCache,
    manifest: &Manifest,
    report: &mut RunReport,
) -> IngestionBatch
where
    T: HttpTransport,
    S: Sleeper,
    C: Clock,
{
    let mut batch = IngestionBatch::default();

    for code in &manifest.competitions {
        match fetcher.fetch(&competition_path(code)).await {
            Ok(doc) => {
                if let Err(e) = cache.write_league(code, &doc) {
                    report.fail(Stage::Cache, format!("league {code}"), e);
                }
                batch.leagues.push((code.clone(), doc));
            }
            Err(e) => report.fail(Stage::Fetch, e.resource.clone(), &e),
        }

        match fetcher.fetch(&standings_path(code)).await {
            Ok(doc) => {
                if let Err(e) = cache.write_standings(code, &doc) {
                    report.fail(Stage::Cache, format!("standings {code}"), e);
                }
                batch.standings.push((code.clone(), doc));
            }
            Err(e) => report.fail(Stage::Fetch, e.resource.clone(), &e),
        }
    }

    let mut seen = HashSet::new();
    let mut team_ids = Vec::new();
    for (code, doc) in &batch.standings {
        match team_ids_from_standings(doc) {
            Ok(ids) => team_ids.extend(ids.into_iter().filter(|id| seen.insert(*id))),
            Err(e) => report.fail(Stage::Normalize, format!("standings {code}"), e),
        }
    }

    let resources: Vec<String> = team_ids.iter().copied().map(team_path).collect();
    let mut bundles = BTreeMap::new();
    for ((_, outcome), team_id) in fetcher.fetch_many(&resources).await.into_iter().zip(team_ids) {
        match outcome {
            Ok(doc) => {
                bundles.insert(team_id, doc);
            }
            Err(e) => report.fail(Stage::Fetch, e.resource.clone(), &e),
        }
    }

    if let Err(e) = cache.merge_team_bundles(&bundles) {
        report.fail(Stage::Cache, "team_data", e);
    }
    batch.team_bundles = bundles
        .into_iter()
        .map(|(id, doc)| (id.to_string(), doc))
        .collect();

    report.requests_issued = fetcher.requests_issued();
    info!(
        requests = fetcher.requests_issued(),
        leagues = batch.leagues.len(),
        teams = batch.team_bundles.len(),
        "Fetch stage complete"
    );
    batch
}

/// Gather the cached documents for the manifest (replay mode). Unreadable
/// files are recorded and left out of the batch.
pub fn read_batch(cache: &JsonCache, manifest: &Manifest, report: &mut RunReport) -> IngestionBatch {
    let mut batch = IngestionBatch::default();
    for code in &manifest.competitions {
        match cache.read_league(code) {
            Ok(doc) => batch.leagues.push((code.clone(), doc)),
            Err(e) => report.fail(Stage::Cache, format!("league {code}"), e),
        }
        match cache.read_standings(code) {
            Ok(doc) => batch.standings.push((code.clone(), doc)),
            Err(e) => report.fail(Stage::Cache, format!("standings {code}"), e),
        }
    }
    match cache.read_team_bundles() {
        Ok(bundles) => batch.team_bundles = bundles,
        Err(e) => report.fail(Stage::Cache, "team_data", e),
    }
    batch
}

/// Normalize and load a batch: leagues, then teams and standings, then
/// coaches, players and stadiums. A document that fails to normalize is
/// skipped; its siblings still load.
pub async fn load_batch(pool: &SqlitePool, batch: &IngestionBatch, report: &mut RunReport) {
    let mut loader = Loader::new(pool);

    for (code, doc) in &batch.leagues {
        match normalize_league(doc) {
            Ok(league) => {
                loader.load_league(&league).await;
            }
            Err(e) => report.fail(Stage::Normalize, format!("league {code}"), e),
        }
    }

    for (code, doc) in &batch.standings {
        match normalize_standings(doc) {
            Ok((teams, standings)) => loader.load_standings(&teams, &standings).await,
            Err(e) => report.fail(Stage::Normalize, format!("standings {code}"), e),
        }
    }

    for (key, doc) in &batch.team_bundles {
        let team_id = match key.trim().parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                report.fail(
                    Stage::Normalize,
                    format!("team {key}"),
                    "team key is not an integer id",
                );
                continue;
            }
        };
        match normalize_team_bundle(team_id, doc) {
            Ok(bundle) => loader.load_team_bundle(&bundle).await,
            Err(e) => report.fail(Stage::Normalize, format!("team {team_id}"), e),
        }
    }

    report.load = loader.into_report();
}

/// File next to a file-backed store, e.g. `dashdribble.db.foreign_keys.json`.
/// In-memory stores get no sidecar files.
fn sidecar_path(store_location: &str, suffix: &str) -> Option<PathBuf> {
    if store_location == ":memory:" || store_location.starts_with("sqlite:") {
        return None;
    }
    Some(PathBuf::from(format!("{store_location}.{suffix}")))
}

fn write_sidecar<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

async fn export_foreign_keys(pool: &SqlitePool, store_location: &str) -> Result<()> {
    let Some(path) = sidecar_path(store_location, "foreign_keys.json") else {
        return Ok(());
    };
    let keys = declared_foreign_keys(pool).await?;
    write_sidecar(&path, &keys)?;
    info!(path = %path.display(), count = keys.len(), "Exported foreign keys");
    Ok(())
}

fn export_run_report(report: &RunReport, store_location: &str) -> Result<()> {
    let Some(path) = sidecar_path(store_location, "run_report.json") else {
        return Ok(());
    };
    write_sidecar(&path, report)?;
    info!(path = %path.display(), "Wrote run report");
    Ok(())
}

async fn finish_run(pool: &SqlitePool, config: &Config, report: &mut RunReport) {
    match table_row_counts(pool).await {
        Ok(counts) => {
            for (table, count) in &counts {
                info!(%table, rows = count, "Table summary");
            }
            report.table_counts = counts;
        }
        Err(e) => warn!(error = %e, "Could not count table rows"),
    }

    if let Err(e) = export_foreign_keys(pool, &config.store_location).await {
        warn!(error = ?e, "Foreign key export failed");
    }

    let totals = report.load.totals();
    report.finished_at = Some(Utc::now());
    info!(
        inserted = totals.inserted,
        skipped = totals.skipped,
        failed = totals.failed,
        skipped_units = report.failures.len(),
        "Ingestion run complete"
    );

    if let Err(e) = export_run_report(report, &config.store_location) {
        warn!(error = ?e, "Run report export failed");
    }
}

/// Run with the production HTTP client, or replay the cache when
/// `skip_fetch` is set.
pub async fn run(config: &Config) -> Result<RunReport> {
    if config.skip_fetch {
        return run_with::<ReqwestTransport, TokioSleeper, DefaultClock>(config, None).await;
    }
    let mut fetcher =
        RateLimitedFetcher::from_config(config).context("Failed to create HTTP client")?;
    run_with(config, Some(&mut fetcher)).await
}

/// A full run with a caller-supplied fetcher; `None` replays the cache.
/// With a fetcher, only documents fetched in this run are loaded.
///
/// Only store failures (open, schema) abort the run.
pub async fn run_with<T, S, C>(
    config: &Config,
    fetcher: Option<&mut RateLimitedFetcher<T, S, C>>,
) -> Result<RunReport>
where
    T: HttpTransport,
    S: Sleeper,
    C: Clock,
{
    let mut report = RunReport::new();
    let span = info_span!("ingestion_run", run_id = %report.run_id);
    execute(config, fetcher, &mut report).instrument(span).await?;
    Ok(report)
}

async fn execute<T, S, C>(
    config: &Config,
    fetcher: Option<&mut RateLimitedFetcher<T, S, C>>,
    report: &mut RunReport,
) -> Result<()>
where
    T: HttpTransport,
    S: Sleeper,
    C: Clock,
{
    let manifest = Manifest::from_config(config);
    let cache = JsonCache::from_config(config);
    info!(competitions = ?manifest.competitions, "Starting ingestion run");

    let pool = open_store(&config.store_location)
        .await
        .context("Store unavailable")?;
    if let Err(e) = ensure_schema(&pool).await {
        error!(error = %e, "Schema creation failed");
        close_store(pool).await;
        return Err(e).context("Schema unavailable");
    }

    let batch = match fetcher {
        Some(fetcher) => fetch_stage(fetcher, &cache, &manifest, report).await,
        None => {
            info!("SKIP_FETCH=true: replaying cached documents");
            read_batch(&cache, &manifest, report)
        }
    };
    load_batch(&pool, &batch, report).await;

    finish_run(&pool, config, report).await;
    close_store(pool).await;
    Ok(())
}
