//! Intermediate JSON files written by the fetch stage and replayed by the
//! load stage.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CacheError;

const TEAM_DATA_FILE: &str = "team_data.json";

pub struct JsonCache {
    league_dir: PathBuf,
    league_teams_dir: PathBuf,
    team_dir: PathBuf,
}

impl JsonCache {
    pub fn new(
        league_dir: impl Into<PathBuf>,
        league_teams_dir: impl Into<PathBuf>,
        team_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            league_dir: league_dir.into(),
            league_teams_dir: league_teams_dir.into(),
            team_dir: team_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.league_data_folder,
            &config.league_teams_data_folder,
            &config.team_data_folder,
        )
    }

    /// Competition document for one league code.
    pub fn league_path(&self, code: &str) -> PathBuf {
        self.league_dir.join(format!("{code}.json"))
    }

    /// Standings document for one league code.
    pub fn standings_path(&self, code: &str) -> PathBuf {
        self.league_teams_dir.join(format!("{code}.json"))
    }

    pub fn team_bundles_path(&self) -> PathBuf {
        self.team_dir.join(TEAM_DATA_FILE)
    }

    pub fn write_league(&self, code: &str, doc: &Value) -> Result<PathBuf, CacheError> {
        let path = self.league_path(code);
        write_json(&path, doc)?;
        Ok(path)
    }

    pub fn read_league(&self, code: &str) -> Result<Value, CacheError> {
        read_json(&self.league_path(code))
    }

    pub fn write_standings(&self, code: &str, doc: &Value) -> Result<PathBuf, CacheError> {
        let path = self.standings_path(code);
        write_json(&path, doc)?;
        Ok(path)
    }

    pub fn read_standings(&self, code: &str) -> Result<Value, CacheError> {
        read_json(&self.standings_path(code))
    }

    /// Overlay team documents on the aggregate file, keyed by team id.
    /// Documents of teams not in `bundles` are kept; an unreadable file is
    /// replaced.
    pub fn merge_team_bundles(&self, bundles: &BTreeMap<i64, Value>) -> Result<PathBuf, CacheError> {
        let path = self.team_bundles_path();
        let mut object = match read_json(&path) {
            Ok(Value::Object(object)) => object,
            Err(CacheError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Map::new()
            }
            Err(CacheError::Io { path, source }) => return Err(CacheError::Io { path, source }),
            Ok(_) | Err(CacheError::Json { .. }) => {
                warn!(path = %path.display(), "Replacing unreadable team cache");
                Map::new()
            }
        };
        for (id, doc) in bundles {
            object.insert(id.to_string(), doc.clone());
        }
        write_json(&path, &Value::Object(object))?;
        Ok(path)
    }

    /// `(key, document)` pairs of the aggregate team file. Keys are left as
    /// written so a bad key fails only its own bundle.
    pub fn read_team_bundles(&self) -> Result<Vec<(String, Value)>, CacheError> {
        let path = self.team_bundles_path();
        match read_json(&path)? {
            Value::Object(object) => Ok(object.into_iter().collect()),
            other => Err(CacheError::Json {
                path: path.display().to_string(),
                source: <serde_json::Error as serde::de::Error>::custom(format!(
                    "expected an object keyed by team id, found {}",
                    json_kind(&other)
                )),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn write_json(path: &Path, doc: &Value) -> Result<(), CacheError> {
    let io_err = |source: io::Error| CacheError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let body = serde_json::to_string_pretty(doc).map_err(|source| CacheError::Json {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(path, body).map_err(io_err)?;
    debug!(path = %path.display(), "Cached JSON document");
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, CacheError> {
    let body = fs::read_to_string(path).map_err(|source| CacheError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&body).map_err(|source| CacheError::Json {
        path: path.display().to_string(),
        source,
    })
}
