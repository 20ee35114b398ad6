use std::env;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_COMPETITIONS: &[&str] = &["PL", "PD", "SA", "BL1", "FL1"];
const DEFAULT_REQUESTS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(9) {
    Some(n) => n,
    None => panic!("default budget must be non-zero"),
};
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Configuration
///
/// Built once at process start and passed by reference to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_token: String,
    /// SQLite file path, or `:memory:`
    pub store_location: String,
    /// Competition documents, one `{code}.json` per league
    pub league_data_folder: PathBuf,
    /// Standings documents, one `{code}.json` per league
    pub league_teams_data_folder: PathBuf,
    /// Holds the aggregate `team_data.json`
    pub team_data_folder: PathBuf,
    pub competitions: Vec<String>,
    pub requests_per_minute: NonZeroU32,
    pub http_timeout: Duration,
    /// If true, replay the cached JSON without calling the API
    pub skip_fetch: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
                _ => Err(ConfigError::Missing(key)),
            }
        };
        let optional = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = required("API_URL")?.trim_end_matches('/').to_string();
        let api_token = required("API_TOKEN")?;
        let store_location = required("STORE_LOCATION")?;
        let league_data_folder = PathBuf::from(required("LEAGUE_DATA_FOLDER")?);
        let league_teams_data_folder = PathBuf::from(required("LEAGUE_TEAMS_DATA_FOLDER")?);
        let team_data_folder = PathBuf::from(required("TEAM_DATA_FOLDER")?);

        let competitions = match optional("COMPETITIONS") {
            Some(raw) => {
                let codes: Vec<String> = raw
                    .split(',')
                    .map(|c| c.trim().to_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect();
                if codes.is_empty() {
                    return Err(ConfigError::Invalid {
                        key: "COMPETITIONS",
                        value: raw,
                    });
                }
                codes
            }
            None => DEFAULT_COMPETITIONS.iter().map(|c| c.to_string()).collect(),
        };

        let requests_per_minute = match optional("REQUESTS_PER_MINUTE") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or(ConfigError::Invalid {
                    key: "REQUESTS_PER_MINUTE",
                    value: raw,
                })?,
            None => DEFAULT_REQUESTS_PER_MINUTE,
        };

        let http_timeout = match optional("HTTP_TIMEOUT_SECONDS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::Invalid {
                    key: "HTTP_TIMEOUT_SECONDS",
                    value: raw,
                })?,
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
        };

        let skip_fetch = optional("SKIP_FETCH")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            api_url,
            api_token,
            store_location,
            league_data_folder,
            league_teams_data_folder,
            team_data_folder,
            competitions,
            requests_per_minute,
            http_timeout,
            skip_fetch,
        })
    }
}
