use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_SUMMARY;

const CONFIG_SCHEMA_VERSION: u32 = 2;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_UPCOMING_MAX_RESULTS: u32 = 10;
const MAX_UPCOMING_RESULTS: u32 = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClicalConfig {
    pub schema_version: u32,
    pub default_summary: String,
    pub http_timeout_seconds: u64,
    pub upcoming_max_results: u32,
}

impl Default for ClicalConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            default_summary: DEFAULT_SUMMARY.to_string(),
            http_timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECONDS,
            upcoming_max_results: DEFAULT_UPCOMING_MAX_RESULTS,
        }
    }
}

impl ClicalConfig {
    pub fn load_or_init(home: &DataHome) -> Result<Self> {
        home.ensure_exists()?;
        let cfg_path = home.config_path();

        if cfg_path.exists() {
            let raw = fs::read_to_string(&cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: ClicalConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save(home)?;
            }
            Ok(parsed)
        } else {
            let cfg = ClicalConfig::default();
            cfg.save(home)?;
            Ok(cfg)
        }
    }

    pub fn save(&self, home: &DataHome) -> Result<()> {
        home.ensure_exists()?;
        let path = home.config_path();
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// HTTP deadline for OAuth and calendar requests. `CLICAL_HTTP_TIMEOUT_SECONDS`
    /// wins over the file.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(env_u64(
            "CLICAL_HTTP_TIMEOUT_SECONDS",
            self.http_timeout_seconds,
        ))
    }

    pub fn http_agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.http_timeout()).build()
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }

        let trimmed = self.default_summary.trim();
        if trimmed.is_empty() {
            self.default_summary = DEFAULT_SUMMARY.to_string();
            changed = true;
        } else if trimmed != self.default_summary {
            self.default_summary = trimmed.to_string();
            changed = true;
        }

        if self.http_timeout_seconds == 0 {
            self.http_timeout_seconds = DEFAULT_HTTP_TIMEOUT_SECONDS;
            changed = true;
        }

        if self.upcoming_max_results == 0 {
            self.upcoming_max_results = DEFAULT_UPCOMING_MAX_RESULTS;
            changed = true;
        } else if self.upcoming_max_results > MAX_UPCOMING_RESULTS {
            self.upcoming_max_results = MAX_UPCOMING_RESULTS;
            changed = true;
        }

        changed
    }
}

pub fn clamp_upcoming(requested: u32) -> u32 {
    requested.clamp(1, MAX_UPCOMING_RESULTS)
}

/// Directory holding everything clical persists: OAuth client secret, cached
/// token, session records, the optional calendar id and `config.json`.
#[derive(Debug, Clone)]
pub struct DataHome {
    root: PathBuf,
}

impl DataHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `CLICAL_HOME` if set, otherwise `~/.clical`.
    pub fn resolve() -> Self {
        if let Ok(custom) = env::var("CLICAL_HOME") {
            let trimmed = custom.trim();
            if !trimmed.is_empty() {
                return Self::new(trimmed);
            }
        }

        Self::new(
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".clical"),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create data directory {}", self.root.display()))
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn client_secret_path(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn token_path(&self) -> PathBuf {
        self.root.join("token.json")
    }

    pub fn calendar_id_path(&self) -> PathBuf {
        self.root.join("calendarId.txt")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.clone()
    }

    /// First non-empty line of `calendarId.txt`. A missing file means the
    /// primary calendar and is not an error.
    pub fn calendar_override(&self) -> Result<Option<String>> {
        read_calendar_id(&self.calendar_id_path())
    }
}

pub fn read_calendar_id(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
