// Runtime settings and experiment files
//
// Settings come from an optional TOML file layered with `RETRIEVAL__*`
// environment variables (`RETRIEVAL__POOL__MAX_PROCESSES=8`). Command argv
// variables are split on spaces (`RETRIEVAL__COMMANDS__RETRIEVAL="python3 retrieve.py"`).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use retrieval_core::application::worker::constants::{
    DEFAULT_MAX_PROCESSES, DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_BASE_DELAY_MS,
};
use retrieval_core::application::{PlanOptions, PoolConfig};
use retrieval_core::domain::ExperimentSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file read from the working directory when none is given
pub const DEFAULT_SETTINGS_FILE: &str = "retrieval.toml";
const DEFAULT_DB_PATH: &str = "~/.retrieval-grid/ledger.db";
const ENV_PREFIX: &str = "RETRIEVAL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: String,
    pub pool: PoolSettings,
    pub commands: CommandSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            pool: PoolSettings::default(),
            commands: CommandSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_processes: usize,
    pub poll_interval_secs: f64,
    pub job_timeout_secs: Option<u64>,
    pub max_attempts: i32,
    pub retry_base_delay_ms: i64,
    pub backoff_factor: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs_f64(),
            job_timeout_secs: None,
            max_attempts: 1,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            backoff_factor: 2.0,
        }
    }
}

/// External programs, as argv vectors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub climate: Vec<String>,
    pub spectrum: Vec<String>,
    pub retrieval: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env_allowlist: Vec<String>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            climate: Vec::new(),
            spectrum: Vec::new(),
            retrieval: Vec::new(),
            working_dir: None,
            env_allowlist: ["PATH", "HOME", "USER", "PYTHONPATH", "OMP_NUM_THREADS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn require<'a>(argv: &'a [String], key: &str) -> Result<&'a [String]> {
    if argv.is_empty() {
        bail!(
            "commands.{} is not configured (set it in {} or RETRIEVAL__COMMANDS__{})",
            key,
            DEFAULT_SETTINGS_FILE,
            key.to_uppercase()
        );
    }
    Ok(argv)
}

impl CommandSettings {
    pub fn climate(&self) -> Result<&[String]> {
        require(&self.climate, "climate")
    }

    pub fn spectrum(&self) -> Result<&[String]> {
        require(&self.spectrum, "spectrum")
    }

    pub fn retrieval(&self) -> Result<&[String]> {
        require(&self.retrieval, "retrieval")
    }
}

impl Settings {
    /// Load settings
    ///
    /// An explicit `path` must exist; otherwise `retrieval.toml` in the
    /// working directory is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::new(DEFAULT_SETTINGS_FILE, FileFormat::Toml).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("commands.climate")
                    .with_list_parse_key("commands.spectrum")
                    .with_list_parse_key("commands.retrieval")
                    .with_list_parse_key("commands.env_allowlist"),
            )
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !(self.pool.poll_interval_secs.is_finite() && self.pool.poll_interval_secs > 0.0) {
            bail!("pool.poll_interval_secs must be positive");
        }
        if self.pool.max_attempts < 1 {
            bail!("pool.max_attempts must be at least 1");
        }
        if self.pool.retry_base_delay_ms < 0 {
            bail!("pool.retry_base_delay_ms must not be negative");
        }
        Ok(())
    }

    /// Ledger path with `~` expanded
    pub fn db_path(&self) -> String {
        shellexpand::tilde(&self.db_path).into_owned()
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_processes: self.pool.max_processes,
            poll_interval: Duration::from_secs_f64(self.pool.poll_interval_secs),
            job_timeout: self.pool.job_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn plan_options(&self, resume: bool) -> PlanOptions {
        PlanOptions {
            resume,
            max_attempts: self.pool.max_attempts,
            backoff_factor: self.pool.backoff_factor,
        }
    }
}

/// Expand `~` and resolve relative paths against `base`
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
    if expanded.is_relative() {
        base.join(expanded)
    } else {
        expanded
    }
}

/// Load and validate an experiment TOML file
///
/// `save_dir` and `template` are resolved relative to the file's directory.
pub fn load_experiment(path: &Path) -> Result<ExperimentSpec> {
    let mut spec: ExperimentSpec = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(true))
        .build()
        .with_context(|| format!("Failed to read experiment {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("Invalid experiment {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    spec.save_dir = resolve_path(base, &spec.save_dir);
    spec.template = resolve_path(base, &spec.template);

    spec.validate()
        .with_context(|| format!("Invalid experiment {}", path.display()))?;
    Ok(spec)
}
