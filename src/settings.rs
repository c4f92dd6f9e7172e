use std::path::PathBuf;

use anyhow::{ensure, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

/// Run settings. Built-in defaults, then `boxscore.toml` in the working
/// directory if present, then `BOXSCORE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Completed records are also appended here when set.
    pub jsonl_path: Option<PathBuf>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Games still incomplete after this long are given up on.
    pub pending_timeout_secs: u64,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("db_path", "data/boxscores.sqlite")?
        .set_default("concurrency", 8_i64)?
        .set_default("max_retries", 3_i64)?
        .set_default("backoff_ms", 2000_i64)?
        .set_default("request_timeout_secs", 30_i64)?
        .set_default("user_agent", concat!("boxscore_etl/", env!("CARGO_PKG_VERSION")))?
        .set_default("pending_timeout_secs", 600_i64)?)
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings: Settings = defaults()?
            .add_source(File::with_name("boxscore").required(false))
            .add_source(Environment::with_prefix("BOXSCORE"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.concurrency > 0, "concurrency must be at least 1");
        ensure!(self.pending_timeout_secs > 0, "pending_timeout_secs must be positive");
        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    /// Built-in defaults only, with short timeouts.
    pub(crate) fn for_tests() -> Self {
        let mut s: Settings = defaults()
            .and_then(|b| Ok(b.build()?.try_deserialize()?))
            .unwrap();
        s.backoff_ms = 1;
        s.concurrency = 2;
        s
    }
}
