use anyhow::Context;
use attendo_core::{Metric, UnknownPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration.
///
/// Defaults, then an optional TOML file named by `ATTENDO_CONFIG`, then
/// `ATTENDO_*` environment variables; later sources win.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory enrollment photos are written to.
    pub photo_dir: PathBuf,
    /// Endpoint of the face extraction sidecar.
    pub extractor_url: String,
    /// Per-request timeout for the extraction sidecar.
    pub extractor_timeout_secs: u64,
    /// Distance below which a face matches a roster entry.
    pub match_threshold: f32,
    pub metric: Metric,
    /// Seconds a label may go unseen before its interval closes.
    pub tracking_timeout_secs: f64,
    pub unknown_policy: UnknownPolicy,
    /// How often idle sessions are checked for timed-out intervals.
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("attendo");

        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            db_path: data_dir.join("face_records.db"),
            photo_dir: data_dir.join("registered_faces"),
            extractor_url: "http://127.0.0.1:5001/faces".to_string(),
            extractor_timeout_secs: 10,
            match_threshold: attendo_core::matcher::DEFAULT_MATCH_THRESHOLD,
            metric: Metric::Euclidean,
            tracking_timeout_secs: attendo_core::tracker::DEFAULT_TRACKING_TIMEOUT.as_secs_f64(),
            unknown_policy: UnknownPolicy::Ignore,
            sweep_interval_secs: 1,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("ATTENDO_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Override fields from `ATTENDO_*` variables, read through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("ATTENDO_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("ATTENDO_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDO_PHOTO_DIR") {
            self.photo_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDO_EXTRACTOR_URL") {
            self.extractor_url = v;
        }
        if let Some(v) = lookup("ATTENDO_METRIC") {
            self.metric = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = lookup("ATTENDO_TRACK_UNKNOWN") {
            self.unknown_policy = if v != "0" && !v.eq_ignore_ascii_case("false") {
                UnknownPolicy::Track
            } else {
                UnknownPolicy::Ignore
            };
        }
        parse_env(&lookup, "ATTENDO_EXTRACTOR_TIMEOUT_SECS", &mut self.extractor_timeout_secs)?;
        parse_env(&lookup, "ATTENDO_MATCH_THRESHOLD", &mut self.match_threshold)?;
        parse_env(&lookup, "ATTENDO_TRACKING_TIMEOUT_SECS", &mut self.tracking_timeout_secs)?;
        parse_env(&lookup, "ATTENDO_SWEEP_INTERVAL_SECS", &mut self.sweep_interval_secs)?;
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if Duration::try_from_secs_f64(self.tracking_timeout_secs).is_err() {
            anyhow::bail!(
                "tracking timeout must be a non-negative number of seconds, got {}",
                self.tracking_timeout_secs
            );
        }
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            anyhow::bail!("match threshold must be positive");
        }
        Ok(())
    }

    pub fn tracking_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tracking_timeout_secs)
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> anyhow::Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = lookup(key) {
        *target = v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={v:?}: {e}"))?;
    }
    Ok(())
}
