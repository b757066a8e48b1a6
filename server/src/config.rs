use anyhow::{Context, Result};
use puosu_execution::AutomationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_STATS_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// SQLite file backing the datastore. An in-memory database is used when unset.
    pub database_path: Option<PathBuf>,
    /// Base URL of the third-party match statistics API. `verify-match` reports every player as
    /// unavailable when unset.
    pub stats_api_url: Option<String>,
    pub stats_timeout_ms: u64,
    pub function_rate_limit_per_minute: Option<u64>,
    pub function_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    /// Seeds the simulation RNG so runs are reproducible.
    pub deterministic_seed: Option<u64>,
    pub automation: AutomationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            stats_api_url: None,
            stats_timeout_ms: DEFAULT_STATS_TIMEOUT_MS,
            function_rate_limit_per_minute: None,
            function_rate_limit_burst: None,
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            deterministic_seed: None,
            automation: AutomationConfig::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("invalid {var}: {value} ({err})")),
        _ => Ok(None),
    }
}

impl ServerConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Applies operational overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(rate) = parse_var(&lookup, "RATE_LIMIT_FUNCTIONS_PER_MIN")? {
            self.function_rate_limit_per_minute = Some(rate);
        }
        if let Some(burst) = parse_var(&lookup, "RATE_LIMIT_FUNCTIONS_BURST")? {
            self.function_rate_limit_burst = Some(burst);
        }
        if let Some(url) = lookup("STATS_API_URL").filter(|url| !url.trim().is_empty()) {
            self.stats_api_url = Some(url.trim().to_string());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.automation
            .validate()
            .map_err(|err| anyhow::anyhow!("invalid automation config: {err}"))?;
        if let Some(raw) = &self.stats_api_url {
            let url = Url::parse(raw).with_context(|| format!("invalid stats_api_url: {raw}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("stats_api_url must be http or https: {raw}");
            }
        }
        if self.stats_timeout_ms == 0 {
            anyhow::bail!("stats_timeout_ms must be > 0");
        }
        Ok(())
    }

    /// Per-IP limit on the function routes, when both knobs are set and non-zero.
    pub fn function_rate_limit(&self) -> Option<(u64, u32)> {
        match (
            self.function_rate_limit_per_minute,
            self.function_rate_limit_burst,
        ) {
            (Some(rate), Some(burst)) if rate > 0 && burst > 0 => Some((rate, burst)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_yaml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stats_api_url: https://stats.example/v1\nautomation:\n  min_active_tournaments: 4\n"
        )
        .unwrap();
        let config = ServerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.automation.min_active_tournaments, 4);
        assert_eq!(
            config.automation.max_active_duration_ms,
            AutomationConfig::default().max_active_duration_ms
        );
        assert_eq!(
            config.http_body_limit_bytes,
            Some(DEFAULT_HTTP_BODY_LIMIT_BYTES)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RATE_LIMIT_FUNCTIONS_PER_MIN", "120"),
            ("RATE_LIMIT_FUNCTIONS_BURST", "10"),
            ("STATS_API_URL", " http://127.0.0.1:9000/ "),
        ]
        .into_iter()
        .collect();
        let mut config = ServerConfig::default();
        config
            .apply_overrides(|var| env.get(var).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.function_rate_limit(), Some((120, 10)));
        assert_eq!(
            config.stats_api_url.as_deref(),
            Some("http://127.0.0.1:9000/")
        );

        let err = ServerConfig::default()
            .apply_overrides(|var| {
                (var == "RATE_LIMIT_FUNCTIONS_BURST").then(|| "lots".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_FUNCTIONS_BURST"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig {
            stats_api_url: Some("ftp://stats.example".into()),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        config.stats_api_url = None;
        config.automation.simulation.crash_probability = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("crash_probability"), "unexpected error: {err}");
    }

    #[test]
    fn test_rate_limit_requires_both_knobs() {
        let config = ServerConfig {
            function_rate_limit_per_minute: Some(60),
            ..ServerConfig::default()
        };
        assert_eq!(config.function_rate_limit(), None);
    }
}
