//! TOML configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::urlmap::UrlMap;

/// Runtime configuration read from the TOML config file. Unknown keys are
/// rejected so that typos fail loudly at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seconds between Release/InRelease refresh ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Seconds a failed fetch result is served from the negative cache.
    #[serde(default = "default_cache_period")]
    pub cache_period: u64,

    /// Absolute directory for repository index files. Never evicted.
    pub meta_dir: PathBuf,

    /// Absolute directory for package payload files. Must differ from
    /// `meta_dir`.
    pub cache_dir: PathBuf,

    /// Payload cache capacity in GiB; 0 disables eviction.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Path prefix → upstream repository base URL.
    pub mapping: HashMap<String, String>,
}

fn default_check_interval() -> u64 {
    15
}

fn default_cache_period() -> u64 {
    3
}

fn default_cache_capacity() -> u64 {
    1
}

impl Config {
    /// Payload cache capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.cache_capacity << 30
    }

    /// Build the prefix → upstream URL table from `mapping`.
    pub fn url_map(&self) -> Result<UrlMap> {
        let mut um = UrlMap::new();
        for (prefix, base) in &self.mapping {
            let base = Url::parse(base)
                .with_context(|| format!("invalid upstream URL for prefix {prefix}: {base}"))?;
            um.register(prefix, base);
        }
        Ok(um)
    }
}

/// Load and validate a [`Config`] from the TOML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.meta_dir.is_absolute(),
        "meta_dir must be an absolute path"
    );
    anyhow::ensure!(
        config.cache_dir.is_absolute(),
        "cache_dir must be an absolute path"
    );
    anyhow::ensure!(
        config.meta_dir != config.cache_dir,
        "meta_dir and cache_dir must differ"
    );
    anyhow::ensure!(
        !config.mapping.is_empty(),
        "mapping must define at least one prefix"
    );
    for (prefix, base) in &config.mapping {
        let trimmed = prefix.trim_matches('/');
        anyhow::ensure!(
            !trimmed.is_empty() && !trimmed.contains('/'),
            "mapping prefix must be a single path segment: {prefix:?}"
        );
        let url = Url::parse(base)
            .with_context(|| format!("invalid upstream URL for prefix {prefix}: {base}"))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "upstream URL for prefix {prefix} must be http or https: {base}"
        );
    }
    Ok(())
}
