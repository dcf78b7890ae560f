use crate::storage::buffer::clock::ClockReplacer;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::replacer::Replacer;
use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Eviction policy installed in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacerKind {
    #[default]
    Lru,
    Clock,
}

impl ReplacerKind {
    pub fn build(self, pool_size: usize) -> Box<dyn Replacer> {
        match self {
            ReplacerKind::Lru => Box::new(LruReplacer::new(pool_size)),
            ReplacerKind::Clock => Box::new(ClockReplacer::new(pool_size)),
        }
    }
}

impl FromStr for ReplacerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(ReplacerKind::Lru),
            "clock" => Ok(ReplacerKind::Clock),
            other => Err(format!("unknown replacer {:?}, expected lru or clock", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Frames in the buffer pool
    pub pool_size: usize,
    pub replacer: ReplacerKind,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer: ReplacerKind::Lru,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the optional file, then `EMBERDB_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Config> {
        let defaults = Config::default();
        let mut cfg = config::Config::builder()
            .set_default("pool_size", defaults.pool_size as i64)?
            .set_default("replacer", "lru")?
            .set_default("log_level", defaults.log_level)?;
        if let Some(file) = file {
            cfg = cfg.add_source(config::File::from(file));
        }
        cfg = cfg.add_source(config::Environment::with_prefix("EMBERDB"));
        Ok(cfg.build()?.try_deserialize()?)
    }
}
