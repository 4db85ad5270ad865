//! Runner configuration, read from `CADENCE_*` environment variables

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use cadence_core::{DriverConfig, SimEngineConfig, DEFAULT_ADMISSION_CAP};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Requests admitted over the whole run
    pub admission_cap: u64,
    /// JSON catalog to load instead of the built-in one
    pub catalog_path: Option<PathBuf>,
    pub engine: SimEngineConfig,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SimEngineConfig::default();

        let engine = SimEngineConfig {
            seed: parse_var(&lookup, "CADENCE_SEED")?.unwrap_or(defaults.seed),
            max_num_seqs: parse_var(&lookup, "CADENCE_MAX_NUM_SEQS")?
                .unwrap_or(defaults.max_num_seqs),
            num_kv_pages: parse_var(&lookup, "CADENCE_KV_PAGES")?
                .unwrap_or(defaults.num_kv_pages),
        };
        if engine.max_num_seqs == 0 {
            bail!("CADENCE_MAX_NUM_SEQS must be at least 1");
        }
        if engine.num_kv_pages == 0 {
            bail!("CADENCE_KV_PAGES must be at least 1");
        }

        Ok(Self {
            admission_cap: parse_var(&lookup, "CADENCE_ADMISSION_CAP")?
                .unwrap_or(DEFAULT_ADMISSION_CAP),
            catalog_path: lookup("CADENCE_CATALOG")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            engine,
        })
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig::with_admission_cap(self.admission_cap)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value {:?} for {}", raw, key))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<RunnerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.admission_cap, DEFAULT_ADMISSION_CAP);
        assert_eq!(config.catalog_path, None);
        assert_eq!(config.engine, SimEngineConfig::default());
        assert_eq!(config.driver_config().admission_cap, 101);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CADENCE_ADMISSION_CAP", "7"),
            ("CADENCE_CATALOG", "/tmp/catalog.json"),
            ("CADENCE_SEED", " 9 "),
            ("CADENCE_MAX_NUM_SEQS", "4"),
            ("CADENCE_KV_PAGES", "64"),
        ])
        .unwrap();
        assert_eq!(config.admission_cap, 7);
        assert_eq!(config.catalog_path, Some(PathBuf::from("/tmp/catalog.json")));
        assert_eq!(config.engine.seed, 9);
        assert_eq!(config.engine.max_num_seqs, 4);
        assert_eq!(config.engine.num_kv_pages, 64);
    }

    #[test]
    fn test_malformed_value_names_variable() {
        let err = config_from(&[("CADENCE_ADMISSION_CAP", "many")]).unwrap_err();
        assert!(err.to_string().contains("CADENCE_ADMISSION_CAP"));
    }

    #[test]
    fn test_zero_batch_rejected() {
        assert!(config_from(&[("CADENCE_MAX_NUM_SEQS", "0")]).is_err());
        assert!(config_from(&[("CADENCE_KV_PAGES", "0")]).is_err());
    }

    #[test]
    fn test_empty_catalog_path_ignored() {
        let config = config_from(&[("CADENCE_CATALOG", "")]).unwrap();
        assert_eq!(config.catalog_path, None);
    }
}
