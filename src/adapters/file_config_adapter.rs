//! INI file configuration adapter with an environment overlay.
//!
//! `BARWARDEN_<SECTION>_<KEY>` overrides `[section] key`, e.g.
//! `BARWARDEN_RISK_DAILY_LOSS_CAP_USD=250` replaces `[risk] daily_loss_cap_usd`.

use crate::domain::error::BarwardenError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::Path;

pub const ENV_PREFIX: &str = "BARWARDEN_";

pub struct FileConfigAdapter {
    config: Ini,
    overrides: HashMap<(String, String), String>,
}

impl FileConfigAdapter {
    pub fn empty() -> Self {
        Self {
            config: Ini::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BarwardenError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| BarwardenError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    pub fn from_string(content: &str) -> Result<Self, BarwardenError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| BarwardenError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    /// Layers `BARWARDEN_*` variables over the file. Pass `std::env::vars()`.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some((section, key)) = Self::parse_env_name(&name) {
                tracing::debug!(%section, %key, "config value overridden from environment");
                self.overrides.insert((section, key), value);
            }
        }
        self
    }

    fn parse_env_name(name: &str) -> Option<(String, String)> {
        let rest = name.strip_prefix(ENV_PREFIX)?.to_lowercase();
        let (section, key) = rest.split_once('_')?;
        if section.is_empty() || key.is_empty() {
            return None;
        }
        Some((section.to_string(), key.to_string()))
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .cloned()
            .or_else(|| self.config.get(section, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[risk]
daily_loss_cap_usd = 250
max_drawdown_pct = 0.05

[strategy]
fast_window = 10
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_double("risk", "max_drawdown_pct", 0.0).unwrap(),
            0.05
        );
        assert_eq!(adapter.get_int("strategy", "fast_window", 0).unwrap(), 10);
    }

    #[test]
    fn missing_key_uses_default() {
        let adapter = FileConfigAdapter::from_string("[risk]\n").unwrap();
        assert_eq!(adapter.get_string("risk", "missing"), None);
        assert_eq!(adapter.get_int("risk", "missing", 42).unwrap(), 42);
        assert_eq!(adapter.get_double("missing", "key", 9.5).unwrap(), 9.5);
    }

    #[test]
    fn non_numeric_is_invalid() {
        let adapter =
            FileConfigAdapter::from_string("[strategy]\nfast_window = abc\n").unwrap();
        let err = adapter.get_int("strategy", "fast_window", 20).unwrap_err();
        assert!(
            matches!(err, BarwardenError::ConfigInvalid { ref key, .. } if key == "fast_window")
        );
        assert!(adapter.get_double("strategy", "fast_window", 1.0).is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let adapter = FileConfigAdapter::from_string("[risk]\ndaily_loss_cap_usd = 500\n")
            .unwrap()
            .with_env_overrides(env(&[
                ("BARWARDEN_RISK_DAILY_LOSS_CAP_USD", "125.5"),
                ("BARWARDEN_DATA_CACHE_TTL_SECS", "60"),
                ("PATH", "/usr/bin"),
            ]));
        assert_eq!(
            adapter.get_double("risk", "daily_loss_cap_usd", 0.0).unwrap(),
            125.5
        );
        assert_eq!(adapter.get_int("data", "cache_ttl_secs", 180).unwrap(), 60);
    }

    #[test]
    fn malformed_env_names_are_ignored() {
        assert_eq!(FileConfigAdapter::parse_env_name("BARWARDEN_RISK"), None);
        assert_eq!(FileConfigAdapter::parse_env_name("OTHER_RISK_X"), None);
        assert_eq!(
            FileConfigAdapter::parse_env_name("BARWARDEN_LIVE_POLL_OFFSET_SECS"),
            Some(("live".to_string(), "poll_offset_secs".to_string()))
        );
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[backtest]\ninitial_equity = 2500\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_double("backtest", "initial_equity", 0.0).unwrap(),
            2500.0
        );
    }

    #[test]
    fn from_file_missing_is_parse_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(result, Err(BarwardenError::ConfigParse { .. })));
    }
}
