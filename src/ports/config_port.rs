//! Configuration access port trait.

use crate::domain::error::BarwardenError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// `default` when the key is absent; `ConfigInvalid` when it does not parse.
    fn get_int(&self, section: &str, key: &str, default: i64) -> Result<i64, BarwardenError> {
        match self.get_string(section, key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                BarwardenError::config_invalid(section, key, format!("'{raw}' is not an integer"))
            }),
        }
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> Result<f64, BarwardenError> {
        match self.get_string(section, key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                BarwardenError::config_invalid(section, key, format!("'{raw}' is not a number"))
            }),
        }
    }
}
