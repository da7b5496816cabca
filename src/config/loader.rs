//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use regex_lite::Regex;
use std::path::Path;

/// Matches `${VAR}` and `${VAR:-default}`
const ENV_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Expand, parse and validate YAML text
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables.
    ///
    /// - `${VAR}` - replaced by the variable, placeholder kept if unset
    /// - `${VAR:-default}` - replaced by the variable, or `default` if unset
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(ENV_PATTERN)
            .map_err(|e| ConfigError::ValidationError(format!("env pattern: {}", e)))?;

        let mut result = String::with_capacity(content.len());
        let mut last_match = 0;

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            result.push_str(&content[last_match..full_match.start()]);

            match (std::env::var(var_name.as_str()), cap.get(2)) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default.as_str()),
                (Err(_), None) => result.push_str(full_match.as_str()),
            }

            last_match = full_match.end();
        }

        result.push_str(&content[last_match..]);
        Ok(result)
    }
}
