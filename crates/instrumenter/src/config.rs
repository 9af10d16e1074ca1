use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How property outcomes are reported at runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AssertionMode {
    /// Emit `AssertionFailed` events.
    #[default]
    Log,
    /// Write a marker pattern to a scratch memory slot.
    Mstore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    pub assertion_mode: AssertionMode,
    /// Also report properties that held.
    pub cov_assertions: bool,
    /// Emit `AssertionFailedData` with the values of the identifiers of a failed property.
    pub debug_events: bool,
    /// Append `assert(false)` after reporting a failure.
    pub add_assert: bool,
    pub compiler_version: Version,
    /// Path of the generated unit holding the utility contract and free helpers.
    pub utils_path: String,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            assertion_mode: AssertionMode::default(),
            cov_assertions: false,
            debug_events: false,
            add_assert: false,
            compiler_version: Version::new(0, 8, 19),
            utils_path: "__scribble_ReentrancyUtils.sol".to_string(),
        }
    }
}

impl InstrumentationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Arithmetic is checked by default from 0.8.0 on.
    pub fn needs_unchecked_blocks(&self) -> bool {
        self.compiler_version >= Version::new(0, 8, 0)
    }

    /// Free functions are accepted from 0.7.1 on.
    pub fn supports_free_functions(&self) -> bool {
        self.compiler_version >= Version::new(0, 7, 1)
    }

    /// Whether checker functions emit events and so cannot be `view`.
    pub fn changes_mutability(&self) -> bool {
        self.assertion_mode == AssertionMode::Log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml() {
        let config = InstrumentationConfig::from_toml_str(
            r#"
            assertion_mode = "mstore"
            cov_assertions = true
            compiler_version = "0.7.6"
            "#,
        )
        .unwrap();
        assert_eq!(config.assertion_mode, AssertionMode::Mstore);
        assert!(config.cov_assertions);
        assert!(!config.debug_events);
        assert!(!config.needs_unchecked_blocks());
        assert!(config.supports_free_functions());
        assert_eq!(config.utils_path, "__scribble_ReentrancyUtils.sol");
    }

    #[test]
    fn test_invalid_toml() {
        let err = InstrumentationConfig::from_toml_str("assertion_mode = \"print\"").unwrap_err();
        assert!(matches!(err, crate::error::InstrumentationError::Config(_)));
    }
}
