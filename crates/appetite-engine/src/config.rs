//! Engine configuration.

use crate::error::{AppetiteError, AppetiteResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Amber margin for `between` metrics, as a fraction of the corridor
    /// width. A metric may override it.
    #[serde(default = "default_between_amber_margin")]
    pub between_amber_margin: f64,

    /// Traversal cap for the category tree.
    #[serde(default = "default_max_category_depth")]
    pub max_category_depth: usize,

    /// Capacity of the recompute task channel.
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            between_amber_margin: default_between_amber_margin(),
            max_category_depth: default_max_category_depth(),
            dispatch_capacity: default_dispatch_capacity(),
        }
    }
}

fn default_between_amber_margin() -> f64 {
    0.10
}

fn default_max_category_depth() -> usize {
    16
}

fn default_dispatch_capacity() -> usize {
    256
}

impl EngineConfig {
    pub fn validate(&self) -> AppetiteResult<()> {
        appetite_types::validate_margin(self.between_amber_margin)?;
        if self.max_category_depth == 0 {
            return Err(AppetiteError::Validation(
                "max_category_depth must be at least 1".to_string(),
            ));
        }
        if self.dispatch_capacity == 0 {
            return Err(AppetiteError::Validation(
                "dispatch_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.between_amber_margin, 0.10);
        assert_eq!(config.max_category_depth, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"between_amber_margin": 0.2}"#).unwrap();
        assert_eq!(config.between_amber_margin, 0.2);
        assert_eq!(config.dispatch_capacity, 256);
    }

    #[test]
    fn rejects_out_of_range_margin() {
        let config = EngineConfig {
            between_amber_margin: 0.75,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppetiteError::Validation(_))));
    }
}
