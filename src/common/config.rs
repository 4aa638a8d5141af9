use serde::{Deserialize, Serialize};

use crate::common::error::{ExecutionError, Result};

pub const DEFAULT_MAX_ROWS_PER_BLOCK: usize = 1000;
pub const DEFAULT_MAX_BYTES_PER_BLOCK: usize = 1024 * 1024;

/// Per-query execution knobs shared by every operator of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_rows_per_block: usize,
    pub max_bytes_per_block: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_rows_per_block: DEFAULT_MAX_ROWS_PER_BLOCK,
            max_bytes_per_block: DEFAULT_MAX_BYTES_PER_BLOCK,
        }
    }
}

impl ExecutionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ExecutionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_block == 0 {
            return Err(ExecutionError::InvalidConfig("max_rows_per_block must be positive".to_string()));
        }
        if self.max_bytes_per_block == 0 {
            return Err(ExecutionError::InvalidConfig("max_bytes_per_block must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_max_rows_per_block(mut self, rows: usize) -> Self {
        self.max_rows_per_block = rows;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let config = ExecutionConfig::from_yaml_str("max_rows_per_block: 16\n").expect("config");
        assert_eq!(config.max_rows_per_block, 16);
        assert_eq!(config.max_bytes_per_block, DEFAULT_MAX_BYTES_PER_BLOCK);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(ExecutionConfig::from_yaml_str("max_rows_per_block: 0").is_err());
    }
}
