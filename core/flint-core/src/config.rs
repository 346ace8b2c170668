//! Session configuration.
//!
//! `SessionConfig` is a plain serde struct: build it with `with_*` methods,
//! deserialize it from JSON, or overlay `FLINT_*` environment variables on
//! the defaults.

use crate::error::{FlintError, FlintResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Default number of rows per produced batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Default byte budget for a hash-join build side.
pub const DEFAULT_HASH_JOIN_MEMORY_BUDGET: usize = 64 * 1024 * 1024;

/// Default maximum AST nesting depth.
pub const DEFAULT_PARSER_RECURSION_LIMIT: usize = 64;

/// Optimizer switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Skip the optimizer entirely when false
    pub enabled: bool,
    /// Iteration cap for the fixed-point loop
    pub max_passes: usize,
    pub predicate_pushdown: bool,
    pub projection_pruning: bool,
    pub constant_folding: bool,
    pub limit_pushdown: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_passes: 3,
            predicate_pushdown: true,
            projection_pruning: true,
            constant_folding: true,
            limit_pushdown: true,
        }
    }
}

/// Configuration owned by a [`SessionContext`](crate::SessionContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Target rows per output batch
    pub batch_size: usize,
    /// Upper bound on bytes buffered by one query execution (None = unbounded)
    pub memory_limit: Option<usize>,
    /// Largest estimated build side for which a hash join is chosen
    pub hash_join_memory_budget: usize,
    /// When false, equi-joins always lower to sort-merge join
    pub prefer_hash_join: bool,
    /// Maximum AST nesting depth accepted by the parser
    pub parser_recursion_limit: usize,
    pub optimizer: OptimizerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            memory_limit: None,
            hash_join_memory_budget: DEFAULT_HASH_JOIN_MEMORY_BUDGET,
            prefer_hash_join: true,
            parser_recursion_limit: DEFAULT_PARSER_RECURSION_LIMIT,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn with_hash_join_memory_budget(mut self, bytes: usize) -> Self {
        self.hash_join_memory_budget = bytes;
        self
    }

    pub fn with_prefer_hash_join(mut self, prefer: bool) -> Self {
        self.prefer_hash_join = prefer;
        self
    }

    pub fn with_optimizer_enabled(mut self, enabled: bool) -> Self {
        self.optimizer.enabled = enabled;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Reject values that would stall execution or loop forever.
    pub fn validate(&self) -> FlintResult<()> {
        if self.batch_size == 0 {
            return Err(FlintError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.optimizer.max_passes == 0 {
            return Err(FlintError::InvalidConfig(
                "optimizer.max_passes must be greater than zero".to_string(),
            ));
        }
        if self.parser_recursion_limit == 0 {
            return Err(FlintError::InvalidConfig(
                "parser_recursion_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> FlintResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| FlintError::InvalidConfig(format!("malformed config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `FLINT_*` environment variables.
    pub fn from_env() -> FlintResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_var("FLINT_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = env_var("FLINT_MEMORY_LIMIT")? {
            config.memory_limit = Some(v);
        }
        if let Some(v) = env_var("FLINT_HASH_JOIN_MEMORY_BUDGET")? {
            config.hash_join_memory_budget = v;
        }
        if let Some(v) = env_var("FLINT_PREFER_HASH_JOIN")? {
            config.prefer_hash_join = v;
        }
        if let Some(v) = env_var("FLINT_OPTIMIZER_ENABLED")? {
            config.optimizer.enabled = v;
        }
        if let Some(v) = env_var("FLINT_OPTIMIZER_MAX_PASSES")? {
            config.optimizer.max_passes = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn env_var<T: FromStr>(name: &str) -> FlintResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| FlintError::InvalidConfig(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.memory_limit.is_none());
        assert!(config.optimizer.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods() {
        let config = SessionConfig::new()
            .with_batch_size(16)
            .with_memory_limit(1024)
            .with_prefer_hash_join(false)
            .with_optimizer_enabled(false);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.memory_limit, Some(1024));
        assert!(!config.prefer_hash_join);
        assert!(!config.optimizer.enabled);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = SessionConfig::new()
            .with_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, FlintError::InvalidConfig(_)));
    }

    #[test]
    fn json_overrides_only_given_keys() {
        let config =
            SessionConfig::from_json(r#"{"batch_size": 100, "optimizer": {"max_passes": 7}}"#)
                .unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.optimizer.max_passes, 7);
        assert!(config.optimizer.predicate_pushdown);
        assert_eq!(
            config.hash_join_memory_budget,
            DEFAULT_HASH_JOIN_MEMORY_BUDGET
        );
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = SessionConfig::from_json("{batch_size: }").unwrap_err();
        assert!(matches!(err, FlintError::InvalidConfig(_)));
    }

    #[test]
    fn json_round_trip() {
        let config = SessionConfig::new().with_memory_limit(4096);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SessionConfig::from_json(&json).unwrap(), config);
    }
}
