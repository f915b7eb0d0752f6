//! Tessera Sharding Rules
//!
//! Pure functions from a shard-key value to a physical table index.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use tessera_common::config::RuleConfig;
use tessera_common::utils::key_hash;
use tessera_common::{Result, TesseraError, Value};

// =============================================================================
// Sharding Rule
// =============================================================================

/// Placement rule for one abstract table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShardingRule {
    /// `index = hash(key) mod shard_count`.
    ///
    /// Integer keys hash to their absolute value, string keys to a stable
    /// xxHash3 of their UTF-8 bytes.
    Mod { field: String, shard_count: usize },
    /// `index = number of upper bounds <= key`, so shard `i` holds keys in
    /// `[upper_bounds[i-1], upper_bounds[i])`.
    Range { field: String, upper_bounds: Vec<i64> },
}

impl ShardingRule {
    /// Create a modulo rule.
    pub fn modulo(field: impl Into<String>, shard_count: usize) -> Self {
        Self::Mod {
            field: field.into(),
            shard_count,
        }
    }

    /// Create a range rule.
    pub fn range(field: impl Into<String>, upper_bounds: Vec<i64>) -> Self {
        Self::Range {
            field: field.into(),
            upper_bounds,
        }
    }

    /// Build a rule from its configuration declaration.
    pub fn from_config(config: &RuleConfig) -> Result<Self> {
        let rule = match config {
            RuleConfig::Mod { field, shard_count } => Self::modulo(field.clone(), *shard_count),
            RuleConfig::Range { field, upper_bounds } => Self::range(field.clone(), upper_bounds.clone()),
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Name of the shard-key field.
    pub fn field(&self) -> &str {
        match self {
            Self::Mod { field, .. } | Self::Range { field, .. } => field,
        }
    }

    /// Number of physical tables this rule distributes over.
    pub fn shard_count(&self) -> usize {
        match self {
            Self::Mod { shard_count, .. } => *shard_count,
            Self::Range { upper_bounds, .. } => upper_bounds.len() + 1,
        }
    }

    /// Check the rule is internally consistent.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Mod { shard_count: 0, field } => Err(TesseraError::Configuration(format!(
                "mod rule on '{}' must have at least one shard",
                field
            ))),
            Self::Range { upper_bounds, field } if upper_bounds.windows(2).any(|w| w[0] >= w[1]) => {
                Err(TesseraError::Configuration(format!(
                    "range rule on '{}' needs strictly increasing bounds",
                    field
                )))
            }
            _ => Ok(()),
        }
    }

    /// Map a shard-key value to a physical table index.
    pub fn resolve(&self, key: &Value) -> Result<usize> {
        match self {
            Self::Mod { shard_count, field } => {
                let hash = match key {
                    Value::Integer(i) => i.unsigned_abs(),
                    Value::String(s) => key_hash(s),
                    other => return Err(unsupported_key(field, other)),
                };
                Ok((hash % *shard_count as u64) as usize)
            }
            Self::Range { upper_bounds, field } => match key {
                Value::Integer(i) => Ok(upper_bounds.partition_point(|bound| bound <= i)),
                other => Err(unsupported_key(field, other)),
            },
        }
    }
}

fn unsupported_key(field: &str, key: &Value) -> TesseraError {
    TesseraError::InvalidArgument(format!(
        "shard key '{}' cannot be a {} value",
        field,
        key.type_name()
    ))
}

// =============================================================================
// Tests
// =============================================================================
