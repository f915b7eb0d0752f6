//! Tessera Config - Topology Configuration
//!
//! Bootstrap configuration describing data sources, their physical
//! databases, and the abstract tables sharded across them. Loaded once from
//! TOML at startup and turned into an immutable sharding registry.
//!
//! Key Features:
//! - Data source and physical database declarations with read/write roles
//! - Abstract table declarations with ordered physical tables
//! - Modulo and range sharding rules
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Database Configuration
// =============================================================================

/// Read/write role of a physical database inside a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadWriteType {
    Read,
    Write,
    #[default]
    ReadAndWrite,
}

impl ReadWriteType {
    pub fn can_read(&self) -> bool {
        matches!(self, ReadWriteType::Read | ReadWriteType::ReadAndWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, ReadWriteType::Write | ReadWriteType::ReadAndWrite)
    }
}

/// One physical database belonging to a data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default)]
    pub role: ReadWriteType,
}

// =============================================================================
// Table Configuration
// =============================================================================

/// One physical table and the database holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalTableConfig {
    pub name: String,
    pub database: String,
}

/// Sharding rule declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    Mod { field: String, shard_count: usize },
    Range { field: String, upper_bounds: Vec<i64> },
}

/// An abstract table and its physical layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub physical_tables: Vec<PhysicalTableConfig>,
    pub rule: RuleConfig,
}

// =============================================================================
// Data Source Configuration
// =============================================================================

/// A named group of physical databases of one vendor type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(default = "default_database_type")]
    pub database_type: String,
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

fn default_database_type() -> String {
    "memory".to_string()
}

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// Complete sharding topology configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingConfig {
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
}

impl ShardingConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TesseraError::Configuration(e.to_string()))
    }

    /// Render the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TesseraError::Serialization(e.to_string()))
    }

    /// Total number of abstract tables across all data sources.
    pub fn table_count(&self) -> usize {
        self.data_sources.iter().map(|ds| ds.tables.len()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[data_sources]]
name = "BaseDb"

[[data_sources.databases]]
name = "BaseDb"
role = "read_and_write"

[[data_sources.tables]]
name = "Base_UnitTest"
physical_tables = [
    { name = "Base_UnitTest_0", database = "BaseDb" },
    { name = "Base_UnitTest_1", database = "BaseDb" },
    { name = "Base_UnitTest_2", database = "BaseDb" },
]
rule = { kind = "mod", field = "Id", shard_count = 3 }
"#;

    #[test]
    fn test_parse_sample() {
        let config = ShardingConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.data_sources.len(), 1);
        let ds = &config.data_sources[0];
        assert_eq!(ds.database_type, "memory");
        assert_eq!(ds.databases[0].role, ReadWriteType::ReadAndWrite);
        assert_eq!(ds.tables[0].physical_tables.len(), 3);
        assert_eq!(
            ds.tables[0].rule,
            RuleConfig::Mod {
                field: "Id".into(),
                shard_count: 3
            }
        );
        assert_eq!(config.table_count(), 1);
    }

    #[test]
    fn test_range_rule() {
        let text = r#"
[[data_sources]]
name = "Orders"
database_type = "memory"
databases = [{ name = "orders_a", role = "write" }, { name = "orders_b", role = "read" }]

[[data_sources.tables]]
name = "Order"
physical_tables = [{ name = "Order_0", database = "orders_a" }, { name = "Order_1", database = "orders_a" }]
rule = { kind = "range", field = "CreatedDay", upper_bounds = [100] }
"#;
        let config = ShardingConfig::from_toml_str(text).unwrap();
        let ds = &config.data_sources[0];
        assert!(!ds.databases[0].role.can_read());
        assert!(!ds.databases[1].role.can_write());
        assert!(matches!(ds.tables[0].rule, RuleConfig::Range { ref upper_bounds, .. } if upper_bounds == &vec![100]));
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = ShardingConfig::from_toml_str("data_sources = 5").unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ShardingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data_sources[0].name, "BaseDb");

        let rendered = config.to_toml_string().unwrap();
        let reparsed = ShardingConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.table_count(), 1);
    }
}
