//! Tessera Topology
//!
//! Data sources, physical databases, physical tables and the abstract
//! tables built on top of them.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::rule::ShardingRule;
use serde::{Deserialize, Serialize};
use tessera_common::config::ReadWriteType;

// =============================================================================
// Physical Layout
// =============================================================================

/// One physical database of a data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalDatabase {
    pub name: String,
    pub role: ReadWriteType,
}

impl PhysicalDatabase {
    pub fn new(name: impl Into<String>, role: ReadWriteType) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// A named group of physical databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub database_type: String,
    pub databases: Vec<PhysicalDatabase>,
}

impl DataSource {
    pub fn new(name: impl Into<String>, database_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_type: database_type.into(),
            databases: Vec::new(),
        }
    }

    pub fn with_database(mut self, database: PhysicalDatabase) -> Self {
        self.databases.push(database);
        self
    }

    pub fn database(&self, name: &str) -> Option<&PhysicalDatabase> {
        self.databases.iter().find(|db| db.name == name)
    }
}

/// One concrete storage location for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalTable {
    pub name: String,
    pub database: String,
}

impl PhysicalTable {
    pub fn new(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
        }
    }
}

// =============================================================================
// Abstract Table
// =============================================================================

/// A logical table backed by an ordered list of physical tables.
///
/// The physical table count is fixed for the lifetime of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractTable {
    pub name: String,
    pub data_source: String,
    pub physical_tables: Vec<PhysicalTable>,
    pub rule: ShardingRule,
}

impl AbstractTable {
    pub fn shard_count(&self) -> usize {
        self.physical_tables.len()
    }

    pub fn shard_key(&self) -> &str {
        self.rule.field()
    }

    pub fn physical_table(&self, index: usize) -> Option<&PhysicalTable> {
        self.physical_tables.get(index)
    }
}
