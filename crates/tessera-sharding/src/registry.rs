//! Tessera Sharding Registry
//!
//! Maps (data source, abstract table) to the ordered physical tables and
//! sharding rule of that table. Registration happens on a single-threaded
//! builder at startup; `build` validates the topology and freezes it into
//! an immutable registry that is shared read-only from then on.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::rule::ShardingRule;
use crate::topology::{AbstractTable, DataSource, PhysicalDatabase, PhysicalTable};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_common::config::ShardingConfig;
use tessera_common::{Result, TesseraError};

// =============================================================================
// Registry Builder
// =============================================================================

/// Mutable registration surface used while bootstrapping.
#[derive(Debug, Default)]
pub struct ShardingRegistryBuilder {
    data_sources: BTreeMap<String, DataSource>,
    tables: BTreeMap<(String, String), AbstractTable>,
}

impl ShardingRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a data source. A later declaration with the same name replaces it.
    pub fn add_data_source(&mut self, data_source: DataSource) -> &mut Self {
        self.data_sources.insert(data_source.name.clone(), data_source);
        self
    }

    /// Register an abstract table. Registration is idempotent by name; the
    /// last registration for a (data source, table) pair wins.
    pub fn register(
        &mut self,
        data_source: impl Into<String>,
        table: impl Into<String>,
        physical_tables: Vec<PhysicalTable>,
        rule: ShardingRule,
    ) -> Result<&mut Self> {
        let data_source = data_source.into();
        let table = table.into();

        if physical_tables.is_empty() {
            return Err(TesseraError::Configuration(format!(
                "abstract table '{}' has no physical tables",
                table
            )));
        }
        rule.validate()?;
        if rule.shard_count() != physical_tables.len() {
            return Err(TesseraError::Configuration(format!(
                "abstract table '{}' declares {} shards but registers {} physical tables",
                table,
                rule.shard_count(),
                physical_tables.len()
            )));
        }

        let key = (data_source.clone(), table.clone());
        if self.tables.contains_key(&key) {
            tracing::debug!(data_source = %data_source, table = %table, "replacing abstract table registration");
        }
        self.tables.insert(
            key,
            AbstractTable {
                name: table,
                data_source,
                physical_tables,
                rule,
            },
        );
        Ok(self)
    }

    /// Validate cross references and freeze the registry.
    pub fn build(self) -> Result<ShardingRegistry> {
        let mut tables: BTreeMap<String, BTreeMap<String, Arc<AbstractTable>>> = BTreeMap::new();

        for ((ds_name, table_name), table) in self.tables {
            let data_source = self.data_sources.get(&ds_name).ok_or_else(|| {
                TesseraError::Configuration(format!(
                    "abstract table '{}' references unknown data source '{}'",
                    table_name, ds_name
                ))
            })?;

            for physical in &table.physical_tables {
                if data_source.database(&physical.database).is_none() {
                    return Err(TesseraError::Configuration(format!(
                        "physical table '{}' references database '{}' not declared by data source '{}'",
                        physical.name, physical.database, ds_name
                    )));
                }
            }

            tables.entry(ds_name).or_default().insert(table_name, Arc::new(table));
        }

        Ok(ShardingRegistry {
            data_sources: self.data_sources,
            tables,
        })
    }
}

// =============================================================================
// Sharding Registry
// =============================================================================

/// Immutable sharding topology.
#[derive(Debug, Clone)]
pub struct ShardingRegistry {
    data_sources: BTreeMap<String, DataSource>,
    tables: BTreeMap<String, BTreeMap<String, Arc<AbstractTable>>>,
}

impl ShardingRegistry {
    pub fn builder() -> ShardingRegistryBuilder {
        ShardingRegistryBuilder::new()
    }

    /// Build a registry from the bootstrap configuration.
    pub fn from_config(config: &ShardingConfig) -> Result<Self> {
        let mut builder = ShardingRegistryBuilder::new();

        for ds in &config.data_sources {
            let mut data_source = DataSource::new(ds.name.clone(), ds.database_type.clone());
            for db in &ds.databases {
                data_source = data_source.with_database(PhysicalDatabase::new(db.name.clone(), db.role));
            }
            builder.add_data_source(data_source);

            for table in &ds.tables {
                let physical_tables = table
                    .physical_tables
                    .iter()
                    .map(|pt| PhysicalTable::new(pt.name.clone(), pt.database.clone()))
                    .collect();
                builder.register(
                    ds.name.clone(),
                    table.name.clone(),
                    physical_tables,
                    ShardingRule::from_config(&table.rule)?,
                )?;
            }
        }

        let registry = builder.build()?;
        tracing::info!(
            data_sources = registry.data_sources.len(),
            tables = registry.tables().count(),
            "sharding registry built"
        );
        Ok(registry)
    }

    /// Resolve an abstract table by name across all data sources.
    pub fn resolve(&self, table: &str) -> Result<Arc<AbstractTable>> {
        let mut matches = self.tables.values().filter_map(|tables| tables.get(table));
        let found = matches.next().ok_or_else(|| not_registered(table))?;
        if matches.next().is_some() {
            return Err(TesseraError::Configuration(format!(
                "abstract table '{}' is registered in several data sources",
                table
            )));
        }
        Ok(Arc::clone(found))
    }

    /// Resolve an abstract table within one data source.
    pub fn resolve_in(&self, data_source: &str, table: &str) -> Result<Arc<AbstractTable>> {
        self.tables
            .get(data_source)
            .and_then(|tables| tables.get(table))
            .cloned()
            .ok_or_else(|| not_registered(table))
    }

    pub fn data_source(&self, name: &str) -> Option<&DataSource> {
        self.data_sources.get(name)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSource> {
        self.data_sources.values()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<AbstractTable>> {
        self.tables.values().flat_map(|tables| tables.values())
    }
}

fn not_registered(table: &str) -> TesseraError {
    TesseraError::Configuration(format!("abstract table '{}' is not registered", table))
}

// =============================================================================
// Tests
// =============================================================================
