//! Tessera Sharding Database
//!
//! Entry point binding the sharding registry to the repositories serving
//! each physical database. Hands out queries over abstract tables and
//! routes writes to the physical tables that own the affected rows.
//!
//! Key Features:
//! - Query handles over abstract tables
//! - Inserts routed per row by the sharding rule
//! - Updates and deletes pruned by predicate
//! - Updates and deletes of given rows matched by primary key
//! - Participant lists for distributed transactions
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::fanout::{fan_out, ShardTarget};
use crate::query::ShardingQuery;
use crate::registry::ShardingRegistry;
use crate::router::{route, route_row};
use crate::topology::AbstractTable;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tessera_common::{Result, Row, TesseraError, Value};
use tessera_query::Predicate;
use tessera_repository::{MemoryRepository, Repository};

type RepositoryKey = (String, String);

/// One row of a key-based update, routed to its shard.
struct KeyedUpdate {
    shard: usize,
    key: Value,
    shard_value: Value,
    assignments: Row,
}

fn key_value(table: &AbstractTable, pk: &str, row: &Row) -> Result<Value> {
    let key = row.get(pk);
    if key.is_null() {
        return Err(TesseraError::InvalidArgument(format!(
            "row for '{}' is missing primary key '{}'",
            table.name, pk
        )));
    }
    Ok(key.clone())
}

// =============================================================================
// Builder
// =============================================================================

/// Binds repositories to the physical databases of a registry.
pub struct ShardingDatabaseBuilder {
    registry: Arc<ShardingRegistry>,
    repositories: HashMap<RepositoryKey, Arc<dyn Repository>>,
    primary_key: Option<String>,
}

impl ShardingDatabaseBuilder {
    /// Bind the repository serving one physical database of a data source.
    pub fn repository(
        mut self,
        data_source: impl Into<String>,
        database: impl Into<String>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        self.repositories
            .insert((data_source.into(), database.into()), repository);
        self
    }

    /// Field identifying a row for key-based updates and deletes. Defaults
    /// to each table's shard key.
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    /// Check that every physical table has a repository and freeze.
    pub fn build(self) -> Result<ShardingDatabase> {
        for table in self.registry.tables() {
            for physical in &table.physical_tables {
                let key = (table.data_source.clone(), physical.database.clone());
                if !self.repositories.contains_key(&key) {
                    return Err(TesseraError::Configuration(format!(
                        "no repository bound for database '{}' of data source '{}'",
                        physical.database, table.data_source
                    )));
                }
            }
        }

        Ok(ShardingDatabase {
            inner: Arc::new(DatabaseInner {
                registry: self.registry,
                repositories: self.repositories,
                primary_key: self.primary_key,
            }),
        })
    }
}

// =============================================================================
// Sharding Database
// =============================================================================

struct DatabaseInner {
    registry: Arc<ShardingRegistry>,
    repositories: HashMap<RepositoryKey, Arc<dyn Repository>>,
    primary_key: Option<String>,
}

/// Sharded data access over every abstract table of a registry.
#[derive(Clone)]
pub struct ShardingDatabase {
    inner: Arc<DatabaseInner>,
}

impl ShardingDatabase {
    pub fn builder(registry: Arc<ShardingRegistry>) -> ShardingDatabaseBuilder {
        ShardingDatabaseBuilder {
            registry,
            repositories: HashMap::new(),
            primary_key: None,
        }
    }

    /// Bind a fresh in-memory repository to every declared physical database.
    ///
    /// Returns the repositories in declaration order alongside the database.
    pub fn in_memory(
        registry: Arc<ShardingRegistry>,
        primary_key: Option<&str>,
    ) -> Result<(Self, Vec<Arc<MemoryRepository>>)> {
        let mut memory = Vec::new();
        let mut builder = Self::builder(Arc::clone(&registry));
        for data_source in registry.data_sources() {
            for database in &data_source.databases {
                let mut repo = MemoryRepository::new(database.name.clone());
                if let Some(pk) = primary_key {
                    repo = repo.with_primary_key(pk);
                }
                let repo = Arc::new(repo);
                builder = builder.repository(data_source.name.clone(), database.name.clone(), repo.clone());
                memory.push(repo);
            }
        }
        if let Some(pk) = primary_key {
            builder = builder.primary_key(pk);
        }
        Ok((builder.build()?, memory))
    }

    pub fn registry(&self) -> &ShardingRegistry {
        &self.inner.registry
    }

    /// Repository bound to a physical database.
    pub fn repository(&self, data_source: &str, database: &str) -> Option<Arc<dyn Repository>> {
        self.inner
            .repositories
            .get(&(data_source.to_string(), database.to_string()))
            .cloned()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Start a query over an abstract table.
    pub fn query(&self, table: &str) -> Result<ShardingQuery> {
        let table = self.inner.registry.resolve(table)?;
        self.query_for(table)
    }

    /// Start a query over an abstract table of a specific data source.
    pub fn query_in(&self, data_source: &str, table: &str) -> Result<ShardingQuery> {
        let table = self.inner.registry.resolve_in(data_source, table)?;
        self.query_for(table)
    }

    /// All rows of an abstract table.
    pub async fn get_list(&self, table: &str) -> Result<Vec<Row>> {
        self.query(table)?.to_list().await
    }

    fn query_for(&self, table: Arc<AbstractTable>) -> Result<ShardingQuery> {
        let shards = self.shard_targets(&table)?;
        Ok(ShardingQuery::new(table, shards.into()))
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert rows, each routed to its physical table by the shard key.
    ///
    /// Every row is routed before anything is written, so a row with a
    /// missing or invalid key rejects the whole batch.
    pub async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        let table = self.inner.registry.resolve(table)?;

        let mut groups: BTreeMap<usize, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let shard = route_row(&table, &row)?;
            groups.entry(shard).or_default().push(row);
        }
        if groups.is_empty() {
            return Ok(0);
        }

        let targets = self.write_targets(&table, groups.keys().copied())?;
        tracing::debug!(table = %table.name, shards = targets.len(), "dispatching sharded insert");

        let groups = &groups;
        let inserted = fan_out(&targets, |t| async move {
            let rows = groups.get(&t.index).cloned().unwrap_or_default();
            t.repository.insert(&t.table.name, rows).await
        })
        .await?;
        Ok(inserted.into_iter().sum())
    }

    /// Assign fields on every matching row. The shard key cannot be assigned.
    pub async fn update_where(&self, table: &str, predicate: Option<&Predicate>, assignments: &Row) -> Result<u64> {
        let table = self.inner.registry.resolve(table)?;
        if assignments.contains(table.shard_key()) {
            return Err(TesseraError::InvalidArgument(format!(
                "cannot assign shard key '{}' of '{}'",
                table.shard_key(),
                table.name
            )));
        }

        let decision = route(&table, predicate);
        let targets = self.write_targets(&table, decision.shards())?;
        tracing::debug!(table = %table.name, ?decision, "dispatching sharded update");

        let updated = fan_out(&targets, |t| async move {
            t.repository.update_where(&t.table.name, predicate, assignments).await
        })
        .await?;
        Ok(updated.into_iter().sum())
    }

    /// Delete every matching row.
    pub async fn delete_where(&self, table: &str, predicate: &Predicate) -> Result<u64> {
        self.delete(table, Some(predicate)).await
    }

    /// Delete every row of every physical table.
    pub async fn delete_all(&self, table: &str) -> Result<u64> {
        self.delete(table, None).await
    }

    // -------------------------------------------------------------------------
    // Key-Based Writes
    // -------------------------------------------------------------------------

    /// Write the given rows over the stored rows with the same primary key.
    ///
    /// Every field present on a row except the keys is assigned. A row must
    /// keep the shard key it is stored under. Keys with no stored row are
    /// skipped and not counted.
    pub async fn update(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        let table = self.inner.registry.resolve(table)?;
        let pk = self.primary_key(&table).to_string();
        let assignments = rows
            .iter()
            .map(|row| {
                row.fields()
                    .filter(|(field, _)| *field != pk && *field != table.shard_key())
                    .map(|(field, value)| (field, value.clone()))
                    .collect::<Row>()
            })
            .collect();
        let updates = self.keyed(&table, &pk, &rows, assignments)?;
        self.apply_keyed(&table, &pk, updates).await
    }

    /// Assign only the named fields of the given rows, matched by primary key.
    ///
    /// Naming the shard key or the primary key is rejected.
    pub async fn update_fields(&self, table: &str, rows: Vec<Row>, fields: &[&str]) -> Result<u64> {
        let table = self.inner.registry.resolve(table)?;
        let pk = self.primary_key(&table).to_string();
        if let Some(field) = fields.iter().find(|f| **f == table.shard_key() || **f == pk) {
            return Err(TesseraError::InvalidArgument(format!(
                "cannot assign key field '{}' of '{}'",
                field, table.name
            )));
        }

        let assignments = rows
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .filter(|f| row.contains(f))
                    .map(|f| (*f, row.get(f).clone()))
                    .collect::<Row>()
            })
            .collect();
        let updates = self.keyed(&table, &pk, &rows, assignments)?;
        self.apply_keyed(&table, &pk, updates).await
    }

    /// Delete the stored rows with the same primary keys as the given rows.
    pub async fn delete_rows(&self, table: &str, rows: &[Row]) -> Result<u64> {
        let table = self.inner.registry.resolve(table)?;
        let pk = self.primary_key(&table).to_string();

        let mut groups: BTreeMap<usize, Vec<Value>> = BTreeMap::new();
        for row in rows {
            let shard = route_row(&table, row)?;
            groups.entry(shard).or_default().push(key_value(&table, &pk, row)?);
        }
        if groups.is_empty() {
            return Ok(0);
        }

        let predicates: BTreeMap<usize, Predicate> = groups
            .into_iter()
            .map(|(shard, keys)| (shard, Predicate::is_in(pk.as_str(), keys)))
            .collect();
        let targets = self.write_targets(&table, predicates.keys().copied())?;
        tracing::debug!(table = %table.name, shards = targets.len(), "dispatching keyed delete");

        let predicates = &predicates;
        let deleted = fan_out(&targets, |t| async move {
            t.repository.delete_where(&t.table.name, predicates.get(&t.index)).await
        })
        .await?;
        Ok(deleted.into_iter().sum())
    }

    fn primary_key<'a>(&'a self, table: &'a AbstractTable) -> &'a str {
        self.inner.primary_key.as_deref().unwrap_or(table.shard_key())
    }

    /// Route every row and pair it with its assignments before anything is
    /// written.
    fn keyed(&self, table: &AbstractTable, pk: &str, rows: &[Row], assignments: Vec<Row>) -> Result<Vec<KeyedUpdate>> {
        rows.iter()
            .zip(assignments)
            .map(|(row, assignments)| {
                Ok(KeyedUpdate {
                    shard: route_row(table, row)?,
                    key: key_value(table, pk, row)?,
                    shard_value: row.get(table.shard_key()).clone(),
                    assignments,
                })
            })
            .collect()
    }

    async fn apply_keyed(&self, table: &Arc<AbstractTable>, pk: &str, updates: Vec<KeyedUpdate>) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        if pk != table.shard_key() {
            self.check_shard_keys(table, pk, &updates).await?;
        }

        let mut groups: BTreeMap<usize, Vec<(Predicate, Row)>> = BTreeMap::new();
        for update in updates {
            if update.assignments.is_empty() {
                continue;
            }
            groups
                .entry(update.shard)
                .or_default()
                .push((Predicate::eq(pk, update.key), update.assignments));
        }
        if groups.is_empty() {
            return Ok(0);
        }

        let targets = self.write_targets(table, groups.keys().copied())?;
        tracing::debug!(table = %table.name, shards = targets.len(), "dispatching keyed update");

        let groups = &groups;
        let updated = fan_out(&targets, |t| async move {
            let mut updated = 0;
            for (predicate, assignments) in groups.get(&t.index).into_iter().flatten() {
                updated += t.repository.update_where(&t.table.name, Some(predicate), assignments).await?;
            }
            Ok(updated)
        })
        .await?;
        Ok(updated.into_iter().sum())
    }

    /// Reject updates whose shard key differs from the stored row's.
    async fn check_shard_keys(&self, table: &Arc<AbstractTable>, pk: &str, updates: &[KeyedUpdate]) -> Result<()> {
        let keys = updates.iter().map(|u| u.key.clone());
        let stored = self
            .query_for(Arc::clone(table))?
            .filter(Predicate::is_in(pk, keys))
            .to_list()
            .await?;

        for row in &stored {
            let key = row.get(pk);
            let moved = updates.iter().any(|u| {
                u.key.total_cmp(key) == Ordering::Equal
                    && u.shard_value.total_cmp(row.get(table.shard_key())) != Ordering::Equal
            });
            if moved {
                return Err(TesseraError::InvalidArgument(format!(
                    "row {} = {} of '{}' cannot change shard key '{}'",
                    pk,
                    key,
                    table.name,
                    table.shard_key()
                )));
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> Result<u64> {
        let table = self.inner.registry.resolve(table)?;
        let decision = route(&table, predicate);
        let targets = self.write_targets(&table, decision.shards())?;
        tracing::debug!(table = %table.name, ?decision, "dispatching sharded delete");

        let deleted = fan_out(&targets, |t| async move {
            t.repository.delete_where(&t.table.name, predicate).await
        })
        .await?;
        Ok(deleted.into_iter().sum())
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Distinct repositories behind an abstract table, in shard order.
    pub fn participants(&self, table: &str) -> Result<Vec<Arc<dyn Repository>>> {
        let table = self.inner.registry.resolve(table)?;
        let mut seen = HashSet::new();
        Ok(self
            .shard_targets(&table)?
            .into_iter()
            .filter(|t| seen.insert(t.repository.id()))
            .map(|t| t.repository)
            .collect())
    }

    // -------------------------------------------------------------------------
    // Targets
    // -------------------------------------------------------------------------

    fn shard_targets(&self, table: &AbstractTable) -> Result<Vec<ShardTarget>> {
        let data_source = self.inner.registry.data_source(&table.data_source).ok_or_else(|| {
            TesseraError::Configuration(format!("unknown data source '{}'", table.data_source))
        })?;

        table
            .physical_tables
            .iter()
            .enumerate()
            .map(|(index, physical)| {
                let database = data_source.database(&physical.database).ok_or_else(|| {
                    TesseraError::Configuration(format!(
                        "unknown database '{}' for '{}'",
                        physical.database, physical.name
                    ))
                })?;
                let repository = self
                    .repository(&table.data_source, &physical.database)
                    .ok_or_else(|| {
                        TesseraError::Configuration(format!(
                            "no repository bound for database '{}'",
                            physical.database
                        ))
                    })?;
                Ok(ShardTarget {
                    index,
                    table: physical.clone(),
                    role: database.role,
                    repository,
                })
            })
            .collect()
    }

    fn write_targets(&self, table: &AbstractTable, shards: impl IntoIterator<Item = usize>) -> Result<Vec<ShardTarget>> {
        let all = self.shard_targets(table)?;
        let mut targets = Vec::new();
        for index in shards {
            let target = all.get(index).cloned().ok_or_else(|| {
                TesseraError::Configuration(format!("shard {} of '{}' does not exist", index, table.name))
            })?;
            if !target.role.can_write() {
                return Err(TesseraError::Configuration(format!(
                    "database '{}' holding '{}' is read-only",
                    target.table.database, target.table.name
                )));
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ShardingRule;
    use crate::topology::{DataSource, PhysicalDatabase, PhysicalTable};
    use tessera_common::config::ReadWriteType;

    fn registry(role: ReadWriteType) -> Arc<ShardingRegistry> {
        let mut builder = ShardingRegistry::builder();
        builder.add_data_source(
            DataSource::new("BaseDb", "memory")
                .with_database(PhysicalDatabase::new("db_a", role))
                .with_database(PhysicalDatabase::new("db_b", role)),
        );
        builder
            .register(
                "BaseDb",
                "Users",
                vec![
                    PhysicalTable::new("Users_0", "db_a"),
                    PhysicalTable::new("Users_1", "db_b"),
                    PhysicalTable::new("Users_2", "db_a"),
                ],
                ShardingRule::modulo("Id", 3),
            )
            .unwrap();
        Arc::new(builder.build().unwrap())
    }

    fn users(ids: impl IntoIterator<Item = i64>) -> Vec<Row> {
        ids.into_iter().map(|id| Row::new().with("Id", id).with("Age", id * 10)).collect()
    }

    #[tokio::test]
    async fn test_insert_routes_rows() {
        let (db, repos) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), Some("Id")).unwrap();
        let inserted = db.insert("Users", users(0..6)).await.unwrap();
        assert_eq!(inserted, 6);

        assert_eq!(repos[0].row_count("Users_0"), 2);
        assert_eq!(repos[0].row_count("Users_2"), 2);
        assert_eq!(repos[1].row_count("Users_1"), 2);
        assert_eq!(db.get_list("Users").await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_insert_requires_shard_key() {
        let (db, repos) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), None).unwrap();
        let mut rows = users(0..2);
        rows.push(Row::new().with("Age", 1));
        let err = db.insert("Users", rows).await.unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));
        assert_eq!(repos[0].row_count("Users_0"), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_are_pruned() {
        let (db, repos) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), None).unwrap();
        db.insert("Users", users(0..6)).await.unwrap();

        let updated = db
            .update_where("Users", Some(&Predicate::eq("Id", 4)), &Row::new().with("Age", 99))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let row = db.query("Users").unwrap().filter(Predicate::eq("Id", 4)).first().await.unwrap();
        assert_eq!(row.unwrap().get("Age").as_i64(), Some(99));

        let deleted = db.delete_where("Users", &Predicate::is_in("Id", [1, 2])).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.delete_all("Users").await.unwrap(), 4);
        assert_eq!(repos[0].row_count("Users_0") + repos[1].row_count("Users_1"), 0);
    }

    #[tokio::test]
    async fn test_update_rejects_shard_key_assignment() {
        let (db, _) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), None).unwrap();
        let err = db
            .update_where("Users", None, &Row::new().with("Id", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_keyed_update_and_delete_touch_owning_shards() {
        let (db, repos) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), Some("Id")).unwrap();
        db.insert("Users", users(0..6)).await.unwrap();
        let before: Vec<u64> = repos.iter().map(|r| r.stats().rows_written).collect();

        let updated = db
            .update("Users", vec![Row::new().with("Id", 1).with("Age", 7)])
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(repos[0].stats().rows_written, before[0]);
        assert_eq!(repos[1].stats().rows_written, before[1] + 1);

        let deleted = db.delete_rows("Users", &users([0, 3, 5, 40])).await.unwrap();
        assert_eq!(deleted, 3);
        let mut ids: Vec<_> = db
            .get_list("Users")
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.get("Id").as_i64())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_keyed_update_rejects_moving_rows() {
        let (db, _) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), Some("Code")).unwrap();
        let rows = (0..3).map(|id| Row::new().with("Id", id).with("Code", format!("c{}", id))).collect();
        db.insert("Users", rows).await.unwrap();

        let err = db
            .update("Users", vec![Row::new().with("Id", 5).with("Code", "c1")])
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));

        let err = db
            .update_fields("Users", vec![Row::new().with("Id", 1).with("Code", "c9")], &["Code"])
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));

        let updated = db
            .update("Users", vec![Row::new().with("Id", 1).with("Code", "c1").with("Age", 3)])
            .await
            .unwrap();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn test_keyed_writes_require_primary_key() {
        let (db, _) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), Some("Code")).unwrap();
        let err = db.delete_rows("Users", &users([1])).await.unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_read_only_database_rejects_writes() {
        let (db, _) = ShardingDatabase::in_memory(registry(ReadWriteType::Read), None).unwrap();
        let err = db.insert("Users", users(0..1)).await.unwrap_err();
        assert!(err.is_configuration_error());
        assert!(db.get_list("Users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_participants_are_distinct() {
        let (db, _) = ShardingDatabase::in_memory(registry(ReadWriteType::ReadAndWrite), None).unwrap();
        let participants = db.participants("Users").unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].name(), "db_a");
        assert_eq!(participants[1].name(), "db_b");
    }

    #[test]
    fn test_build_requires_every_repository() {
        let err = ShardingDatabase::builder(registry(ReadWriteType::ReadAndWrite))
            .repository("BaseDb", "db_a", Arc::new(MemoryRepository::new("db_a")))
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration_error());
    }
}
