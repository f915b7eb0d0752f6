//! Tessera Memory Repository
//!
//! In-memory implementation of the repository contract. Each instance
//! stands in for one connection to one physical database holding any
//! number of physical tables.
//!
//! Transactions work on a private copy of the tables. Writes issued inside
//! a transaction are buffered and only applied to that copy by `flush`,
//! which is where constraint violations surface. `commit_transaction`
//! publishes the copy and keeps the replaced image until the connection is
//! disposed, so a later `rollback_transaction` can still compensate a
//! commit that the coordinator needs to undo.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::fault::{FaultConfig, FaultPoint};
use crate::repository::{Repository, RepositoryStats, ShardQuery};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashMap;
use tessera_common::{IsolationLevel, RepositoryId, Result, Row, TesseraError};
use tessera_query::{Aggregate, PartialAggregate, Predicate};

type Tables = HashMap<String, Vec<Row>>;

// =============================================================================
// Pending Writes
// =============================================================================

#[derive(Debug, Clone)]
enum PendingWrite {
    Insert {
        table: String,
        rows: Vec<Row>,
    },
    Update {
        table: String,
        predicate: Option<Predicate>,
        assignments: Row,
    },
    Delete {
        table: String,
        predicate: Option<Predicate>,
    },
}

impl PendingWrite {
    fn table(&self) -> &str {
        match self {
            PendingWrite::Insert { table, .. }
            | PendingWrite::Update { table, .. }
            | PendingWrite::Delete { table, .. } => table,
        }
    }

    /// Apply to one table's rows, returning the number of rows affected.
    fn apply(&self, rows: &mut Vec<Row>) -> u64 {
        match self {
            PendingWrite::Insert { rows: new_rows, .. } => {
                rows.extend(new_rows.iter().cloned());
                new_rows.len() as u64
            }
            PendingWrite::Update {
                predicate,
                assignments,
                ..
            } => {
                let mut affected = 0;
                for row in rows.iter_mut().filter(|r| matches(predicate.as_ref(), r)) {
                    for (field, value) in assignments.fields() {
                        row.set(field, value.clone());
                    }
                    affected += 1;
                }
                affected
            }
            PendingWrite::Delete { predicate, .. } => {
                let before = rows.len();
                rows.retain(|r| !matches(predicate.as_ref(), r));
                (before - rows.len()) as u64
            }
        }
    }
}

fn matches(predicate: Option<&Predicate>, row: &Row) -> bool {
    predicate.map(|p| p.matches(row)).unwrap_or(true)
}

// =============================================================================
// Local Transaction
// =============================================================================

#[derive(Debug)]
struct LocalTransaction {
    isolation: IsolationLevel,
    /// Tables as of begin plus every flushed write. Reads inside the
    /// transaction see this copy.
    flushed: Tables,
    /// `flushed` with the buffered writes applied unchecked; only used to
    /// report affected-row counts when a write is buffered.
    staged: Tables,
    pending: Vec<PendingWrite>,
}

impl LocalTransaction {
    fn new(isolation: IsolationLevel, snapshot: Tables) -> Self {
        Self {
            isolation,
            flushed: snapshot.clone(),
            staged: snapshot,
            pending: Vec::new(),
        }
    }
}

// =============================================================================
// Memory Repository
// =============================================================================

/// In-memory repository for one physical database.
pub struct MemoryRepository {
    id: RepositoryId,
    name: String,
    primary_key: Option<String>,
    tables: RwLock<Tables>,
    transaction: Mutex<Option<LocalTransaction>>,
    undo: Mutex<Option<Tables>>,
    faults: RwLock<FaultConfig>,
    stats: RwLock<RepositoryStats>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RepositoryId::next(),
            name: name.into(),
            primary_key: None,
            tables: RwLock::new(HashMap::new()),
            transaction: Mutex::new(None),
            undo: Mutex::new(None),
            faults: RwLock::new(FaultConfig::default()),
            stats: RwLock::new(RepositoryStats::default()),
        }
    }

    /// Enforce uniqueness of a field within each table of this database.
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.write() = faults;
    }

    pub fn inject_fault(&self, point: FaultPoint) {
        self.faults.write().set(point, true);
    }

    pub fn clear_faults(&self) {
        *self.faults.write() = FaultConfig::default();
    }

    /// Committed rows of a table, in storage order.
    pub fn committed_rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Committed row count of a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(Vec::len).unwrap_or(0)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.lock().is_some()
    }

    /// Isolation level of the open transaction, if any.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.transaction.lock().as_ref().map(|tx| tx.isolation)
    }

    /// True while a committed transaction can still be compensated.
    pub fn holds_undo_image(&self) -> bool {
        self.undo.lock().is_some()
    }

    fn injected(&self, point: FaultPoint) -> Result<()> {
        if self.faults.read().is_armed(point) {
            tracing::debug!(repository = %self.name, ?point, "injected fault");
            return Err(TesseraError::Repository(format!(
                "injected {:?} failure on {}",
                point, self.name
            )));
        }
        Ok(())
    }

    async fn before_read(&self, scalar: bool) -> Result<()> {
        let latency = self.faults.read().query_latency;
        {
            let mut stats = self.stats.write();
            if scalar {
                stats.scalars_executed += 1;
            } else {
                stats.queries_executed += 1;
            }
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.injected(FaultPoint::Query)
    }

    /// Run a read against the rows visible to this connection.
    fn read_table<T>(&self, table: &str, read: impl FnOnce(&[Row]) -> T) -> T {
        let guard = self.transaction.lock();
        match guard.as_ref() {
            Some(tx) => read(tx.flushed.get(table).map(Vec::as_slice).unwrap_or(&[])),
            None => {
                let tables = self.tables.read();
                read(tables.get(table).map(Vec::as_slice).unwrap_or(&[]))
            }
        }
    }

    fn validate(&self, table: &str, rows: &[Row]) -> Result<()> {
        let Some(pk) = self.primary_key.as_deref() else {
            return Ok(());
        };

        let mut keys: Vec<_> = rows.iter().map(|r| r.get(pk)).filter(|v| !v.is_null()).collect();
        keys.sort_by(|a, b| a.total_cmp(b));
        if let Some(pair) = keys.windows(2).find(|w| w[0].total_cmp(w[1]) == Ordering::Equal) {
            return Err(TesseraError::ConstraintViolation(format!(
                "duplicate {} {} in {}.{}",
                pk, pair[0], self.name, table
            )));
        }
        Ok(())
    }

    fn write(&self, write: PendingWrite) -> Result<u64> {
        self.injected(FaultPoint::Write)?;

        let mut guard = self.transaction.lock();
        let affected = match guard.as_mut() {
            Some(tx) => {
                let staged = tx.staged.entry(write.table().to_string()).or_default();
                let affected = write.apply(staged);
                tx.pending.push(write);
                affected
            }
            None => {
                let mut tables = self.tables.write();
                let mut rows = tables.get(write.table()).cloned().unwrap_or_default();
                let affected = write.apply(&mut rows);
                self.validate(write.table(), &rows)?;
                tables.insert(write.table().to_string(), rows);
                affected
            }
        };

        self.stats.write().rows_written += affected;
        Ok(affected)
    }

    /// Apply buffered writes to the transaction's copy. Leaves the
    /// transaction untouched on failure.
    fn flush_pending(&self, tx: &mut LocalTransaction) -> Result<()> {
        if tx.pending.is_empty() {
            return Ok(());
        }

        let mut next = tx.flushed.clone();
        for write in &tx.pending {
            let rows = next.entry(write.table().to_string()).or_default();
            write.apply(rows);
            self.validate(write.table(), rows)?;
        }

        tx.flushed = next;
        tx.staged = tx.flushed.clone();
        tx.pending.clear();
        Ok(())
    }

    fn no_transaction(&self) -> TesseraError {
        TesseraError::Repository(format!("no active transaction on {}", self.name))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn id(&self) -> RepositoryId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, table: &str, query: &ShardQuery) -> Result<Vec<Row>> {
        self.before_read(false).await?;
        Ok(self.read_table(table, |rows| query.evaluate(rows)))
    }

    async fn execute_scalar(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
        aggregate: &Aggregate,
    ) -> Result<PartialAggregate> {
        self.before_read(true).await?;
        self.read_table(table, |rows| {
            PartialAggregate::from_rows(aggregate, rows.iter().filter(|r| matches(predicate, r)))
        })
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        self.write(PendingWrite::Insert {
            table: table.to_string(),
            rows,
        })
    }

    async fn update_where(&self, table: &str, predicate: Option<&Predicate>, assignments: &Row) -> Result<u64> {
        self.write(PendingWrite::Update {
            table: table.to_string(),
            predicate: predicate.cloned(),
            assignments: assignments.clone(),
        })
    }

    async fn delete_where(&self, table: &str, predicate: Option<&Predicate>) -> Result<u64> {
        self.write(PendingWrite::Delete {
            table: table.to_string(),
            predicate: predicate.cloned(),
        })
    }

    async fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<()> {
        let latency = self.faults.read().begin_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.injected(FaultPoint::Begin)?;

        let mut guard = self.transaction.lock();
        if guard.is_some() {
            return Err(TesseraError::Repository(format!(
                "transaction already active on {}",
                self.name
            )));
        }
        let isolation = isolation.unwrap_or_default();
        let snapshot = self.tables.read().clone();
        *guard = Some(LocalTransaction::new(isolation, snapshot));
        drop(guard);

        self.undo.lock().take();
        self.stats.write().transactions_begun += 1;
        tracing::debug!(repository = %self.name, ?isolation, "began local transaction");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.injected(FaultPoint::Flush)?;

        let mut guard = self.transaction.lock();
        let tx = guard.as_mut().ok_or_else(|| self.no_transaction())?;
        self.flush_pending(tx)?;
        drop(guard);

        self.stats.write().flushes += 1;
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        self.injected(FaultPoint::Commit)?;

        let mut guard = self.transaction.lock();
        let tx = guard.as_mut().ok_or_else(|| self.no_transaction())?;
        self.flush_pending(tx)?;
        let tx = guard.take().ok_or_else(|| self.no_transaction())?;

        let previous = std::mem::replace(&mut *self.tables.write(), tx.flushed);
        drop(guard);
        *self.undo.lock() = Some(previous);

        self.stats.write().commits += 1;
        tracing::debug!(repository = %self.name, "committed local transaction");
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        self.injected(FaultPoint::Rollback)?;

        let discarded = self.transaction.lock().take();
        if discarded.is_some() {
            self.stats.write().rollbacks += 1;
            tracing::debug!(repository = %self.name, "rolled back local transaction");
            return Ok(());
        }

        let previous = self.undo.lock().take();
        if let Some(previous) = previous {
            *self.tables.write() = previous;
            self.stats.write().rollbacks += 1;
            tracing::warn!(repository = %self.name, "compensated committed transaction");
        }
        Ok(())
    }

    fn dispose(&self) {
        self.transaction.lock().take();
        self.undo.lock().take();
        self.stats.write().disposals += 1;
    }

    fn stats(&self) -> RepositoryStats {
        self.stats.read().clone()
    }
}

impl std::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
