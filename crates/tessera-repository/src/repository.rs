//! Tessera Repository Contract
//!
//! Pluggable single-shard repository interface. One repository wraps one
//! connection to one physical database; the sharding engine issues one call
//! per physical table and the transaction coordinator drives the local
//! transaction lifecycle.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_common::{IsolationLevel, RepositoryId, Result, Row};
use tessera_query::{sort_rows, Aggregate, OrderBy, PartialAggregate, Predicate};

// =============================================================================
// Shard Query
// =============================================================================

/// A query against a single physical table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardQuery {
    pub predicate: Option<Predicate>,
    pub ordering: Vec<OrderBy>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
}

impl ShardQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicate(mut self, predicate: Option<Predicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_ordering(mut self, ordering: Vec<OrderBy>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    /// Check a row against the predicate; no predicate matches everything.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicate.as_ref().map(|p| p.matches(row)).unwrap_or(true)
    }

    /// Filter, order and slice rows the way a repository is expected to.
    pub fn evaluate<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> Vec<Row> {
        let mut matched: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).cloned().collect();
        sort_rows(&mut matched, &self.ordering);

        let skip = self.skip.unwrap_or(0);
        let take = self.take.unwrap_or(usize::MAX);
        matched.into_iter().skip(skip).take(take).collect()
    }
}

// =============================================================================
// Repository Statistics
// =============================================================================

/// Counters describing the calls a repository has served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub queries_executed: u64,
    pub scalars_executed: u64,
    pub rows_written: u64,
    pub transactions_begun: u64,
    pub flushes: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub disposals: u64,
}

impl RepositoryStats {
    /// Read calls of either kind.
    pub fn dispatches(&self) -> u64 {
        self.queries_executed + self.scalars_executed
    }
}

// =============================================================================
// Repository Trait
// =============================================================================

/// Single-connection data access against one physical database.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Connection identity, used to coalesce duplicate transaction participants.
    fn id(&self) -> RepositoryId;

    /// Human-readable name of the physical database.
    fn name(&self) -> &str;

    /// Run a row query against one physical table.
    async fn execute_query(&self, table: &str, query: &ShardQuery) -> Result<Vec<Row>>;

    /// Compute a partial aggregate over the matching rows of one physical table.
    async fn execute_scalar(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
        aggregate: &Aggregate,
    ) -> Result<PartialAggregate>;

    /// Insert rows, returning the number inserted.
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64>;

    /// Overwrite the assigned fields on every matching row.
    async fn update_where(&self, table: &str, predicate: Option<&Predicate>, assignments: &Row) -> Result<u64>;

    /// Delete every matching row.
    async fn delete_where(&self, table: &str, predicate: Option<&Predicate>) -> Result<u64>;

    /// Start a local transaction.
    async fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<()>;

    /// Push buffered writes of the open transaction to the database.
    async fn flush(&self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit_transaction(&self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback_transaction(&self) -> Result<()>;

    /// Release the transactional resources held by this connection.
    ///
    /// Synchronous so it can run from `Drop`. Must be safe to call at any time.
    fn dispose(&self);

    /// Get repository statistics.
    fn stats(&self) -> RepositoryStats;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Row> {
        (1..=6).map(|i| Row::new().with("Id", i).with("Age", 10 * (i % 3))).collect()
    }

    #[test]
    fn test_evaluate_filters_orders_and_slices() {
        let query = ShardQuery::new()
            .with_predicate(Some(Predicate::gt("Age", 0)))
            .with_ordering(vec![OrderBy::desc("Age"), OrderBy::asc("Id")])
            .with_skip(1)
            .with_take(2);
        let result = query.evaluate(&rows());
        let ids: Vec<_> = result.iter().map(|r| r.get("Id").as_i64().unwrap()).collect();
        assert_eq!(ids, vec![5, 1]);
    }

    #[test]
    fn test_evaluate_without_predicate() {
        let result = ShardQuery::new().evaluate(&rows());
        assert_eq!(result.len(), 6);
    }
}
