//! Tessera Sharding Query
//!
//! Chainable query over one abstract table. Builder calls return a new
//! query and never touch a repository; terminal calls route the predicate,
//! fan out to the selected physical tables and merge the results.
//!
//! Scalar terminals on a query without skip/take are pushed down to the
//! shards as partial aggregates. Once skip or take is present the
//! aggregate is computed over the merged, sliced rows instead.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::fanout::{any_of, fan_out, ShardTarget};
use crate::merge::{merge_partials, merge_rows, slice};
use crate::pagination::{Page, Pagination};
use crate::router::{route, RouteDecision};
use crate::topology::AbstractTable;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_common::{Result, Row, TesseraError, Value};
use tessera_query::{parse_predicate, sort_rows, Aggregate, OrderBy, PartialAggregate, Predicate};
use tessera_repository::ShardQuery;

// =============================================================================
// Query Spec
// =============================================================================

/// Accumulated state of a logical query.
///
/// The predicate and ordering always apply before skip/take, regardless of
/// the order the builder calls were made in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub predicate: Option<Predicate>,
    pub ordering: Vec<OrderBy>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
}

impl QuerySpec {
    pub fn is_sliced(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }

    fn shard_query(&self, ordering: &[OrderBy]) -> ShardQuery {
        ShardQuery::new()
            .with_predicate(self.predicate.clone())
            .with_ordering(ordering.to_vec())
    }
}

// =============================================================================
// Sharding Query
// =============================================================================

/// A lazily evaluated query over an abstract table.
#[derive(Clone)]
pub struct ShardingQuery {
    table: Arc<AbstractTable>,
    shards: Arc<[ShardTarget]>,
    spec: QuerySpec,
}

impl ShardingQuery {
    pub(crate) fn new(table: Arc<AbstractTable>, shards: Arc<[ShardTarget]>) -> Self {
        Self {
            table,
            shards,
            spec: QuerySpec::default(),
        }
    }

    fn with_spec(&self, spec: QuerySpec) -> Self {
        Self {
            table: Arc::clone(&self.table),
            shards: Arc::clone(&self.shards),
            spec,
        }
    }

    pub fn table(&self) -> &AbstractTable {
        &self.table
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Physical tables this query would visit.
    pub fn route(&self) -> RouteDecision {
        route(&self.table, self.spec.predicate.as_ref())
    }

    // -------------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------------

    /// Add a condition. Successive filters are combined with AND.
    pub fn filter(&self, predicate: Predicate) -> Self {
        let mut spec = self.spec.clone();
        spec.predicate = Some(match spec.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self.with_spec(spec)
    }

    /// Add a condition given as text, e.g. `"Age > 50"`.
    pub fn filter_str(&self, condition: &str) -> Result<Self> {
        Ok(self.filter(parse_predicate(condition)?))
    }

    /// Replace the ordering with one ascending key.
    pub fn order_by(&self, field: impl Into<String>) -> Self {
        let mut spec = self.spec.clone();
        spec.ordering = vec![OrderBy::asc(field)];
        self.with_spec(spec)
    }

    /// Replace the ordering with one descending key.
    pub fn order_by_descending(&self, field: impl Into<String>) -> Self {
        let mut spec = self.spec.clone();
        spec.ordering = vec![OrderBy::desc(field)];
        self.with_spec(spec)
    }

    /// Add a secondary ascending key.
    pub fn then_by(&self, field: impl Into<String>) -> Self {
        let mut spec = self.spec.clone();
        spec.ordering.push(OrderBy::asc(field));
        self.with_spec(spec)
    }

    /// Add a secondary descending key.
    pub fn then_by_descending(&self, field: impl Into<String>) -> Self {
        let mut spec = self.spec.clone();
        spec.ordering.push(OrderBy::desc(field));
        self.with_spec(spec)
    }

    /// Skip rows. Consecutive skips add up and shrink an earlier take.
    pub fn skip(&self, count: usize) -> Self {
        let mut spec = self.spec.clone();
        spec.skip = Some(spec.skip.unwrap_or(0).saturating_add(count));
        spec.take = spec.take.map(|take| take.saturating_sub(count));
        self.with_spec(spec)
    }

    /// Limit rows. Consecutive takes keep the smallest limit.
    pub fn take(&self, count: usize) -> Self {
        let mut spec = self.spec.clone();
        spec.take = Some(spec.take.map_or(count, |take| take.min(count)));
        self.with_spec(spec)
    }

    // -------------------------------------------------------------------------
    // Row Terminals
    // -------------------------------------------------------------------------

    /// Execute and return all matching rows.
    pub async fn to_list(&self) -> Result<Vec<Row>> {
        let rows = self.fetch(&self.spec.ordering).await?;
        Ok(slice(rows, self.spec.skip, self.spec.take))
    }

    /// Execute and return the first matching row, if any.
    pub async fn first(&self) -> Result<Option<Row>> {
        Ok(self.take(1).to_list().await?.into_iter().next())
    }

    /// Execute one page over the globally ordered result.
    ///
    /// The page's sort key is the primary key; any ordering already on the
    /// query breaks ties. A query carrying skip/take is sliced in its own
    /// order first, and only the rows of that slice are paged.
    pub async fn get_pagination(&self, pagination: &Pagination) -> Result<Page> {
        pagination.validate()?;

        let rows = if self.spec.is_sliced() {
            let mut rows = self.to_list().await?;
            sort_rows(&mut rows, &[pagination.ordering()]);
            rows
        } else {
            let mut ordering = vec![pagination.ordering()];
            ordering.extend(self.spec.ordering.iter().cloned());
            self.fetch(&ordering).await?
        };
        let total = rows.len();
        let rows = rows
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.page_rows)
            .collect();

        Ok(Page {
            rows,
            total,
            page_index: pagination.page_index,
            page_rows: pagination.page_rows,
        })
    }

    // -------------------------------------------------------------------------
    // Scalar Terminals
    // -------------------------------------------------------------------------

    /// Number of matching rows.
    pub async fn count(&self) -> Result<u64> {
        Ok(self.aggregate(Aggregate::count()).await?.count)
    }

    /// Whether any row matches. Returns as soon as one shard finds a row.
    pub async fn any(&self) -> Result<bool> {
        if self.spec.is_sliced() {
            return Ok(!self.to_list().await?.is_empty());
        }

        let targets = self.targets()?;
        let predicate = self.spec.predicate.as_ref();
        let aggregate = Aggregate::any();
        let aggregate = &aggregate;
        any_of(&targets, |t| async move {
            t.repository
                .execute_scalar(&t.table.name, predicate, aggregate)
                .await
                .map(|partial| partial.count > 0)
        })
        .await
    }

    pub async fn max(&self, field: &str) -> Result<Value> {
        let aggregate = Aggregate::max(field);
        let partial = self.aggregate(aggregate.clone()).await?;
        partial.scalar().ok_or_else(|| self.empty_sequence(&aggregate))
    }

    pub async fn max_or_null(&self, field: &str) -> Result<Option<Value>> {
        Ok(self.aggregate(Aggregate::max(field)).await?.scalar())
    }

    pub async fn min(&self, field: &str) -> Result<Value> {
        let aggregate = Aggregate::min(field);
        let partial = self.aggregate(aggregate.clone()).await?;
        partial.scalar().ok_or_else(|| self.empty_sequence(&aggregate))
    }

    pub async fn min_or_null(&self, field: &str) -> Result<Option<Value>> {
        Ok(self.aggregate(Aggregate::min(field)).await?.scalar())
    }

    /// Sum of the field; zero when nothing matched.
    pub async fn sum(&self, field: &str) -> Result<Value> {
        Ok(self.sum_or_null(field).await?.unwrap_or(Value::Integer(0)))
    }

    /// Sum of the field; `None` when no non-null value matched.
    pub async fn sum_or_null(&self, field: &str) -> Result<Option<Value>> {
        Ok(self.aggregate(Aggregate::sum(field)).await?.scalar())
    }

    /// Mean of the field, weighted across shards by their value counts.
    pub async fn average(&self, field: &str) -> Result<f64> {
        let aggregate = Aggregate::average(field);
        let partial = self.aggregate(aggregate.clone()).await?;
        partial.average().ok_or_else(|| self.empty_sequence(&aggregate))
    }

    pub async fn average_or_null(&self, field: &str) -> Result<Option<f64>> {
        Ok(self.aggregate(Aggregate::average(field)).await?.average())
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    fn targets(&self) -> Result<Vec<ShardTarget>> {
        let decision = self.route();
        let mut targets = Vec::new();
        for index in decision.shards() {
            let target = self.shards.get(index).ok_or_else(|| {
                TesseraError::Configuration(format!(
                    "no repository bound to shard {} of '{}'",
                    index, self.table.name
                ))
            })?;
            if !target.role.can_read() {
                return Err(TesseraError::Configuration(format!(
                    "database '{}' holding '{}' is not readable",
                    target.table.database, target.table.name
                )));
            }
            targets.push(target.clone());
        }

        tracing::debug!(
            table = %self.table.name,
            ?decision,
            shards = targets.len(),
            "dispatching shard query"
        );
        Ok(targets)
    }

    /// Fan out a row query and merge the results, without slicing.
    async fn fetch(&self, ordering: &[OrderBy]) -> Result<Vec<Row>> {
        let targets = self.targets()?;
        let query = self.spec.shard_query(ordering);
        let query = &query;
        let shard_rows = fan_out(&targets, |t| async move {
            t.repository.execute_query(&t.table.name, query).await
        })
        .await?;
        Ok(merge_rows(shard_rows, ordering))
    }

    async fn aggregate(&self, aggregate: Aggregate) -> Result<PartialAggregate> {
        if self.spec.is_sliced() {
            let rows = self.to_list().await?;
            return PartialAggregate::from_rows(&aggregate, &rows);
        }

        let targets = self.targets()?;
        let predicate = self.spec.predicate.as_ref();
        let request = &aggregate;
        let partials = fan_out(&targets, |t| async move {
            t.repository.execute_scalar(&t.table.name, predicate, request).await
        })
        .await?;
        merge_partials(aggregate.kind, partials)
    }

    fn empty_sequence(&self, aggregate: &Aggregate) -> TesseraError {
        TesseraError::EmptySequence(format!("{} over '{}' matched no rows", aggregate, self.table.name))
    }
}

impl std::fmt::Debug for ShardingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardingQuery")
            .field("table", &self.table.name)
            .field("spec", &self.spec)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
