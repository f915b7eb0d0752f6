//! Tessera Fan-Out
//!
//! Parallel dispatch of one logical operation to several physical tables.
//! Every launched future is joined before results are inspected, so a
//! failing shard never leaves siblings running in the background. Results
//! land in a vector indexed like the target list.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::topology::PhysicalTable;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tessera_common::config::ReadWriteType;
use tessera_common::{Result, TesseraError};
use tessera_repository::Repository;

// =============================================================================
// Shard Target
// =============================================================================

/// One physical table together with the repository that serves it.
#[derive(Clone)]
pub struct ShardTarget {
    pub index: usize,
    pub table: PhysicalTable,
    pub role: ReadWriteType,
    pub repository: Arc<dyn Repository>,
}

impl std::fmt::Debug for ShardTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardTarget")
            .field("index", &self.index)
            .field("table", &self.table.name)
            .field("database", &self.table.database)
            .field("role", &self.role)
            .finish()
    }
}

// =============================================================================
// Fan-Out
// =============================================================================

/// Run `op` against every target concurrently and wait for all of them.
///
/// Fails with the first error in target order, wrapped as a shard failure.
pub async fn fan_out<'a, T, F, Fut>(targets: &'a [ShardTarget], op: F) -> Result<Vec<T>>
where
    F: Fn(&'a ShardTarget) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let results = join_all(targets.iter().map(op)).await;

    let mut slots = Vec::with_capacity(results.len());
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(value) => slots.push(value),
            Err(e) => {
                tracing::warn!(shard = %target.table.name, error = %e, "shard operation failed");
                return Err(TesseraError::shard(target.table.name.clone(), e));
            }
        }
    }
    Ok(slots)
}

/// Run a boolean check against every target and return as soon as one
/// reports true. Shards still running at that point are no longer awaited.
///
/// When no shard reports true, the first failure in target order is returned.
pub async fn any_of<'a, F, Fut>(targets: &'a [ShardTarget], op: F) -> Result<bool>
where
    F: Fn(&'a ShardTarget) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut pending: FuturesUnordered<_> = targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let check = op(target);
            async move { (i, check.await) }
        })
        .collect();

    let mut first_error: Option<(usize, TesseraError)> = None;
    while let Some((i, result)) = pending.next().await {
        match result {
            Ok(true) => {
                tracing::trace!(shard = %targets[i].table.name, "check matched, short-circuiting");
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => {
                if first_error.as_ref().map(|(j, _)| i < *j).unwrap_or(true) {
                    first_error = Some((i, e));
                }
            }
        }
    }

    match first_error {
        Some((i, e)) => Err(TesseraError::shard(targets[i].table.name.clone(), e)),
        None => Ok(false),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_repository::{FaultConfig, FaultPoint, MemoryRepository, ShardQuery};

    fn targets(repos: &[Arc<MemoryRepository>]) -> Vec<ShardTarget> {
        repos
            .iter()
            .enumerate()
            .map(|(i, repo)| ShardTarget {
                index: i,
                table: PhysicalTable::new(format!("T_{}", i), repo.name().to_string()),
                role: ReadWriteType::ReadAndWrite,
                repository: repo.clone(),
            })
            .collect()
    }

    fn repos(n: usize) -> Vec<Arc<MemoryRepository>> {
        (0..n).map(|i| Arc::new(MemoryRepository::new(format!("db{}", i)))).collect()
    }

    #[tokio::test]
    async fn test_results_in_target_order() {
        let repos = repos(3);
        let targets = targets(&repos);
        let results = fan_out(&targets, |t| async move { Ok::<_, TesseraError>(t.index * 10) })
            .await
            .unwrap();
        assert_eq!(results, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn test_first_error_in_target_order_wins() {
        let repos = repos(3);
        repos[1].inject_fault(FaultPoint::Query);
        repos[2].inject_fault(FaultPoint::Query);
        let targets = targets(&repos);

        let query = ShardQuery::new();
        let err = fan_out(&targets, |t| {
            let query = &query;
            async move { t.repository.execute_query(&t.table.name, query).await }
        })
        .await
        .unwrap_err();

        match err {
            TesseraError::ShardQuery { shard, .. } => assert_eq!(shard, "T_1"),
            other => panic!("unexpected error: {:?}", other),
        }
        // Every shard was still dispatched.
        assert!(repos.iter().all(|r| r.stats().queries_executed == 1));
    }

    #[tokio::test]
    async fn test_any_short_circuits() {
        let repos = repos(2);
        repos[1].set_faults(FaultConfig::new().with_query_latency(Duration::from_secs(30)));
        let targets = targets(&repos);

        let start = std::time::Instant::now();
        let found = any_of(&targets, |t| async move {
            if t.index == 0 {
                return Ok(true);
            }
            t.repository
                .execute_query(&t.table.name, &ShardQuery::new())
                .await
                .map(|_| false)
        })
        .await
        .unwrap();
        assert!(found);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_any_reports_error_when_nothing_matches() {
        let repos = repos(2);
        let targets = targets(&repos);
        let err = any_of(&targets, |t| async move {
            if t.index == 1 {
                Err(TesseraError::Repository("down".into()))
            } else {
                Ok(false)
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TesseraError::ShardQuery { ref shard, .. } if shard == "T_1"));
    }
}
