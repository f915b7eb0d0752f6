//! Tessera Merge
//!
//! Combines per-shard results into one logical result.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use tessera_common::{Result, Row};
use tessera_query::{sort_rows, AggregateKind, OrderBy, PartialAggregate};

// =============================================================================
// Row Merging
// =============================================================================

/// Merge shard row sets into one globally ordered sequence.
///
/// Rows are concatenated in shard index order and then stable-sorted, so
/// rows with equal keys keep (shard index, repository order).
pub fn merge_rows(shard_rows: Vec<Vec<Row>>, ordering: &[OrderBy]) -> Vec<Row> {
    let total = shard_rows.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    for rows in shard_rows {
        merged.extend(rows);
    }
    sort_rows(&mut merged, ordering);
    merged
}

/// Apply a global skip/take to merged rows.
pub fn slice(rows: Vec<Row>, skip: Option<usize>, take: Option<usize>) -> Vec<Row> {
    if skip.is_none() && take.is_none() {
        return rows;
    }
    rows.into_iter()
        .skip(skip.unwrap_or(0))
        .take(take.unwrap_or(usize::MAX))
        .collect()
}

// =============================================================================
// Aggregate Merging
// =============================================================================

/// Combine shard partials. Shards without matching values drop out.
pub fn merge_partials(kind: AggregateKind, partials: Vec<PartialAggregate>) -> Result<PartialAggregate> {
    let reporting = partials.iter().filter(|p| !p.is_empty()).count();
    tracing::trace!(%kind, shards = partials.len(), reporting, "merging partial aggregates");
    PartialAggregate::merge_all(kind, partials)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::Value;

    fn row(shard: i64, age: i64) -> Row {
        Row::new().with("Shard", shard).with("Age", age)
    }

    #[test]
    fn test_concatenates_in_shard_order_without_ordering() {
        let merged = merge_rows(vec![vec![row(0, 5)], vec![], vec![row(2, 1), row(2, 0)]], &[]);
        let shards: Vec<_> = merged.iter().map(|r| r.get("Shard").as_i64().unwrap()).collect();
        assert_eq!(shards, vec![0, 2, 2]);
    }

    #[test]
    fn test_ordered_merge_is_stable_across_shards() {
        let merged = merge_rows(
            vec![vec![row(0, 1), row(0, 3)], vec![row(1, 1), row(1, 2)]],
            &[OrderBy::asc("Age")],
        );
        let pairs: Vec<_> = merged
            .iter()
            .map(|r| (r.get("Shard").as_i64().unwrap(), r.get("Age").as_i64().unwrap()))
            .collect();
        assert_eq!(pairs, vec![(0, 1), (1, 1), (1, 2), (0, 3)]);
    }

    #[test]
    fn test_slice() {
        let rows: Vec<_> = (0..10).map(|i| row(0, i)).collect();
        let sliced = slice(rows.clone(), Some(8), Some(5));
        assert_eq!(sliced.len(), 2);
        assert_eq!(slice(rows.clone(), None, Some(3)).len(), 3);
        assert_eq!(slice(rows, None, None).len(), 10);
    }

    #[test]
    fn test_merge_partials_average() {
        let partials = vec![
            PartialAggregate {
                kind: AggregateKind::Average,
                count: 3,
                value: Value::Integer(30),
            },
            PartialAggregate::empty(AggregateKind::Average),
            PartialAggregate {
                kind: AggregateKind::Average,
                count: 5,
                value: Value::Integer(100),
            },
        ];
        let merged = merge_partials(AggregateKind::Average, partials).unwrap();
        assert_eq!(merged.average(), Some(16.25));
    }
}
