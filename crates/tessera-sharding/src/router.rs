//! Tessera Shard Router
//!
//! Decides which physical tables a logical operation must visit. Pruning is
//! a walk over the predicate tree looking for equality or IN constraints on
//! the shard key.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::topology::AbstractTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tessera_common::{Result, Row, TesseraError};
use tessera_query::Predicate;

// =============================================================================
// Route Decision
// =============================================================================

/// Physical tables selected for one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteDecision {
    /// The predicate pins the shard key to one physical table.
    Single { shard: usize },
    /// The predicate pins the shard key to a subset of physical tables.
    Multi { shards: Vec<usize> },
    /// No usable shard key constraint; visit every physical table.
    Broadcast { shards: Vec<usize> },
    /// The shard key constraints contradict each other; nothing can match.
    Empty,
}

impl RouteDecision {
    /// Physical table indices to visit, ascending.
    pub fn shards(&self) -> Vec<usize> {
        match self {
            RouteDecision::Single { shard } => vec![*shard],
            RouteDecision::Multi { shards } | RouteDecision::Broadcast { shards } => shards.clone(),
            RouteDecision::Empty => Vec::new(),
        }
    }

    pub fn is_pruned(&self) -> bool {
        !matches!(self, RouteDecision::Broadcast { .. })
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Route a read, update or delete by its predicate.
pub fn route(table: &AbstractTable, predicate: Option<&Predicate>) -> RouteDecision {
    let constrained = predicate.and_then(|p| prune(table, p));
    match constrained {
        None => RouteDecision::Broadcast {
            shards: (0..table.shard_count()).collect(),
        },
        Some(set) if set.is_empty() => RouteDecision::Empty,
        Some(set) if set.len() == 1 => RouteDecision::Single {
            shard: set.into_iter().next().unwrap_or_default(),
        },
        Some(set) => RouteDecision::Multi {
            shards: set.into_iter().collect(),
        },
    }
}

/// Route one row for insertion by its shard-key value.
pub fn route_row(table: &AbstractTable, row: &Row) -> Result<usize> {
    let key = row.get(table.shard_key());
    if key.is_null() {
        return Err(TesseraError::InvalidArgument(format!(
            "row for '{}' is missing shard key '{}'",
            table.name,
            table.shard_key()
        )));
    }
    table.rule.resolve(key)
}

/// Shards a predicate can match, or `None` when it does not constrain the
/// shard key.
fn prune(table: &AbstractTable, predicate: &Predicate) -> Option<BTreeSet<usize>> {
    let key = table.shard_key();
    match predicate {
        Predicate::Eq { field, value } if field == key => {
            if value.is_null() {
                return Some(BTreeSet::new());
            }
            table.rule.resolve(value).ok().map(|shard| BTreeSet::from([shard]))
        }
        Predicate::In { field, values } if field == key => values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| table.rule.resolve(v).ok())
            .collect::<Option<BTreeSet<_>>>(),
        Predicate::And(children) => children
            .iter()
            .filter_map(|child| prune(table, child))
            .reduce(|acc, set| acc.intersection(&set).copied().collect()),
        Predicate::Or(children) => children
            .iter()
            .map(|child| prune(table, child))
            .collect::<Option<Vec<_>>>()
            .map(|sets| sets.into_iter().flatten().collect()),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ShardingRule;
    use crate::topology::PhysicalTable;

    fn table() -> AbstractTable {
        AbstractTable {
            name: "Base_UnitTest".into(),
            data_source: "BaseDb".into(),
            physical_tables: (0..3)
                .map(|i| PhysicalTable::new(format!("Base_UnitTest_{}", i), "BaseDb"))
                .collect(),
            rule: ShardingRule::modulo("Id", 3),
        }
    }

    #[test]
    fn test_no_predicate_broadcasts() {
        assert_eq!(route(&table(), None).shards(), vec![0, 1, 2]);
        assert!(!route(&table(), None).is_pruned());
    }

    #[test]
    fn test_equality_on_key_prunes_to_one() {
        let decision = route(&table(), Some(&Predicate::eq("Id", 7)));
        assert_eq!(decision, RouteDecision::Single { shard: 1 });
    }

    #[test]
    fn test_non_key_predicate_broadcasts() {
        let decision = route(&table(), Some(&Predicate::eq("Age", 7)));
        assert!(matches!(decision, RouteDecision::Broadcast { .. }));
        let decision = route(&table(), Some(&Predicate::gt("Id", 7)));
        assert!(matches!(decision, RouteDecision::Broadcast { .. }));
    }

    #[test]
    fn test_in_list() {
        let decision = route(&table(), Some(&Predicate::is_in("Id", [1, 4, 2])));
        assert_eq!(decision, RouteDecision::Multi { shards: vec![1, 2] });
    }

    #[test]
    fn test_and_intersects() {
        let p = Predicate::eq("Id", 1).and(Predicate::gt("Age", 10));
        assert_eq!(route(&table(), Some(&p)), RouteDecision::Single { shard: 1 });

        let p = Predicate::is_in("Id", [1, 2]).and(Predicate::is_in("Id", [2, 3]));
        assert_eq!(route(&table(), Some(&p)), RouteDecision::Single { shard: 2 });

        let p = Predicate::eq("Id", 1).and(Predicate::eq("Id", 2));
        assert_eq!(route(&table(), Some(&p)), RouteDecision::Empty);
    }

    #[test]
    fn test_or_requires_every_branch() {
        let p = Predicate::eq("Id", 1).or(Predicate::eq("Id", 3));
        assert_eq!(route(&table(), Some(&p)), RouteDecision::Multi { shards: vec![0, 1] });

        let p = Predicate::eq("Id", 1).or(Predicate::eq("Age", 3));
        assert!(matches!(route(&table(), Some(&p)), RouteDecision::Broadcast { .. }));
    }

    #[test]
    fn test_not_is_unconstrained() {
        let p = Predicate::eq("Id", 1).not();
        assert!(matches!(route(&table(), Some(&p)), RouteDecision::Broadcast { .. }));
    }

    #[test]
    fn test_unresolvable_key_value_broadcasts() {
        let p = Predicate::eq("Id", 1.0);
        assert!(matches!(route(&table(), Some(&p)), RouteDecision::Broadcast { .. }));
    }

    #[test]
    fn test_route_row() {
        let t = table();
        assert_eq!(route_row(&t, &Row::new().with("Id", 5)).unwrap(), 2);
        assert!(matches!(
            route_row(&t, &Row::new().with("Age", 5)),
            Err(TesseraError::InvalidArgument(_))
        ));
    }
}
