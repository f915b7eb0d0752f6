//! Tessera Query - Logical Query Model
//!
//! The vocabulary shared by the sharding query engine and the single-shard
//! repositories: typed predicates, ordering keys, aggregates with their
//! mergeable per-shard partial results, and a parser for dynamic string
//! predicates.
//!
//! Key Features:
//! - Typed predicate AST with row evaluation and combinators
//! - Multi-key stable row ordering
//! - Associative partial aggregates for shard merging
//! - SQL-style dynamic predicate parsing
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod aggregate;
pub mod order;
pub mod parser;
pub mod predicate;

pub use aggregate::{Aggregate, AggregateKind, PartialAggregate};
pub use order::{compare_rows, sort_rows, OrderBy, SortDirection};
pub use parser::parse_predicate;
pub use predicate::Predicate;
