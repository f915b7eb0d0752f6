//! Tessera Sharding - Cross-Shard Query Engine
//!
//! Makes a set of physically partitioned tables appear as one logical
//! table. The registry maps abstract tables to their physical tables and
//! sharding rule; the query engine prunes shards from the predicate, fans
//! the query out to every remaining physical table in parallel and merges
//! the partial results.
//!
//! Key Features:
//! - Modulo and range sharding rules
//! - Immutable topology registry built once at startup
//! - Predicate-driven shard pruning
//! - Parallel fan-out with ordered merge, paging and aggregate combining
//! - Routed inserts and pruned updates and deletes
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod database;
pub mod fanout;
pub mod merge;
pub mod pagination;
pub mod query;
pub mod registry;
pub mod router;
pub mod rule;
pub mod topology;

pub use database::{ShardingDatabase, ShardingDatabaseBuilder};
pub use fanout::ShardTarget;
pub use pagination::{Page, Pagination};
pub use query::{QuerySpec, ShardingQuery};
pub use registry::{ShardingRegistry, ShardingRegistryBuilder};
pub use router::RouteDecision;
pub use rule::ShardingRule;
pub use topology::{AbstractTable, DataSource, PhysicalDatabase, PhysicalTable};
