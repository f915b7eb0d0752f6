//! Tessera Repository - Single-Shard Data Access
//!
//! The contract the sharding engine and the distributed transaction
//! coordinator use to talk to one physical database, plus an in-memory
//! implementation with local transactions and fault injection.
//!
//! Key Features:
//! - Async repository trait for queries, scalars, writes and transactions
//! - Shard-local query evaluation shared by in-memory implementations
//! - Buffered transactional writes with explicit flush
//! - Deterministic fault injection for failure-path testing
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod fault;
pub mod memory;
pub mod repository;

pub use fault::{FaultConfig, FaultPoint};
pub use memory::MemoryRepository;
pub use repository::{Repository, RepositoryStats, ShardQuery};
