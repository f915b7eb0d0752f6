//! Tessera Transaction - Distributed Transaction Coordinator
//!
//! Groups independent repository connections into one logical unit of work.
//! Every lifecycle step is dispatched to all participants in parallel and
//! joined before the coordinator moves on.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod transaction;

pub use transaction::{DistributedTransaction, TransactionOutcome, TransactionPhase};
