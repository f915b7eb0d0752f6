//! Tessera Fault Injection
//!
//! Deterministic failure switches for the in-memory repository. Each
//! switch stays armed until cleared, so a failing participant keeps
//! failing for the whole scenario under test.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::time::Duration;

/// Repository call that a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    Flush,
    Commit,
    Rollback,
    Query,
    Write,
}

/// Configuration for fault injection in the in-memory repository.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// If true, `begin_transaction` fails.
    pub fail_begin: bool,
    /// If true, `flush` fails before applying buffered writes.
    pub fail_flush: bool,
    /// If true, `commit_transaction` fails without publishing anything.
    pub fail_commit: bool,
    /// If true, `rollback_transaction` fails without discarding anything.
    pub fail_rollback: bool,
    /// If true, `execute_query` and `execute_scalar` fail.
    pub fail_query: bool,
    /// If true, `insert`, `update_where` and `delete_where` fail.
    pub fail_write: bool,
    /// Artificial latency added to every read.
    pub query_latency: Option<Duration>,
    /// Artificial latency added before `begin_transaction` starts.
    pub begin_latency: Option<Duration>,
}

impl FaultConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the switch for one call site.
    pub fn with_failure(mut self, point: FaultPoint) -> Self {
        self.set(point, true);
        self
    }

    pub fn with_query_latency(mut self, latency: Duration) -> Self {
        self.query_latency = Some(latency);
        self
    }

    pub fn with_begin_latency(mut self, latency: Duration) -> Self {
        self.begin_latency = Some(latency);
        self
    }

    pub fn set(&mut self, point: FaultPoint, armed: bool) {
        match point {
            FaultPoint::Begin => self.fail_begin = armed,
            FaultPoint::Flush => self.fail_flush = armed,
            FaultPoint::Commit => self.fail_commit = armed,
            FaultPoint::Rollback => self.fail_rollback = armed,
            FaultPoint::Query => self.fail_query = armed,
            FaultPoint::Write => self.fail_write = armed,
        }
    }

    pub fn is_armed(&self, point: FaultPoint) -> bool {
        match point {
            FaultPoint::Begin => self.fail_begin,
            FaultPoint::Flush => self.fail_flush,
            FaultPoint::Commit => self.fail_commit,
            FaultPoint::Rollback => self.fail_rollback,
            FaultPoint::Query => self.fail_query,
            FaultPoint::Write => self.fail_write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_and_clear() {
        let mut config = FaultConfig::new().with_failure(FaultPoint::Commit);
        assert!(config.is_armed(FaultPoint::Commit));
        assert!(!config.is_armed(FaultPoint::Begin));
        config.set(FaultPoint::Commit, false);
        assert!(!config.is_armed(FaultPoint::Commit));
    }
}
