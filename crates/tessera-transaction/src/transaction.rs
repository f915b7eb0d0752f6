//! Tessera Distributed Transactions
//!
//! Coordinates local transactions on several independent repositories as
//! one logical unit of work. There is no prepare phase: commit is issued to
//! every participant in parallel, and a failure anywhere rolls back the
//! whole group. Repositories that already committed are expected to
//! compensate on rollback.
//!
//! Key Features:
//! - Parallel begin, flush, commit and rollback across participants
//! - Phase-guarded lifecycle where invalid transitions are no-ops
//! - Outcome reporting from `end_transaction` instead of propagation
//! - Exactly-once release of participant resources, with a drop safety net
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_common::{IsolationLevel, Result, TesseraError, TransactionId};
use tessera_repository::Repository;

// =============================================================================
// Transaction Phase
// =============================================================================

/// Lifecycle phase of a distributed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPhase {
    /// Participants enlisted, nothing started yet.
    Created,
    /// Local transactions were started on the participants.
    Began,
    /// Every participant committed.
    Committed,
    /// Every participant rolled back.
    RolledBack,
    /// Participant resources were released. Terminal.
    Disposed,
}

impl TransactionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Began => "began",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Disposed => "disposed",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Transaction Outcome
// =============================================================================

/// Result of `end_transaction`.
#[derive(Debug)]
pub struct TransactionOutcome {
    pub success: bool,
    pub error: Option<TesseraError>,
}

impl TransactionOutcome {
    fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: TesseraError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    /// Convert back into a plain result.
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Participant Steps
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Begin,
    Flush,
    Commit,
    Rollback,
}

impl Step {
    fn fail(self, participant: &str, cause: TesseraError) -> TesseraError {
        let participant = participant.to_string();
        let cause = Box::new(cause);
        match self {
            Step::Begin => TesseraError::TransactionBegin { participant, cause },
            Step::Flush | Step::Commit => TesseraError::TransactionCommit { participant, cause },
            Step::Rollback => TesseraError::TransactionRollback { participant, cause },
        }
    }
}

// =============================================================================
// Distributed Transaction
// =============================================================================

/// Current phase plus whether a lifecycle call is dispatching.
#[derive(Debug)]
struct PhaseState {
    phase: TransactionPhase,
    in_flight: bool,
}

/// A unit of work spanning several repositories.
///
/// Lifecycle calls may race: only the call that claims the current phase
/// dispatches to the participants, the others are ignored.
pub struct DistributedTransaction {
    id: TransactionId,
    participants: Vec<Arc<dyn Repository>>,
    state: Mutex<PhaseState>,
    disposed: AtomicBool,
}

impl DistributedTransaction {
    /// Enlist participants. Repositories appearing more than once are
    /// enlisted once, at their first position.
    pub fn new(participants: Vec<Arc<dyn Repository>>) -> Result<Self> {
        if participants.is_empty() {
            return Err(TesseraError::InvalidArgument(
                "a distributed transaction needs at least one participant".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let participants: Vec<_> = participants
            .into_iter()
            .filter(|p| seen.insert(p.id()))
            .collect();

        let id = TransactionId::generate();
        tracing::debug!(transaction = %id, participants = participants.len(), "created distributed transaction");

        Ok(Self {
            id,
            participants,
            state: Mutex::new(PhaseState {
                phase: TransactionPhase::Created,
                in_flight: false,
            }),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.state.lock().phase
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start a local transaction on every participant at its default isolation.
    pub async fn begin_transaction(&self) -> Result<()> {
        self.begin(None).await
    }

    /// Start a local transaction on every participant at the given isolation.
    pub async fn begin_transaction_with(&self, isolation: IsolationLevel) -> Result<()> {
        self.begin(Some(isolation)).await
    }

    /// Begin failures leave the phase at `Began` so the caller can roll back.
    async fn begin(&self, isolation: Option<IsolationLevel>) -> Result<()> {
        if !self.claim(TransactionPhase::Created, "begin") {
            return Ok(());
        }

        let result = self
            .run_all(Step::Begin, |p| p.begin_transaction(isolation))
            .await;
        self.release(Some(TransactionPhase::Began));

        if result.is_ok() {
            tracing::info!(transaction = %self.id, ?isolation, participants = self.participants.len(), "began distributed transaction");
        }
        result
    }

    /// Commit every participant.
    pub async fn commit_transaction(&self) -> Result<()> {
        if !self.claim(TransactionPhase::Began, "commit") {
            return Ok(());
        }

        let result = self.commit_all().await;
        self.release(result.is_ok().then_some(TransactionPhase::Committed));
        result
    }

    /// Roll back every participant.
    pub async fn rollback_transaction(&self) -> Result<()> {
        if !self.claim(TransactionPhase::Began, "roll back") {
            return Ok(());
        }

        let result = self.rollback_all().await;
        self.release(result.is_ok().then_some(TransactionPhase::RolledBack));
        result
    }

    /// Flush and commit, rolling everything back on failure, then dispose.
    ///
    /// Never propagates: the outcome carries the failure instead.
    pub async fn end_transaction(&self) -> TransactionOutcome {
        if !self.claim(TransactionPhase::Began, "end") {
            let phase = self.phase();
            self.dispose();
            return TransactionOutcome::failed(TesseraError::InvalidState(format!(
                "cannot end transaction {} in phase {}",
                self.id, phase
            )));
        }

        let committed = match self.run_all(Step::Flush, |p| p.flush()).await {
            Ok(()) => self.commit_all().await,
            Err(e) => Err(e),
        };

        let (outcome, phase) = match committed {
            Ok(()) => (TransactionOutcome::succeeded(), TransactionPhase::Committed),
            Err(cause) => {
                tracing::warn!(transaction = %self.id, error = %cause, "distributed transaction failed, rolling back");
                match self.rollback_all().await {
                    Ok(()) => (TransactionOutcome::failed(cause), TransactionPhase::RolledBack),
                    Err(rollback) => (
                        TransactionOutcome::failed(TesseraError::RollbackAfterFailure {
                            cause: Box::new(cause),
                            rollback: Box::new(rollback),
                        }),
                        TransactionPhase::Began,
                    ),
                }
            }
        };

        self.release(Some(phase));
        self.dispose();
        outcome
    }

    /// Release every participant's transactional resources. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        for participant in &self.participants {
            participant.dispose();
        }
        let previous = std::mem::replace(&mut self.state.lock().phase, TransactionPhase::Disposed);
        tracing::debug!(transaction = %self.id, from = %previous, "disposed distributed transaction");
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn commit_all(&self) -> Result<()> {
        self.run_all(Step::Commit, |p| p.commit_transaction()).await?;
        tracing::info!(transaction = %self.id, "committed distributed transaction");
        Ok(())
    }

    async fn rollback_all(&self) -> Result<()> {
        self.run_all(Step::Rollback, |p| p.rollback_transaction()).await?;
        tracing::info!(transaction = %self.id, "rolled back distributed transaction");
        Ok(())
    }

    /// Check the phase and mark a call in flight under one lock.
    fn claim(&self, expected: TransactionPhase, action: &str) -> bool {
        let mut state = self.state.lock();
        if state.in_flight || state.phase != expected {
            tracing::warn!(
                transaction = %self.id,
                phase = %state.phase,
                in_flight = state.in_flight,
                action,
                "ignoring transaction call in wrong phase"
            );
            return false;
        }
        state.in_flight = true;
        true
    }

    /// Clear the in-flight mark, moving to `next` unless already disposed.
    fn release(&self, next: Option<TransactionPhase>) {
        let mut state = self.state.lock();
        state.in_flight = false;
        if let Some(next) = next {
            if !state.phase.is_terminal() {
                state.phase = next;
            }
        }
    }

    /// Run one step on every participant and wait for all of them.
    ///
    /// Reports the first failure in enlistment order.
    async fn run_all<'a, F, Fut>(&'a self, step: Step, op: F) -> Result<()>
    where
        F: Fn(&'a Arc<dyn Repository>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let results = join_all(self.participants.iter().map(op)).await;

        let mut first = None;
        for (participant, result) in self.participants.iter().zip(results) {
            if let Err(cause) = result {
                tracing::warn!(
                    transaction = %self.id,
                    participant = participant.name(),
                    ?step,
                    error = %cause,
                    "participant failed"
                );
                if first.is_none() {
                    first = Some(step.fail(participant.name(), cause));
                }
            }
        }

        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for DistributedTransaction {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            tracing::warn!(transaction = %self.id, phase = %self.phase(), "distributed transaction dropped without dispose");
            self.dispose();
        }
    }
}

impl std::fmt::Debug for DistributedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTransaction")
            .field("id", &self.id)
            .field("participants", &self.participants.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("phase", &self.phase())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_common::Row;
    use tessera_repository::{FaultConfig, FaultPoint, MemoryRepository};

    fn repositories(n: usize) -> Vec<Arc<MemoryRepository>> {
        (1..=n)
            .map(|i| Arc::new(MemoryRepository::new(format!("db-{}", i))))
            .collect()
    }

    fn participants(repos: &[Arc<MemoryRepository>]) -> Vec<Arc<dyn Repository>> {
        repos.iter().map(|r| r.clone() as Arc<dyn Repository>).collect()
    }

    async fn insert_one(repo: &MemoryRepository, id: i64) {
        repo.insert("Users", vec![Row::new().with("Id", id)]).await.unwrap();
    }

    #[test]
    fn test_requires_participants() {
        let err = DistributedTransaction::new(Vec::new()).unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));
    }

    #[test]
    fn test_deduplicates_participants() {
        let repos = repositories(2);
        let mut list = participants(&repos);
        list.push(repos[0].clone());
        let tx = DistributedTransaction::new(list).unwrap();
        assert_eq!(tx.participant_count(), 2);
        assert_eq!(tx.phase(), TransactionPhase::Created);
    }

    #[tokio::test]
    async fn test_isolation_is_passed_through() {
        let repos = repositories(2);
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();
        tx.begin_transaction_with(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(tx.phase(), TransactionPhase::Began);
        for repo in &repos {
            assert_eq!(repo.isolation_level(), Some(IsolationLevel::Serializable));
        }
        tx.dispose();
    }

    #[tokio::test]
    async fn test_commit_and_rollback_transitions() {
        let repos = repositories(2);
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();

        // commit before begin is a no-op
        tx.commit_transaction().await.unwrap();
        assert_eq!(tx.phase(), TransactionPhase::Created);

        tx.begin_transaction().await.unwrap();
        insert_one(&repos[0], 1).await;
        tx.rollback_transaction().await.unwrap();
        assert_eq!(tx.phase(), TransactionPhase::RolledBack);
        assert_eq!(repos[0].row_count("Users"), 0);

        tx.commit_transaction().await.unwrap();
        assert_eq!(tx.phase(), TransactionPhase::RolledBack);
    }

    #[tokio::test]
    async fn test_concurrent_calls_dispatch_once() {
        let repos = repositories(2);
        for repo in &repos {
            repo.set_faults(FaultConfig::new().with_begin_latency(Duration::from_millis(20)));
        }
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();

        let (first, second) = tokio::join!(tx.begin_transaction(), tx.begin_transaction());
        first.unwrap();
        second.unwrap();
        assert_eq!(tx.phase(), TransactionPhase::Began);
        for repo in &repos {
            assert_eq!(repo.stats().transactions_begun, 1);
        }

        let (commit, rollback) = tokio::join!(tx.commit_transaction(), tx.rollback_transaction());
        commit.unwrap();
        rollback.unwrap();
        assert_eq!(tx.phase(), TransactionPhase::Committed);
        for repo in &repos {
            assert_eq!(repo.stats().commits, 1);
            assert_eq!(repo.stats().rollbacks, 0);
        }
        tx.dispose();
    }

    #[tokio::test]
    async fn test_begin_failure_still_reaches_began() {
        let repos = repositories(3);
        repos[1].inject_fault(FaultPoint::Begin);
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();

        let err = tx.begin_transaction().await.unwrap_err();
        assert!(matches!(&err, TesseraError::TransactionBegin { participant, .. } if participant == "db-2"));
        assert_eq!(tx.phase(), TransactionPhase::Began);
        assert!(repos[0].in_transaction());

        tx.rollback_transaction().await.unwrap();
        assert!(!repos[0].in_transaction());
    }

    #[tokio::test]
    async fn test_end_before_begin_reports_invalid_state() {
        let repos = repositories(1);
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();
        let outcome = tx.end_transaction().await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(TesseraError::InvalidState(_))));
        assert_eq!(tx.phase(), TransactionPhase::Disposed);
    }

    #[tokio::test]
    async fn test_flush_failure_rolls_back() {
        let repos = repositories(2);
        repos[0].inject_fault(FaultPoint::Flush);
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();
        tx.begin_transaction().await.unwrap();
        insert_one(&repos[0], 1).await;
        insert_one(&repos[1], 2).await;

        let outcome = tx.end_transaction().await;
        assert!(!outcome.success);
        assert!(matches!(
            outcome.error,
            Some(TesseraError::TransactionCommit { ref participant, .. }) if participant == "db-1"
        ));
        assert_eq!(repos[0].row_count("Users") + repos[1].row_count("Users"), 0);
        assert_eq!(repos[1].stats().commits, 0);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_captured() {
        let repos = repositories(3);
        repos[2].inject_fault(FaultPoint::Commit);
        repos[1].inject_fault(FaultPoint::Rollback);
        let tx = DistributedTransaction::new(participants(&repos)).unwrap();
        tx.begin_transaction().await.unwrap();

        let outcome = tx.end_transaction().await;
        let Some(TesseraError::RollbackAfterFailure { cause, rollback }) = outcome.error else {
            panic!("expected a rollback failure");
        };
        assert!(matches!(*cause, TesseraError::TransactionCommit { ref participant, .. } if participant == "db-3"));
        assert!(matches!(*rollback, TesseraError::TransactionRollback { ref participant, .. } if participant == "db-2"));
        assert_eq!(tx.phase(), TransactionPhase::Disposed);
    }

    #[tokio::test]
    async fn test_drop_disposes() {
        let repos = repositories(2);
        {
            let tx = DistributedTransaction::new(participants(&repos)).unwrap();
            tx.begin_transaction().await.unwrap();
        }
        for repo in &repos {
            assert!(!repo.in_transaction());
            assert_eq!(repo.stats().disposals, 1);
        }
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(TransactionOutcome::succeeded().into_result().is_ok());
        let failed = TransactionOutcome::failed(TesseraError::InvalidState("x".into()));
        assert!(failed.into_result().is_err());
    }
}
