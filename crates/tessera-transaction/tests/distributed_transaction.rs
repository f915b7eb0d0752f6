//! Integration tests for distributed transactions over sharded tables
//!
//! Enlists the repositories behind a sharded table, writes through the
//! sharding layer inside the transaction and checks what is visible once
//! the transaction ends.

use std::sync::Arc;

use tessera_common::config::ReadWriteType;
use tessera_common::{Row, TesseraError};
use tessera_repository::{FaultPoint, MemoryRepository, Repository};
use tessera_sharding::{
    DataSource, PhysicalDatabase, PhysicalTable, ShardingDatabase, ShardingRegistry, ShardingRule,
};
use tessera_transaction::{DistributedTransaction, TransactionPhase};

const TABLE: &str = "Orders";

/// One physical table per database, three databases, `Id % 3`.
fn setup() -> (ShardingDatabase, Vec<Arc<MemoryRepository>>) {
    let mut data_source = DataSource::new("OrderDb", "memory");
    for i in 0..3 {
        data_source = data_source.with_database(PhysicalDatabase::new(format!("order-{}", i), ReadWriteType::ReadAndWrite));
    }

    let mut builder = ShardingRegistry::builder();
    builder.add_data_source(data_source);
    builder
        .register(
            "OrderDb",
            TABLE,
            (0..3)
                .map(|i| PhysicalTable::new(format!("{}_{}", TABLE, i), format!("order-{}", i)))
                .collect(),
            ShardingRule::modulo("Id", 3),
        )
        .unwrap();

    ShardingDatabase::in_memory(Arc::new(builder.build().unwrap()), Some("Id")).unwrap()
}

fn orders(ids: impl IntoIterator<Item = i64>) -> Vec<Row> {
    ids.into_iter()
        .map(|id| Row::new().with("Id", id).with("Amount", id * 100))
        .collect()
}

#[tokio::test]
async fn test_happy_path_commits_every_shard() {
    let (db, repos) = setup();
    let tx = DistributedTransaction::new(db.participants(TABLE).unwrap()).unwrap();
    assert_eq!(tx.participant_count(), 3);

    tx.begin_transaction().await.unwrap();
    db.insert(TABLE, orders(0..9)).await.unwrap();
    assert_eq!(repos.iter().map(|r| r.row_count(&format!("{}_0", TABLE))).sum::<usize>(), 0);

    let outcome = tx.end_transaction().await;
    assert!(outcome.success);
    assert!(outcome.error.is_none());
    assert_eq!(tx.phase(), TransactionPhase::Disposed);

    assert_eq!(db.query(TABLE).unwrap().count().await.unwrap(), 9);
    for repo in &repos {
        let stats = repo.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.disposals, 1);
    }
}

#[tokio::test]
async fn test_reads_inside_transaction_see_flushed_writes() {
    let (db, repos) = setup();
    let tx = DistributedTransaction::new(db.participants(TABLE).unwrap()).unwrap();
    tx.begin_transaction().await.unwrap();

    db.insert(TABLE, orders(0..3)).await.unwrap();
    assert_eq!(db.query(TABLE).unwrap().count().await.unwrap(), 0);

    for repo in &repos {
        repo.flush().await.unwrap();
    }
    assert_eq!(db.query(TABLE).unwrap().count().await.unwrap(), 3);

    tx.rollback_transaction().await.unwrap();
    tx.dispose();
    assert_eq!(db.query(TABLE).unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_commit_failure_leaves_nothing_visible() {
    let (db, repos) = setup();
    db.insert(TABLE, orders([100, 101, 102])).await.unwrap();

    repos[2].inject_fault(FaultPoint::Commit);
    let tx = DistributedTransaction::new(db.participants(TABLE).unwrap()).unwrap();
    tx.begin_transaction().await.unwrap();
    db.insert(TABLE, orders(0..9)).await.unwrap();

    let outcome = tx.end_transaction().await;
    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert!(matches!(&error, TesseraError::TransactionCommit { participant, .. } if participant == "order-2"));
    assert!(error.is_transaction_error());

    let mut ids: Vec<_> = db
        .get_list(TABLE)
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.get("Id").as_i64())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![100, 101, 102]);
    assert_eq!(repos[0].stats().rollbacks, 1);
}

#[tokio::test]
async fn test_constraint_violation_surfaces_at_flush() {
    let (db, _) = setup();
    db.insert(TABLE, orders([3])).await.unwrap();

    let tx = DistributedTransaction::new(db.participants(TABLE).unwrap()).unwrap();
    tx.begin_transaction().await.unwrap();
    db.insert(TABLE, orders([1, 3])).await.unwrap();

    let outcome = tx.end_transaction().await;
    let error = outcome.error.unwrap();
    assert!(matches!(error.root_cause(), TesseraError::ConstraintViolation(_)));
    assert_eq!(db.query(TABLE).unwrap().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_dispose_releases_each_participant_once() {
    let (db, repos) = setup();
    {
        let tx = DistributedTransaction::new(db.participants(TABLE).unwrap()).unwrap();
        tx.begin_transaction().await.unwrap();
        tx.dispose();
        tx.dispose();
        assert_eq!(tx.phase(), TransactionPhase::Disposed);
    }

    for repo in &repos {
        assert_eq!(repo.stats().disposals, 1);
        assert!(!repo.in_transaction());
    }
}
