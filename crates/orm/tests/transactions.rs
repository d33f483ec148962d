mod common;

use common::{count_rows, create, setup, DatabaseValue};
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_orm::prelude::*;
use tether_orm::TransactionKind;

#[tokio::test]
#[serial]
async fn test_nested_transaction_shares_root() {
    let db = setup();
    let entity = db.transactions.clone();
    let shared = Arc::new(AtomicBool::new(false));
    let seen = shared.clone();

    db.pool
        .transactional(move |txn| {
            Record::new(&entity).with("name", "outer").save_with(txn)?;
            let root_id = txn.id();
            let inner_entity = entity.clone();
            registry()
                .pool()?
                .transactional(move |nested| {
                    seen.store(
                        nested.id() == root_id && nested.kind() == &TransactionKind::Nested,
                        Ordering::SeqCst,
                    );
                    Record::new(&inner_entity).with("name", "inner").save_with(nested)?;
                    Ok(())
                })
                .wait()
        })
        .await
        .unwrap();

    assert!(shared.load(Ordering::SeqCst));
    assert_eq!(db.transactions.count(None).await.unwrap(), 2);
}

#[tokio::test]
#[serial]
async fn test_nested_rollback_aborts_whole_unit() {
    let db = setup();
    let entity = db.transactions.clone();

    let result = db
        .pool
        .transactional(move |txn| {
            Record::new(&entity).with("name", "outer").save_with(txn)?;
            let inner_entity = entity.clone();
            let inner = registry()
                .pool()?
                .transactional(move |nested| {
                    Record::new(&inner_entity).with("name", "inner").save_with(nested)?;
                    Err::<(), _>(OrmError::Database("inner failure".to_string()))
                })
                .wait();
            assert!(matches!(inner, Err(OrmError::TransactionAborted(_))));
            Ok(())
        })
        .await;

    assert!(result.unwrap_err().is_transaction_error());
    assert_eq!(db.transactions.count(None).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_double_insert_aborts_transaction() {
    let db = setup();
    let entity = db.transactions.clone();

    let result = db
        .pool
        .transactional(move |txn| {
            Record::new(&entity).with("name", "unique").save_with(txn)?;
            Record::new(&entity).with("name", "unique").save_with(txn)?;
            Ok(())
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, OrmError::TransactionAborted(_)));
    assert!(err.is_unique_violation());
    assert_eq!(db.transactions.count(None).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_savepoint_rollback_keeps_outer_work() {
    let db = setup();
    let entity = db.transactions.clone();

    db.pool
        .transactional(move |txn| {
            Record::new(&entity).with("name", "A").save_with(txn)?;
            let inner_entity = entity.clone();
            let inner = registry()
                .pool()?
                .transactional_savepoint(move |savepoint| {
                    Record::new(&inner_entity).with("name", "B").save_with(savepoint)?;
                    Err::<(), _>(OrmError::Database("discard B".to_string()))
                })
                .wait();
            assert!(inner.is_err());
            Ok(())
        })
        .await
        .unwrap();

    let rows = db.transactions.all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("name"), Some("A"));
}

#[tokio::test]
#[serial]
async fn test_commit_from_foreign_thread_fails() {
    let db = setup();

    let handle = db.pool.start_transaction_worker().await.unwrap();
    let root = handle.transaction().clone();
    assert!(matches!(root.commit(), Err(OrmError::Transaction(_))));
    assert!(matches!(root.rollback(), Err(OrmError::Transaction(_))));

    let savepoint = db
        .pool
        .submit_to_worker(&root, |_| registry().pool()?.begin_savepoint(true))
        .await
        .unwrap();
    assert!(matches!(savepoint.kind(), TransactionKind::Savepoint(_)));
    assert!(matches!(savepoint.commit(), Err(OrmError::Transaction(_))));
    assert!(matches!(savepoint.rollback(), Err(OrmError::Transaction(_))));

    db.pool.rollback_transaction(&root).await.unwrap();
    assert!(!root.is_active());
}

#[tokio::test]
#[serial]
async fn test_concurrent_find_or_create_yields_one_row() {
    let db = setup();
    let mut attrs = Attributes::new();
    attrs.insert("name".to_string(), DatabaseValue::from("shared"));

    let (a, b) = tokio::join!(
        db.transactions.find_or_create(attrs.clone()),
        db.transactions.find_or_create(attrs.clone())
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.id().is_some());
    assert_eq!(a.id(), b.id());
    assert_eq!(count_rows(&db.pool, "transactions").await, 1);

    let again = db.transactions.find_or_create(attrs).await.unwrap();
    assert_eq!(again, a);
    assert_eq!(db.transactions.count(None).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_pinned_transaction_commit() {
    let db = setup();
    let mut record = Record::new(&db.users).with("first_name", "Pinned");

    record.begin_transaction().await.unwrap();
    assert!(matches!(record.begin_transaction().await, Err(OrmError::TransactionAlreadyStarted)));
    assert!(record.save().await.unwrap());
    let txn = record.transaction().cloned().unwrap();

    let found = db
        .users
        .find(FindOptions::new().id(record.id().unwrap()).transaction(txn))
        .await
        .unwrap()
        .one()
        .unwrap();
    assert_eq!(found.get_str("first_name"), Some("Pinned"));

    record.commit_transaction().await.unwrap();
    assert!(record.transaction().is_none());
    assert!(matches!(record.commit_transaction().await, Err(OrmError::TransactionNotStarted(_))));
    assert_eq!(db.users.count(None).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_pinned_transaction_rollback() {
    let db = setup();
    let mut record = Record::new(&db.users).with("first_name", "Gone");

    record.begin_transaction().await.unwrap();
    record.save().await.unwrap();
    record.rollback_transaction().await.unwrap();

    assert_eq!(db.users.count(None).await.unwrap(), 0);
    assert!(matches!(record.rollback_transaction().await, Err(OrmError::TransactionNotStarted(_))));
}

#[tokio::test]
#[serial]
async fn test_pool_statistics() {
    let db = setup();
    create(&db.users, &[("first_name", "Stats".into())]).await;
    db.pool.transactional(|_| Ok(())).await.unwrap();

    let stats = db.pool.stats();
    assert!(stats.interactions >= 1);
    assert!(stats.transactions_committed >= 1);
    assert_eq!(stats.active_workers, 0);
}

#[tokio::test]
#[serial]
async fn test_pool_reads_proceed_while_transaction_open() {
    let db = setup();
    create(&db.pictures, &[("name", "sunset".into())]).await;
    let mut record = Record::new(&db.users).with("first_name", "Pinned");
    record.begin_transaction().await.unwrap();
    record.save().await.unwrap();

    let bound = Duration::from_secs(2);
    let pictures = tokio::time::timeout(bound, db.pictures.count(None)).await.expect("read blocked");
    assert_eq!(pictures.unwrap(), 1);
    let users = tokio::time::timeout(bound, db.users.all()).await.expect("read blocked");
    assert!(users.unwrap().is_empty());
    let found = tokio::time::timeout(bound, db.users.find(FindOptions::new().id(record.id().unwrap())))
        .await
        .expect("read blocked")
        .unwrap();
    assert!(found.one().is_none());

    record.commit_transaction().await.unwrap();
    assert_eq!(db.users.count(None).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_dropped_pinned_record_rolls_back() {
    let db = setup();
    let mut record = Record::new(&db.users).with("first_name", "Forgotten");
    record.begin_transaction().await.unwrap();
    record.save().await.unwrap();
    let txn = record.transaction().cloned().unwrap();
    assert_eq!(db.pool.stats().active_workers, 1);

    drop(record);
    assert_eq!(db.pool.stats().active_workers, 0);

    // The write lock is released once the rollback runs
    let bound = Duration::from_secs(3);
    tokio::time::timeout(bound, create(&db.users, &[("first_name", "After".into())]))
        .await
        .expect("write blocked");
    assert!(!txn.is_active());
    let names: Vec<_> = db
        .users
        .all()
        .await
        .unwrap()
        .iter()
        .filter_map(|u| u.get_str("first_name").map(String::from))
        .collect();
    assert_eq!(names, vec!["After"]);
}

#[tokio::test]
#[serial]
async fn test_committed_clone_is_not_rolled_back_on_drop() {
    let db = setup();
    let mut record = Record::new(&db.users).with("first_name", "Kept");
    record.begin_transaction().await.unwrap();
    let copy = record.clone();
    record.save().await.unwrap();
    record.commit_transaction().await.unwrap();
    drop(copy);
    drop(record);
    assert_eq!(db.users.count(None).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_shutdown_rolls_back_open_transactions() {
    let db = setup();
    let mut record = Record::new(&db.users).with("first_name", "Open");
    record.begin_transaction().await.unwrap();
    record.save().await.unwrap();
    let txn = record.transaction().cloned().unwrap();

    tokio::time::timeout(Duration::from_secs(5), db.pool.shutdown())
        .await
        .expect("teardown exceeded its bound");

    assert!(!txn.is_active());
    assert_eq!(db.pool.stats().active_workers, 0);
    assert!(matches!(
        record.commit_transaction().await,
        Err(OrmError::TransactionNotStarted(_))
    ));
}
