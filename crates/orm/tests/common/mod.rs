//! Shared fixture: a temporary SQLite database with the test schema and a
//! registry holding the test entity types.

#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use tether_orm::prelude::*;
use tether_orm::ConnectionFactory;

const SCHEMA: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, first_name TEXT, last_name TEXT, age INTEGER, dob TEXT, favorite_color_id INTEGER)",
    "CREATE TABLE avatars (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, color TEXT, user_id INTEGER)",
    "CREATE TABLE pictures (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, size INTEGER, user_id INTEGER)",
    "CREATE TABLE favorite_colors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
    "CREATE TABLE favorite_colors_users (favorite_color_id INTEGER, user_id INTEGER)",
    "CREATE TABLE boys (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
    "CREATE TABLE girls (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
    "CREATE TABLE nicknames (id INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT, nicknameable_id INTEGER, nicknameable_type TEXT)",
    "CREATE TABLE transactions (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT UNIQUE)",
];

pub struct TestDb {
    // Keeps the database file alive for the test
    _dir: TempDir,
    pub pool: ConnectionPool,
    pub users: Arc<EntityType>,
    pub avatars: Arc<EntityType>,
    pub pictures: Arc<EntityType>,
    pub colors: Arc<EntityType>,
    pub boys: Arc<EntityType>,
    pub girls: Arc<EntityType>,
    pub nicknames: Arc<EntityType>,
    pub transactions: Arc<EntityType>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh database and registry. `customize` may adjust the `User` type
/// before it is registered.
pub fn setup_with(customize: impl FnOnce(tether_orm::model::EntityTypeBuilder) -> tether_orm::model::EntityTypeBuilder) -> TestDb {
    init_tracing();
    registry().reset();

    let dir = tempfile::tempdir().expect("tempdir");
    let factory = SqliteConnectionFactory::new(dir.path().join("test.db"));
    let mut conn = factory.connect().expect("connect");
    for ddl in SCHEMA {
        conn.execute(ddl, &[]).expect("create schema");
    }
    drop(conn);

    let config = PoolConfig::default().with_pool_size(2).with_sqlite_savepoints(true);
    let pool = ConnectionPool::new(factory, config).expect("pool");
    registry().set_pool(pool.clone());

    let user = EntityType::builder("User")
        .relationship(Relationship::belongs_to("favorite_color"))
        .relationship(Relationship::has_many("pictures"))
        .relationship(Relationship::has_one("avatar"))
        .relationship(Relationship::habtm("favorite_colors"));
    let users = registry().register(customize(user).build().expect("User"));

    let register = |builder: tether_orm::model::EntityTypeBuilder| registry().register(builder.build().expect("entity"));
    TestDb {
        _dir: dir,
        pool,
        users,
        avatars: register(EntityType::builder("Avatar")),
        pictures: register(EntityType::builder("Picture").relationship(Relationship::belongs_to("user"))),
        colors: register(EntityType::builder("FavoriteColor").relationship(Relationship::habtm("users"))),
        boys: register(
            EntityType::builder("Boy").relationship(Relationship::has_many("nicknames").as_alias("nicknameable")),
        ),
        girls: register(
            EntityType::builder("Girl").relationship(Relationship::has_many("nicknames").as_alias("nicknameable")),
        ),
        nicknames: register(
            EntityType::builder("Nickname").relationship(Relationship::belongs_to("nicknameable").polymorphic()),
        ),
        transactions: register(EntityType::builder("Transaction")),
    }
}

pub fn setup() -> TestDb {
    setup_with(|builder| builder)
}

pub async fn create(entity: &Arc<EntityType>, pairs: &[(&str, DatabaseValue)]) -> Record {
    let mut record = Record::new(entity);
    for (key, value) in pairs {
        record.set(*key, value.clone());
    }
    assert!(record.save().await.expect("save"), "record was not saved: {}", record.errors());
    record
}

pub async fn count_rows(pool: &ConnectionPool, table: &'static str) -> i64 {
    pool.run_interaction(move |ex| tether_orm::query::execution::count(ex, table, None))
        .await
        .expect("count")
}

impl Drop for TestDb {
    fn drop(&mut self) {
        registry().reset();
    }
}

pub use tether_orm::DatabaseValue;
