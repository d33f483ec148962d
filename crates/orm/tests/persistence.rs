mod common;

use common::{create, setup, setup_with, DatabaseValue};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tether_orm::prelude::*;

struct UserHooks {
    initialized: Arc<AtomicUsize>,
}

impl ModelHooks for UserHooks {
    fn before_create(&self, record: &mut Record, _ex: &dyn Executor) -> OrmResult<bool> {
        if record.get("last_name").map_or(true, DatabaseValue::is_null) {
            record.set("last_name", "Unknown");
        }
        Ok(true)
    }

    fn before_delete(&self, record: &mut Record, _ex: &dyn Executor) -> OrmResult<bool> {
        Ok(record.get_str("first_name") != Some("Keep"))
    }

    fn after_init(&self, _record: &mut Record, _ex: &dyn Executor) -> OrmResult<()> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
#[serial]
async fn test_save_find_round_trip() {
    let db = setup();
    let mut user = Record::new(&db.users)
        .with("first_name", "Ada")
        .with("last_name", "Lovelace")
        .with("age", 36);
    assert!(user.is_new());
    assert!(user.save().await.unwrap());
    let id = user.id().unwrap();

    let found = db.users.find(FindOptions::new().id(id)).await.unwrap().one().unwrap();
    assert_eq!(found, user);
    assert_eq!(found.get_str("first_name"), Some("Ada"));
    assert_eq!(found.get_str("last_name"), Some("Lovelace"));
    assert_eq!(found.get_i64("age"), Some(36));
    assert!(found.get("dob").unwrap().is_null());

    user.set("age", 37);
    assert!(user.save().await.unwrap());
    let found = db.users.find(FindOptions::new().id(id)).await.unwrap().one().unwrap();
    assert_eq!(found.get_i64("age"), Some(37));
    assert_eq!(db.users.count(None).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_find_missing_id_is_none() {
    let db = setup();
    let found = db.users.find(FindOptions::new().id(404)).await.unwrap();
    assert!(found.one().is_none());
}

#[tokio::test]
#[serial]
async fn test_joined_filters_keep_precedence() {
    let db = setup();
    create(&db.users, &[("first_name", "Ada".into()), ("last_name", "Lovelace".into()), ("age", 36.into())]).await;
    create(&db.users, &[("first_name", "Grace".into()), ("last_name", "Hopper".into()), ("age", 85.into())]).await;
    create(&db.users, &[("first_name", "Ada".into()), ("last_name", "Byron".into()), ("age", 20.into())]).await;

    let names = Where::new("first_name = ? OR first_name = ?").bind("Ada").bind("Grace");
    let older = Where::new("age > ?").bind(30);
    let filter = join_where(&names, &older, "AND");

    assert_eq!(db.users.count(Some(filter.clone())).await.unwrap(), 2);
    let found = db
        .users
        .find(SelectOptions::new().filter(filter).order_by("age"))
        .await
        .unwrap()
        .into_vec();
    let last_names: Vec<_> = found.iter().filter_map(|u| u.get_str("last_name")).collect();
    assert_eq!(last_names, vec!["Lovelace", "Hopper"]);
}

#[tokio::test]
#[serial]
async fn test_joined_filters_match_disjoint_rows() {
    let db = setup();
    create(&db.users, &[("first_name", "Ada".into()), ("age", 36.into())]).await;
    create(&db.users, &[("first_name", "Zed".into()), ("age", 70.into())]).await;

    let names = Where::new("first_name = ? OR first_name = ?").bind("Ada").bind("Grace");
    let ages = Where::new("age > ? AND age < ?").bind(50).bind(100);

    let both = join_where(&names, &ages, "AND");
    assert_eq!(db.users.count(Some(both)).await.unwrap(), 0);
    let either = join_where(&names, &ages, "OR");
    assert_eq!(db.users.count(Some(either)).await.unwrap(), 2);
}

#[tokio::test]
#[serial]
async fn test_find_by_exists_and_delete_all() {
    let db = setup();
    create(&db.users, &[("first_name", "Ada".into()), ("age", 36.into())]).await;
    create(&db.users, &[("first_name", "Ada".into()), ("age", 20.into())]).await;
    create(&db.users, &[("first_name", "Grace".into()), ("age", 85.into())]).await;

    let mut attrs = Attributes::new();
    attrs.insert("first_name".to_string(), "Ada".into());
    assert_eq!(db.users.find_by(attrs).await.unwrap().len(), 2);

    let young = Where::new("age < ?").bind(30);
    assert!(db.users.exists(Some(young.clone())).await.unwrap());
    assert_eq!(db.users.delete_all(Some(young.clone())).await.unwrap(), 1);
    assert!(!db.users.exists(Some(young)).await.unwrap());
    assert_eq!(db.users.all().await.unwrap().len(), 2);

    db.users.delete_all(None).await.unwrap();
    assert!(!db.users.exists(None).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_paging_and_ordering() {
    let db = setup();
    for (name, age) in [("A", 1), ("B", 2), ("C", 3), ("D", 4)] {
        create(&db.users, &[("first_name", name.into()), ("age", age.into())]).await;
    }

    let page = db
        .users
        .find(FindOptions::new().order_by("age DESC").page(2, 1))
        .await
        .unwrap()
        .into_vec();
    let names: Vec<_> = page.iter().filter_map(|u| u.get_str("first_name")).collect();
    assert_eq!(names, vec!["C", "B"]);
}

#[tokio::test]
#[serial]
async fn test_validation_blocks_save() {
    let db = setup_with(|builder| {
        builder
            .validator(PresenceOf::new(&["first_name"]))
            .validator(LengthOf::between(&["last_name"], 2..=10))
    });

    let mut user = Record::new(&db.users).with("last_name", "X");
    assert!(!user.save().await.unwrap());
    assert!(user.is_new());
    assert_eq!(user.errors().len(), 2);
    assert_eq!(user.errors().errors_for("first_name"), ["First name cannot be blank."]);
    assert_eq!(
        user.errors().errors_for("last_name"),
        ["Last name must have a length between 2 and 10 (inclusive)."]
    );
    assert_eq!(db.users.count(None).await.unwrap(), 0);

    user.set("first_name", "Ada");
    user.set("last_name", "Lovelace");
    assert!(user.save().await.unwrap());
    assert!(user.errors().is_empty());
}

#[tokio::test]
#[serial]
async fn test_uniqueness_validation() {
    let db = setup_with(|builder| builder.validator(UniquenessOf::new(&["first_name"])));

    let mut first = create(&db.users, &[("first_name", "Ada".into())]).await;
    let mut second = Record::new(&db.users).with("first_name", "Ada");
    assert!(!second.is_valid().await.unwrap());
    assert_eq!(second.errors().errors_for("first_name"), ["First name is not unique."]);

    // A saved record does not collide with its own row
    first.set("age", 36);
    assert!(first.save().await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_hooks_run_around_writes() {
    let initialized = Arc::new(AtomicUsize::new(0));
    let hooks = UserHooks {
        initialized: initialized.clone(),
    };
    let db = setup_with(move |builder| builder.hooks(hooks));

    let mut keep = create(&db.users, &[("first_name", "Keep".into())]).await;
    assert_eq!(keep.get_str("last_name"), Some("Unknown"));
    assert_eq!(initialized.load(Ordering::SeqCst), 0);

    let found = db.users.all().await.unwrap();
    assert_eq!(found[0].get_str("last_name"), Some("Unknown"));
    assert_eq!(initialized.load(Ordering::SeqCst), 1);

    assert!(!keep.delete().await.unwrap());
    assert!(!keep.is_deleted());
    assert_eq!(db.users.count(None).await.unwrap(), 1);

    let mut other = create(&db.users, &[("first_name", "Other".into()), ("last_name", "Given".into())]).await;
    assert_eq!(other.get_str("last_name"), Some("Given"));
    assert!(other.delete().await.unwrap());
    assert_eq!(db.users.count(None).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_delete_then_save_fails() {
    let db = setup();
    let mut user = create(&db.users, &[("first_name", "Ada".into())]).await;

    assert!(user.delete().await.unwrap());
    assert!(user.is_deleted());
    assert_eq!(user.id(), None);
    assert_eq!(user.get_str("first_name"), Some("Ada"));
    assert!(matches!(user.save().await, Err(OrmError::SaveError(_))));
    assert!(matches!(user.delete().await, Err(OrmError::ReferenceNotSaved(_))));
    assert_eq!(db.users.count(None).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_refresh_reloads_row() {
    let db = setup();
    let user = create(&db.users, &[("first_name", "Ada".into())]).await;

    let mut stale = db.users.find(FindOptions::new().id(user.id().unwrap())).await.unwrap().one().unwrap();
    let mut fresh = user.clone();
    fresh.set("first_name", "Augusta");
    fresh.save().await.unwrap();

    assert_eq!(stale.get_str("first_name"), Some("Ada"));
    stale.refresh().await.unwrap();
    assert_eq!(stale.get_str("first_name"), Some("Augusta"));

    fresh.delete().await.unwrap();
    assert!(matches!(stale.refresh().await, Err(OrmError::CannotRefresh(_))));
    assert!(matches!(
        Record::new(&db.users).refresh().await,
        Err(OrmError::CannotRefresh(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_unknown_table_fails_probe() {
    let db = setup();
    let ghosts = registry().register(EntityType::builder("Ghost").build().unwrap());
    let mut ghost = Record::new(&ghosts).with("name", "Boo");

    let err = ghost.save().await.unwrap_err();
    assert!(matches!(err.root_cause(), OrmError::ImaginaryTable(table) if table == "ghosts"));
    drop(db);
}

#[tokio::test]
#[serial]
async fn test_to_json_includes_id() {
    let db = setup();
    let user = create(&db.users, &[("first_name", "Ada".into()), ("age", 36.into())]).await;

    let json = user.to_json();
    assert_eq!(json["id"], serde_json::json!(user.id().unwrap()));
    assert_eq!(json["first_name"], "Ada");
    assert_eq!(json["age"], 36);
}
