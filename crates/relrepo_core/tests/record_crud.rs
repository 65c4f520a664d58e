use relrepo_core::schema::blog::blog_schema;
use relrepo_core::{
    open_db_in_memory, Conditions, FieldDef, FieldType, FieldValues, EntityDef, RepoError,
    Repository, SchemaRegistry, SqliteGateway, Value,
};

fn jane() -> FieldValues {
    FieldValues::new()
        .with("user_name", "jane")
        .with("email", "jane@example.com")
}

#[test]
fn create_then_get_returns_equal_record() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();

    let created = users.create(&jane()).unwrap();
    let key = created.key.expect("store assigns key");
    assert_eq!(created.entity, "users");
    assert_eq!(created.text("user_name"), Some("jane"));

    let loaded = users.get_by_key(key).unwrap();
    assert_eq!(loaded, created);
}

#[test]
fn update_changes_only_given_fields() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();

    let key = users.create(&jane()).unwrap().key.unwrap();
    let updated = users
        .update(key, &FieldValues::new().with("email", "jane@new.example"))
        .unwrap();

    assert_eq!(updated.text("email"), Some("jane@new.example"));
    assert_eq!(updated.text("user_name"), Some("jane"));
    assert_eq!(users.get_by_key(key).unwrap(), updated);
}

#[test]
fn missing_key_is_not_found_for_get_update_and_delete() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();

    assert!(matches!(
        users.get_by_key(42),
        Err(RepoError::NotFound { ref entity, key: 42 }) if entity == "users"
    ));
    assert!(matches!(
        users.update(42, &FieldValues::new().with("email", "x")),
        Err(RepoError::NotFound { .. })
    ));
    assert!(matches!(users.delete(42), Err(RepoError::NotFound { .. })));
}

#[test]
fn delete_returns_row_and_removes_it() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();

    let created = users.create(&jane()).unwrap();
    let key = created.key.unwrap();
    let deleted = users.delete(key).unwrap();

    assert_eq!(deleted, created);
    assert!(matches!(users.get_by_key(key), Err(RepoError::NotFound { .. })));
    assert_eq!(users.count_by(&Conditions::new()).unwrap(), 0);
}

#[test]
fn list_by_filters_exactly_in_insertion_order() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();
    let tasks = Repository::try_new(&gateway, "tasks").unwrap();

    let jane_key = users.create(&jane()).unwrap().key.unwrap();
    let john_key = users
        .create(
            &FieldValues::new()
                .with("user_name", "john")
                .with("email", "john@example.com"),
        )
        .unwrap()
        .key
        .unwrap();

    for (owner, title) in [
        (jane_key, "write"),
        (john_key, "read"),
        (jane_key, "review"),
        (jane_key, "ship"),
    ] {
        tasks
            .create(&FieldValues::new().with("user_id", owner).with("title", title))
            .unwrap();
    }

    let titles: Vec<String> = tasks
        .list_by(&Conditions::new().with("user_id", jane_key))
        .unwrap()
        .into_iter()
        .filter_map(|task| task.text("title").map(str::to_string))
        .collect();
    assert_eq!(titles, vec!["write", "review", "ship"]);

    let both = Conditions::new()
        .with("user_id", jane_key)
        .with("title", "review");
    assert_eq!(tasks.count_by(&both).unwrap(), 1);
    assert_eq!(tasks.count_by(&Conditions::new()).unwrap(), 4);
}

#[test]
fn unknown_field_is_rejected_for_writes_and_filters() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();

    let err = users.create(&jane().with("nickname", "jj")).unwrap_err();
    assert!(matches!(
        err,
        RepoError::UnknownField { ref entity, ref field } if entity == "users" && field == "nickname"
    ));

    let err = users
        .list_by(&Conditions::new().with("nickname", "jj"))
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownField { .. }));
}

#[test]
fn unknown_entity_is_rejected() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

    let err = match Repository::try_new(&gateway, "widgets") {
        Ok(_) => panic!("widgets is not registered"),
        Err(err) => err,
    };
    assert!(matches!(err, RepoError::UnknownEntity(ref name) if name == "widgets"));
}

#[test]
fn constraint_violations_leave_no_row() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();
    let tasks = Repository::try_new(&gateway, "tasks").unwrap();

    let missing_email = FieldValues::new().with("user_name", "jane");
    assert!(matches!(
        users.create(&missing_email),
        Err(RepoError::ConstraintViolation { .. })
    ));

    let null_name = jane().with("user_name", Value::Null);
    assert!(matches!(
        users.create(&null_name),
        Err(RepoError::ConstraintViolation { .. })
    ));

    let wrong_type = jane().with("email", 7_i64);
    assert!(matches!(
        users.create(&wrong_type),
        Err(RepoError::ConstraintViolation { .. })
    ));

    let orphan = FieldValues::new().with("user_id", 999_i64).with("title", "lost");
    let err = tasks.create(&orphan).unwrap_err();
    assert!(matches!(
        err,
        RepoError::ConstraintViolation { ref reason, .. } if reason.contains("missing users row")
    ));

    let assigned_key = jane().with("id", 5_i64);
    assert!(matches!(
        users.create(&assigned_key),
        Err(RepoError::ConstraintViolation { .. })
    ));

    assert_eq!(users.count_by(&Conditions::new()).unwrap(), 0);
    assert_eq!(tasks.count_by(&Conditions::new()).unwrap(), 0);
}

#[test]
fn null_condition_matches_null_columns_and_booleans_round_trip() {
    let registry = SchemaRegistry::from_definitions([EntityDef::new("notes")
        .text("title")
        .field(FieldDef::optional("body", FieldType::Text))
        .field(FieldDef::optional("pinned", FieldType::Boolean))
        .field(FieldDef::optional("weight", FieldType::Real))])
    .unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let notes = Repository::try_new(&gateway, "notes").unwrap();

    let bare = notes
        .create(&FieldValues::new().with("title", "bare"))
        .unwrap();
    assert_eq!(bare.get("body"), Some(&Value::Null));

    let full = notes
        .create(
            &FieldValues::new()
                .with("title", "full")
                .with("body", "text")
                .with("pinned", true)
                .with("weight", 2_i64),
        )
        .unwrap();
    assert_eq!(full.get("pinned"), Some(&Value::Boolean(true)));
    assert_eq!(full.get("weight"), Some(&Value::Real(2.0)));

    let empty_bodies = notes
        .list_by(&Conditions::new().with("body", Value::Null))
        .unwrap();
    assert_eq!(empty_bodies, vec![bare]);

    let pinned = notes
        .list_by(&Conditions::new().with("pinned", true))
        .unwrap();
    assert_eq!(pinned, vec![full]);
}

#[test]
fn second_has_one_row_for_same_parent_is_rejected() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let users = Repository::try_new(&gateway, "users").unwrap();
    let profiles = Repository::try_new(&gateway, "profiles").unwrap();

    let key = users.create(&jane()).unwrap().key.unwrap();
    let profile = |first: &str| {
        FieldValues::new()
            .with("user_id", key)
            .with("first_name", first)
            .with("last_name", "Doe")
    };
    profiles.create(&profile("Jane")).unwrap();

    let err = profiles.create(&profile("Janet")).unwrap_err();
    assert!(matches!(
        err,
        RepoError::ConstraintViolation { ref entity, .. } if entity == "profiles"
    ));
    assert_eq!(profiles.count_by(&Conditions::new()).unwrap(), 1);
}

#[test]
fn update_of_missing_key_is_not_found_even_with_dangling_foreign_key() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();
    let tasks = Repository::try_new(&gateway, "tasks").unwrap();

    let err = tasks
        .update(42, &FieldValues::new().with("user_id", 999_i64))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound { ref entity, key: 42 } if entity == "tasks"
    ));
}
