use relrepo_core::schema::blog::blog_schema;
use relrepo_core::{
    open_db_in_memory, Conditions, EntityDef, FieldDef, FieldType, FieldValues, OnDelete,
    RecordKey, RepoError, Repository, SchemaRegistry, SqliteGateway, StorageGateway, Value,
};

fn count<G: StorageGateway>(gateway: &G, entity: &str) -> usize {
    Repository::try_new(gateway, entity)
        .unwrap()
        .count_by(&Conditions::new())
        .unwrap()
}

fn insert<G: StorageGateway>(gateway: &G, entity: &str, values: FieldValues) -> RecordKey {
    gateway.insert(entity, &values).unwrap().key.unwrap()
}

#[test]
fn deleting_user_removes_whole_dependent_tree() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

    let user = insert(
        &gateway,
        "users",
        FieldValues::new()
            .with("user_name", "jane")
            .with("email", "jane@example.com"),
    );
    let other = insert(
        &gateway,
        "users",
        FieldValues::new()
            .with("user_name", "john")
            .with("email", "john@example.com"),
    );
    insert(
        &gateway,
        "profiles",
        FieldValues::new()
            .with("user_id", user)
            .with("first_name", "Jane")
            .with("last_name", "Doe"),
    );
    let blog = insert(
        &gateway,
        "blogs",
        FieldValues::new()
            .with("user_id", user)
            .with("name", "Notes")
            .with("slug", "notes"),
    );
    let post = insert(
        &gateway,
        "posts",
        FieldValues::new()
            .with("blog_id", blog)
            .with("user_id", user)
            .with("name", "Hello")
            .with("slug", "hello")
            .with("description", "first")
            .with("content", "hello world"),
    );
    insert(
        &gateway,
        "comments",
        FieldValues::new()
            .with("post_id", post)
            .with("user_id", other)
            .with("content", "nice"),
    );
    insert(
        &gateway,
        "comments",
        FieldValues::new()
            .with("post_id", post)
            .with("user_id", user)
            .with("content", "thanks"),
    );
    insert(
        &gateway,
        "tasks",
        FieldValues::new().with("user_id", user).with("title", "write"),
    );
    insert(
        &gateway,
        "tasks",
        FieldValues::new().with("user_id", other).with("title", "read"),
    );

    let deleted = gateway.delete_by_key("users", user).unwrap();
    assert_eq!(deleted.text("user_name"), Some("jane"));

    assert_eq!(count(&gateway, "users"), 1);
    assert_eq!(count(&gateway, "profiles"), 0);
    assert_eq!(count(&gateway, "blogs"), 0);
    assert_eq!(count(&gateway, "posts"), 0);
    assert_eq!(count(&gateway, "comments"), 0);
    assert_eq!(count(&gateway, "tasks"), 1);
}

#[test]
fn deleting_post_keeps_parents_and_siblings() {
    let registry = blog_schema().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

    let user = insert(
        &gateway,
        "users",
        FieldValues::new().with("user_name", "jane").with("email", "j@x"),
    );
    let blog = insert(
        &gateway,
        "blogs",
        FieldValues::new()
            .with("user_id", user)
            .with("name", "Notes")
            .with("slug", "notes"),
    );
    let mut posts = Vec::new();
    for slug in ["one", "two"] {
        let post = insert(
            &gateway,
            "posts",
            FieldValues::new()
                .with("blog_id", blog)
                .with("user_id", user)
                .with("name", slug)
                .with("slug", slug)
                .with("description", "d")
                .with("content", "c"),
        );
        insert(
            &gateway,
            "comments",
            FieldValues::new()
                .with("post_id", post)
                .with("user_id", user)
                .with("content", "c"),
        );
        posts.push(post);
    }

    gateway.delete_by_key("posts", posts[0]).unwrap();

    assert_eq!(count(&gateway, "users"), 1);
    assert_eq!(count(&gateway, "blogs"), 1);
    assert_eq!(count(&gateway, "posts"), 1);
    assert_eq!(count(&gateway, "comments"), 1);
}

fn kennel(policy: OnDelete) -> SchemaRegistry {
    SchemaRegistry::from_definitions([
        EntityDef::new("owners")
            .text("name")
            .has_many("pets", "pets", "owner_id")
            .on_delete(policy),
        EntityDef::new("pets")
            .field(FieldDef::optional("owner_id", FieldType::Integer))
            .text("name")
            .belongs_to("owner", "owners", "owner_id")
            .on_delete(policy)
            .has_many("toys", "toys", "pet_id"),
        EntityDef::new("toys")
            .text("name")
            .belongs_to("pet", "pets", "pet_id"),
    ])
    .unwrap()
}

#[test]
fn restrict_blocks_delete_and_keeps_rows() {
    let registry = kennel(OnDelete::Restrict);
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

    let owner = insert(&gateway, "owners", FieldValues::new().with("name", "ann"));
    insert(
        &gateway,
        "pets",
        FieldValues::new().with("owner_id", owner).with("name", "rex"),
    );

    let err = gateway.delete_by_key("owners", owner).unwrap_err();
    assert!(matches!(
        err,
        RepoError::ConstraintViolation { ref entity, .. } if entity == "owners"
    ));
    assert_eq!(count(&gateway, "owners"), 1);
    assert_eq!(count(&gateway, "pets"), 1);
}

#[test]
fn restrict_deep_in_cascade_rolls_back_earlier_deletes() {
    let registry = SchemaRegistry::from_definitions([
        EntityDef::new("owners")
            .text("name")
            .has_many("pets", "pets", "owner_id"),
        EntityDef::new("pets")
            .text("name")
            .belongs_to("owner", "owners", "owner_id")
            .has_many("vet_visits", "vet_visits", "pet_id")
            .on_delete(OnDelete::Restrict),
        EntityDef::new("vet_visits")
            .text("note")
            .belongs_to("pet", "pets", "pet_id")
            .on_delete(OnDelete::Restrict),
    ])
    .unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

    let owner = insert(&gateway, "owners", FieldValues::new().with("name", "ann"));
    insert(
        &gateway,
        "pets",
        FieldValues::new().with("owner_id", owner).with("name", "tom"),
    );
    let sick = insert(
        &gateway,
        "pets",
        FieldValues::new().with("owner_id", owner).with("name", "rex"),
    );
    insert(
        &gateway,
        "vet_visits",
        FieldValues::new().with("pet_id", sick).with("note", "checkup"),
    );

    let err = gateway.delete_by_key("owners", owner).unwrap_err();
    assert!(matches!(
        err,
        RepoError::ConstraintViolation { ref entity, .. } if entity == "pets"
    ));
    assert_eq!(count(&gateway, "owners"), 1);
    assert_eq!(count(&gateway, "pets"), 2);
    assert_eq!(count(&gateway, "vet_visits"), 1);
}

#[test]
fn set_null_detaches_dependents_without_touching_grandchildren() {
    let registry = kennel(OnDelete::SetNull);
    let conn = open_db_in_memory(&registry).unwrap();
    let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

    let owner = insert(&gateway, "owners", FieldValues::new().with("name", "ann"));
    let pet = insert(
        &gateway,
        "pets",
        FieldValues::new().with("owner_id", owner).with("name", "rex"),
    );
    insert(
        &gateway,
        "toys",
        FieldValues::new().with("pet_id", pet).with("name", "ball"),
    );

    gateway.delete_by_key("owners", owner).unwrap();

    assert_eq!(count(&gateway, "owners"), 0);
    let orphan = gateway
        .select_where("pets", &Conditions::new().with("owner_id", Value::Null))
        .unwrap();
    assert_eq!(orphan.len(), 1);
    assert_eq!(orphan[0].key, Some(pet));
    assert_eq!(count(&gateway, "toys"), 1);
}
