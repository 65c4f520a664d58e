//! Reference blog schema: users, profiles, blogs, posts, comments, tasks.
//!
//! All fields are non-nullable text and every foreign key cascades on delete.

use crate::schema::{EntityDef, SchemaError, SchemaRegistry};

pub const USERS: &str = "users";
pub const PROFILES: &str = "profiles";
pub const BLOGS: &str = "blogs";
pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";
pub const TASKS: &str = "tasks";

/// Returns the six entity definitions in a deliberately non-dependency order.
pub fn blog_definitions() -> Vec<EntityDef> {
    vec![
        EntityDef::new(USERS)
            .text("user_name")
            .text("email")
            .has_one("profile", PROFILES, "user_id")
            .has_many("blogs", BLOGS, "user_id")
            .has_many("posts", POSTS, "user_id")
            .has_many("comments", COMMENTS, "user_id")
            .has_many("tasks", TASKS, "user_id"),
        EntityDef::new(PROFILES)
            .belongs_to("user", USERS, "user_id")
            .text("first_name")
            .text("last_name"),
        EntityDef::new(BLOGS)
            .belongs_to("user", USERS, "user_id")
            .text("name")
            .text("slug")
            .has_many("posts", POSTS, "blog_id"),
        EntityDef::new(POSTS)
            .belongs_to("blog", BLOGS, "blog_id")
            .belongs_to("user", USERS, "user_id")
            .text("name")
            .text("slug")
            .text("description")
            .text("content")
            .has_many("comments", COMMENTS, "post_id"),
        EntityDef::new(COMMENTS)
            .belongs_to("post", POSTS, "post_id")
            .belongs_to("user", USERS, "user_id")
            .text("content"),
        EntityDef::new(TASKS)
            .belongs_to("user", USERS, "user_id")
            .text("title"),
    ]
}

/// Builds the validated blog registry.
pub fn blog_schema() -> Result<SchemaRegistry, SchemaError> {
    SchemaRegistry::from_definitions(blog_definitions())
}

#[cfg(test)]
mod tests {
    use super::{blog_schema, BLOGS, POSTS, USERS};
    use crate::schema::{OnDelete, RelationKind};

    #[test]
    fn blog_schema_is_valid_and_ordered() {
        let registry = blog_schema().expect("blog schema should validate");
        let names: Vec<_> = registry.entity_names().collect();
        assert_eq!(names[0], USERS);
        let blogs = names.iter().position(|name| *name == BLOGS).unwrap();
        let posts = names.iter().position(|name| *name == POSTS).unwrap();
        assert!(blogs < posts);
    }

    #[test]
    fn every_user_dependent_cascades() {
        let registry = blog_schema().unwrap();
        let dependents = registry.dependents_of(USERS);
        assert_eq!(dependents.len(), 5);
        assert!(dependents
            .iter()
            .all(|dependent| dependent.on_delete == OnDelete::Cascade));

        let profile = registry.relationship(USERS, "profile").unwrap();
        assert_eq!(profile.kind, RelationKind::HasOne);
    }
}
