//! `relrepo` command-line entry point.
//!
//! # Responsibility
//! - Run the blog walkthrough against an in-memory or file database.
//! - Print the DDL rendered from the blog schema or a JSON schema file.

use clap::{Parser, Subcommand};
use log::{error, info};
use relrepo_core::db::ddl::render_schema;
use relrepo_core::schema::blog::blog_schema;
use relrepo_core::{
    default_log_level, init_logging, open_db, open_db_in_memory, Conditions, EntityDef,
    FieldValues, NestedCreate, RecordKey, RelationPath, RepoError, Repository, SchemaRegistry,
    SqliteGateway, StorageGateway,
};
use serde_json::{json, Value as Json};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "relrepo", version, about = "Typed relational repositories over SQLite")]
struct Cli {
    /// trace|debug|info|warn|error|off
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rotating log files; logs go to stderr otherwise.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Seed the blog schema, fetch aggregates and print the results as JSON.
    Demo {
        /// SQLite file to use instead of an in-memory database.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print CREATE TABLE statements.
    Ddl {
        /// JSON file holding an array of entity definitions.
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    if let Err(err) = init_logging(&level, cli.log_dir.as_deref()) {
        eprintln!("relrepo: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("relrepo: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> CliResult<()> {
    match command {
        Command::Demo { db } => {
            let registry = blog_schema()?;
            let conn = match &db {
                Some(path) => open_db(path, &registry)?,
                None => open_db_in_memory(&registry)?,
            };
            let gateway = SqliteGateway::try_new(&conn, &registry)?;
            let report = demo(&gateway)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ddl { schema } => {
            let registry = match schema {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)?;
                    let defs: Vec<EntityDef> = serde_json::from_str(&raw)?;
                    SchemaRegistry::from_definitions(defs)?
                }
                None => blog_schema()?,
            };
            println!("{}", render_schema(&registry));
        }
    }
    Ok(())
}

fn user(name: &str) -> FieldValues {
    FieldValues::new()
        .with("user_name", name)
        .with("email", format!("{name}@example.com"))
}

fn profile(first: &str, last: &str) -> NestedCreate {
    NestedCreate::default()
        .field("first_name", first)
        .field("last_name", last)
}

fn post(name: &str, blog: RecordKey, author: RecordKey) -> FieldValues {
    FieldValues::new()
        .with("blog_id", blog)
        .with("user_id", author)
        .with("name", name)
        .with("slug", name.to_lowercase().replace(' ', "-"))
        .with("description", format!("About {name}"))
        .with("content", format!("{name} body"))
}

/// Walks through CRUD, seeding, aggregate fetches and nested creates.
fn demo<G: StorageGateway>(gateway: &G) -> CliResult<Json> {
    let users = Repository::try_new(gateway, "users")?;
    let blogs = Repository::try_new(gateway, "blogs")?;
    let posts = Repository::try_new(gateway, "posts")?;
    let comments = Repository::try_new(gateway, "comments")?;
    let profiles = Repository::try_new(gateway, "profiles")?;

    // CRUD round trip on a throwaway user.
    let temp = users.create(&user("temp"))?;
    let temp_key = temp.key.ok_or("store returned no key")?;
    let renamed = users.update(temp_key, &FieldValues::new().with("user_name", "renamed"))?;
    users.delete(temp_key)?;
    let after_delete = match users.get_by_key(temp_key) {
        Err(RepoError::NotFound { .. }) => "not_found",
        Ok(_) => "still_present",
        Err(err) => return Err(err.into()),
    };

    // Two authors with profiles, one blog each, posts and cross comments.
    let mut author_keys = Vec::new();
    for (name, first, last) in [("jane", "Jane", "Doe"), ("john", "John", "Roe")] {
        let input = NestedCreate::new(user(name)).with_one("profile", profile(first, last));
        let created = users.create_with_nested(&input)?;
        author_keys.push(created.key().ok_or("store returned no key")?);
    }

    for (index, author) in author_keys.iter().copied().enumerate() {
        let reader = author_keys[(index + 1) % author_keys.len()];
        let blog = blogs.create(
            &FieldValues::new()
                .with("user_id", author)
                .with("name", format!("Blog {}", index + 1))
                .with("slug", format!("blog-{}", index + 1)),
        )?;
        let blog_key = blog.key.ok_or("store returned no key")?;

        let seeded: [(&str, &[&str]); 2] = [
            ("First Post", &["Nice start", "Welcome"]),
            ("Second Post", &["Thanks"]),
        ];
        for (name, texts) in seeded {
            let post_key = posts
                .create(&post(name, blog_key, author))?
                .key
                .ok_or("store returned no key")?;
            for text in texts.iter().copied() {
                comments.create(
                    &FieldValues::new()
                        .with("post_id", post_key)
                        .with("user_id", reader)
                        .with("content", text),
                )?;
            }
        }
    }

    let jane = author_keys[0];
    let full_tree = users.aggregate(
        jane,
        &RelationPath::from_dotted(["profile", "blogs.posts.comments.user"]),
    )?;
    let jane_posts = posts.aggregates_by(
        &Conditions::new().with("user_id", jane),
        &RelationPath::from_dotted(["blog", "comments"]),
    )?;
    let profile_with_user =
        profiles.aggregates_by(&Conditions::new(), &RelationPath::new().with("user"))?;

    // Nested create with children, then a failing one that must roll back.
    let tasks = NestedCreate::new(user("taskmaster")).with_many(
        "tasks",
        ["plan", "build", "ship"]
            .into_iter()
            .map(|title| NestedCreate::default().field("title", title)),
    );
    let with_tasks = users.create_with_nested(&tasks)?;
    let users_before = users.count_by(&Conditions::new())?;
    let broken = NestedCreate::new(user("broken")).with_many(
        "tasks",
        [
            NestedCreate::default().field("title", "ok"),
            NestedCreate::default(),
        ],
    );
    let rejected = users
        .create_with_nested(&broken)
        .err()
        .map(|err| err.to_string());
    let users_after = users.count_by(&Conditions::new())?;

    let deleted = users.delete(author_keys[1])?;
    info!(
        "event=demo module=cli status=ok users={} deleted={}",
        users.count_by(&Conditions::new())?,
        deleted.key.unwrap_or_default()
    );

    Ok(json!({
        "crud": {
            "created": temp,
            "updated": renamed,
            "after_delete": after_delete,
        },
        "jane": full_tree,
        "jane_posts": jane_posts,
        "profiles": profile_with_user,
        "nested_create": with_tasks,
        "rollback": {
            "error": rejected,
            "users_before": users_before,
            "users_after": users_after,
        },
        "after_cascade_delete": {
            "users": users.count_by(&Conditions::new())?,
            "blogs": blogs.count_by(&Conditions::new())?,
            "posts": posts.count_by(&Conditions::new())?,
            "comments": comments.count_by(&Conditions::new())?,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::{demo, Cli};
    use clap::Parser;
    use relrepo_core::schema::blog::blog_schema;
    use relrepo_core::{open_db_in_memory, SqliteGateway};

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["relrepo", "demo", "--log-level", "warn"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn demo_reports_rollback_and_cascade() {
        let registry = blog_schema().unwrap();
        let conn = open_db_in_memory(&registry).unwrap();
        let gateway = SqliteGateway::try_new(&conn, &registry).unwrap();

        let report = demo(&gateway).unwrap();
        assert_eq!(report["crud"]["after_delete"], "not_found");
        assert_eq!(report["rollback"]["users_before"], report["rollback"]["users_after"]);
        assert!(report["rollback"]["error"].is_string());
        assert_eq!(report["after_cascade_delete"]["users"], 2);
        assert_eq!(report["after_cascade_delete"]["blogs"], 1);
        assert_eq!(report["after_cascade_delete"]["posts"], 2);
        assert_eq!(report["after_cascade_delete"]["comments"], 0);
        assert_eq!(
            report["jane"]["relations"]["blogs"][0]["relations"]["posts"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
    }
}
