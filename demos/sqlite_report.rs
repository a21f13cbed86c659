//! Example: A YAML-described query with an alias, run against in-memory SQLite
//!
//! The command takes an optional list of ids and a limit. The alias presets the ids,
//! and a caller flag still overrides the preset. `print-query` shows the rendered SQL
//! without touching the database.
//!
//! Run with: cargo run --example sqlite_report

use sqlplate_core::prelude::*;
use std::sync::Arc;

const LS_TEST: &str = r#"
name: ls-test
short: List test rows
type: sqleton
flags:
  - name: ids
    type: intList
    help: Only these ids
  - name: limit
    type: int
    default: 10
query: |
  SELECT * FROM test
  {{ if .ids }}WHERE id IN ({{ .ids | sqlIntIn }}){{ end }}
  ORDER BY id
  LIMIT {{ .limit }}
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db = SqlxConnection::connect("sqlite::memory:").await?;
    let pool = db.pool().clone();
    for statement in [
        "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "INSERT INTO test (id, name) VALUES (1, 'test1'), (2, 'test2'), (3, 'test3')",
    ] {
        sqlx::query(statement).execute(&pool).await?;
    }

    let ctx = ExecutionContext::default();
    let LoadedCommand::Sql(command) = load_from_yaml(&ctx, LS_TEST).await? else {
        anyhow::bail!("expected a SQL command");
    };
    let command = command.with_connection_factory(connection_factory(move |_layers| {
        let pool = pool.clone();
        async move { Ok(Box::new(SqlxConnection::shared(pool)) as Box<dyn Connection>) }
    }));

    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(command))?;
    registry.register_alias(&CommandAlias::new("first-two", "ls-test").flag("ids", vec![1, 2]))?;

    println!("=== first-two ===");
    run(&registry, &ctx, "first-two", Invocation::new()).await?;

    println!("\n=== first-two --ids 3 ===");
    let invocation = Invocation::new().flag(DEFAULT_SLUG, "ids", vec![3]);
    run(&registry, &ctx, "first-two", invocation).await?;

    println!("\n=== ls-test --print-query ===");
    let invocation = Invocation::new().flag(SQL_HELPERS_SLUG, "print-query", true);
    run(&registry, &ctx, "ls-test", invocation).await?;

    Ok(())
}

async fn run(
    registry: &CommandRegistry,
    ctx: &ExecutionContext,
    name: &str,
    invocation: Invocation,
) -> anyhow::Result<()> {
    let command = registry
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("no command named {name}"))?;
    let parsed = command.parse_layers(ctx, &invocation).await?;
    let mut table = TableCollector::new();

    match command.run(ctx, &parsed, &mut table).await? {
        RunOutcome::Completed { query } => {
            println!("  query = {query}");
            println!("  columns = {:?}", table.columns());
            for row in table.rows() {
                let cells: Vec<String> = row.values().map(ToString::to_string).collect();
                println!("  {}", cells.join(" | "));
            }
        }
        // The query was already printed by the stdout service.
        RunOutcome::ExitWithoutProcessor { .. } => {}
    }
    Ok(())
}
