use super::alias::{CommandAlias, CommandRegistry};
use super::loader::{LoadedCommand, load_from_yaml};
use super::sql::SqlCommand;
use super::{Command, CommandDescription, RunOutcome};
use crate::imports::*;
use crate::processor::TableCollector;
use crate::services::io::CapturedOutput;
use crate::sql::connection::{
    Connection, ConnectionFactory, QueryResult, SqlxConnection, connection_factory,
};
use serde_json::json;
use sqlx::AnyPool;

const FIXTURE: [&str; 4] = [
    "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "INSERT INTO test (id, name) VALUES (1, 'test1'), (2, 'test2'), (3, 'test3')",
    "CREATE TABLE test2 (id INTEGER PRIMARY KEY, test_id INTEGER NOT NULL, name TEXT NOT NULL)",
    "INSERT INTO test2 (id, test_id, name) VALUES (1, 1, 'test1_1'), (2, 1, 'test1_2'), (3, 2, 'test2_3')",
];

async fn fixture_pool() -> AnyPool {
    let db = SqlxConnection::connect("sqlite::memory:").await.unwrap();
    let pool = db.pool().clone();
    for statement in FIXTURE {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool
}

// Every run gets a handle on the same in-memory database.
fn shared_factory(pool: AnyPool) -> ConnectionFactory {
    connection_factory(move |_layers| {
        let pool = pool.clone();
        async move { Ok(Box::new(SqlxConnection::shared(pool)) as Box<dyn Connection>) }
    })
}

async fn command(flags: Vec<ParameterDefinition>, query: &str) -> SqlCommand {
    let description = CommandDescription::builder("test-query")
        .short("Test query")
        .flags(flags)
        .build()
        .unwrap();
    SqlCommand::new(description)
        .with_query(query)
        .with_connection_factory(shared_factory(fixture_pool().await))
}

async fn run(
    command: &dyn Command,
    ctx: &ExecutionContext,
    invocation: Invocation,
) -> (Result<RunOutcome>, TableCollector) {
    let parsed = command.parse_layers(ctx, &invocation).await.unwrap();
    let mut collector = TableCollector::new();
    let outcome = command.run(ctx, &parsed, &mut collector).await;
    (outcome, collector)
}

fn values(collector: &TableCollector) -> Vec<Vec<ScalarValue>> {
    collector
        .rows()
        .iter()
        .map(|row| row.values().cloned().collect())
        .collect()
}

fn string_flag(name: &str) -> ParameterDefinition {
    ParameterDefinition::new(name, ParameterType::String)
}

#[tokio::test]
async fn plain_select_streams_every_row() {
    crate::test_utils::init_tracing();
    let ctx = ExecutionContext::default();
    let command = command(vec![], "SELECT * FROM test").await;

    let (outcome, collector) = run(&command, &ctx, Invocation::new()).await;
    assert_eq!(
        outcome.unwrap(),
        RunOutcome::Completed {
            query: "SELECT * FROM test".to_string()
        }
    );
    assert!(collector.is_closed());
    assert_eq!(collector.columns(), ["id", "name"]);
    assert_eq!(
        values(&collector),
        [
            vec![json!(1), json!("test1")],
            vec![json!(2), json!("test2")],
            vec![json!(3), json!("test3")],
        ]
    );
}

#[tokio::test]
async fn parameters_reach_the_template() {
    let ctx = ExecutionContext::default();
    let command = command(vec![string_flag("table").required()], "SELECT * FROM {{.table}}").await;

    let invocation = Invocation::new().flag(DEFAULT_SLUG, "table", "test");
    let (outcome, collector) = run(&command, &ctx, invocation).await;
    assert_eq!(outcome.unwrap().query(), "SELECT * FROM test");
    assert_eq!(collector.rows().len(), 3);
}

#[tokio::test]
async fn command_flags_win_over_builtin_namesakes() {
    let ctx = ExecutionContext::default();
    let command = command(
        vec![string_flag("user"), string_flag("output").default_value("csv")],
        "SELECT {{ .user | sqlString }} AS u, {{ .output | sqlString }} AS o",
    )
    .await;

    let invocation = Invocation::new().flag(DEFAULT_SLUG, "user", "alice");
    let (outcome, collector) = run(&command, &ctx, invocation).await;
    assert_eq!(outcome.unwrap().query(), "SELECT 'alice' AS u, 'csv' AS o");
    assert_eq!(values(&collector), [vec![json!("alice"), json!("csv")]]);
}

#[tokio::test]
async fn empty_results_still_name_their_columns() {
    let ctx = ExecutionContext::default();
    let command = command(vec![], "SELECT name, id FROM test WHERE id = 99").await;

    let (outcome, collector) = run(&command, &ctx, Invocation::new()).await;
    outcome.unwrap();
    assert!(collector.is_closed());
    assert!(collector.rows().is_empty());
    assert_eq!(collector.columns(), ["name", "id"]);
}

#[tokio::test]
async fn column_helper_feeds_an_in_list() {
    let ctx = ExecutionContext::default();
    let command = command(
        vec![string_flag("name")],
        r#"SELECT * FROM test WHERE id IN (
            {{ sqlColumn "SELECT test_id FROM test2 WHERE name = {{.name | sqlString }}" | sqlIntIn }}
        )"#,
    )
    .await;

    let invocation = Invocation::new().flag(DEFAULT_SLUG, "name", "test2_3");
    let (outcome, collector) = run(&command, &ctx, invocation).await;
    assert_eq!(outcome.unwrap().query(), "SELECT * FROM test WHERE id IN ( 2 )");
    assert_eq!(values(&collector), [vec![json!(2), json!("test2")]]);
}

#[tokio::test]
async fn single_helper_rejects_many_rows() {
    let ctx = ExecutionContext::default();
    let command = command(
        vec![],
        r#"SELECT * FROM test WHERE id = {{ sqlSingle "SELECT test_id FROM test2" }}"#,
    )
    .await;

    let (outcome, collector) = run(&command, &ctx, Invocation::new()).await;
    let err = outcome.unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Render));
    assert!(collector.is_closed());
    assert!(collector.rows().is_empty());
}

#[tokio::test]
async fn sub_queries_take_extra_parameters() {
    let ctx = ExecutionContext::default();
    let command = command(
        vec![string_flag("name")],
        r#"SELECT * FROM test WHERE id IN ( {{ sqlColumn (subQuery "t2") "test2_id" 2 | sqlIntIn }} )"#,
    )
    .await
    .with_sub_query(
        "t2",
        "SELECT test_id FROM test2 WHERE name = {{.name | sqlString }} AND id = {{.test2_id}}",
    );

    let invocation = Invocation::new().flag(DEFAULT_SLUG, "name", "test1_2");
    let (outcome, collector) = run(&command, &ctx, invocation).await;
    assert_eq!(outcome.unwrap().query(), "SELECT * FROM test WHERE id IN ( 1 )");
    assert_eq!(values(&collector), [vec![json!(1), json!("test1")]]);
}

#[tokio::test]
async fn print_query_skips_execution() {
    let output = CapturedOutput::new();
    let ctx = ExecutionContext::new(CommandServices::new().with_io(output.clone()));
    let command = command(vec![string_flag("table")], "SELECT *\n  FROM {{ .table }}").await;

    let invocation = Invocation::new()
        .flag(DEFAULT_SLUG, "table", "test")
        .flag(SQL_HELPERS_SLUG, "print-query", true);
    let (outcome, collector) = run(&command, &ctx, invocation).await;
    assert_eq!(
        outcome.unwrap(),
        RunOutcome::ExitWithoutProcessor {
            query: "SELECT * FROM test".to_string()
        }
    );
    assert_eq!(output.messages().await, ["SELECT * FROM test"]);
    assert!(collector.is_closed());
    assert!(collector.rows().is_empty());
}

#[tokio::test]
async fn slice_and_map_helpers_iterate_rows() {
    let ctx = ExecutionContext::default();
    let slices = command(
        vec![],
        r#"SELECT {{ range sqlSlice "SELECT id, test_id FROM test2 ORDER BY id" }}{{- index . 1 -}} +{{ end }}0 AS total"#,
    )
    .await;
    let (outcome, collector) = run(&slices, &ctx, Invocation::new()).await;
    assert_eq!(outcome.unwrap().query(), "SELECT 1+1+2+0 AS total");
    assert_eq!(values(&collector), [vec![json!(4)]]);

    let maps = command(
        vec![],
        r#"SELECT name FROM test WHERE name IN ({{ range $i, $row := sqlMap "SELECT name FROM test2 WHERE test_id = 1 ORDER BY id" }}{{ if $i }}, {{ end }}{{ $row.name | sqlString }}{{ end }})"#,
    )
    .await;
    let (outcome, collector) = run(&maps, &ctx, Invocation::new()).await;
    assert_eq!(
        outcome.unwrap().query(),
        "SELECT name FROM test WHERE name IN ('test1_1', 'test1_2')"
    );
    assert!(collector.rows().is_empty());
}

// Records the statements it receives and answers each with one row.
#[derive(Clone, Default)]
struct RecordingConnection {
    statements: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn query<'a>(&'a self, sql: &'a str, _args: &'a [ScalarValue]) -> Result<QueryResult<'a>> {
        self.statements.lock().unwrap().push(sql.to_string());
        let row: Row = [("plan".to_string(), json!("SCAN test"))].into_iter().collect();
        Ok(QueryResult::new(
            vec!["plan".to_string()],
            Box::pin(futures::stream::iter([Ok(row)])),
        ))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn explain_prefixes_the_query() {
    let ctx = ExecutionContext::default();
    let recorder = RecordingConnection::default();
    let factory = {
        let recorder = recorder.clone();
        connection_factory(move |_layers| {
            let recorder = recorder.clone();
            async move { Ok(Box::new(recorder) as Box<dyn Connection>) }
        })
    };
    let description = CommandDescription::builder("explained")
        .short("Explained query")
        .build()
        .unwrap();
    let command = SqlCommand::new(description)
        .with_query("SELECT * FROM test")
        .with_connection_factory(factory);

    let invocation = Invocation::new().flag(SQL_HELPERS_SLUG, "explain", true);
    let (outcome, collector) = run(&command, &ctx, invocation).await;
    assert_eq!(outcome.unwrap().query(), "EXPLAIN SELECT * FROM test");
    assert_eq!(*recorder.statements.lock().unwrap(), ["EXPLAIN SELECT * FROM test"]);
    assert_eq!(values(&collector), [vec![json!("SCAN test")]]);
}

#[tokio::test]
async fn metadata_renders_without_running() {
    let ctx = ExecutionContext::default();
    let command = command(
        vec![string_flag("name")],
        r#"SELECT * FROM test WHERE id IN ({{ sqlColumn "SELECT test_id FROM test2 WHERE name = {{ .name | sqlString }}" | sqlIntIn }})"#,
    )
    .await;
    let parsed = command
        .parse_layers(&ctx, &Invocation::new().flag(DEFAULT_SLUG, "name", "test1_1"))
        .await
        .unwrap();
    let metadata = command.metadata(&ctx, &parsed).await.unwrap();
    assert_eq!(metadata.query, "SELECT * FROM test WHERE id IN (1)");
}

#[tokio::test]
async fn missing_factory_still_closes_the_processor() {
    let ctx = ExecutionContext::default();
    let description = CommandDescription::builder("orphan")
        .short("No database")
        .build()
        .unwrap();
    let command = SqlCommand::new(description).with_query("SELECT 1");

    let (outcome, collector) = run(&command, &ctx, Invocation::new()).await;
    assert_eq!(error_kind(&outcome.unwrap_err()), Some(ErrorKind::NoFactory));
    assert!(collector.is_closed());
}

#[tokio::test]
async fn failing_queries_surface_as_execution_errors() {
    let ctx = ExecutionContext::default();
    let command = command(vec![], "SELECT * FROM missing_table").await;
    let (outcome, collector) = run(&command, &ctx, Invocation::new()).await;
    assert_eq!(error_kind(&outcome.unwrap_err()), Some(ErrorKind::Execution));
    assert!(collector.is_closed());
}

#[tokio::test]
async fn cancelled_runs_stop_early() {
    let ctx = ExecutionContext::default();
    let command = command(vec![], "SELECT * FROM test").await;
    let parsed = command.parse_layers(&ctx, &Invocation::new()).await.unwrap();

    ctx.cancel();
    let mut collector = TableCollector::new();
    let err = command.run(&ctx, &parsed, &mut collector).await.unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Cancelled));
    assert!(collector.rows().is_empty());
}

#[tokio::test]
async fn loaded_commands_and_aliases_run_through_the_registry() {
    let ctx = ExecutionContext::default();
    let yaml = r#"
name: ls-test
short: List test rows
flags:
  - name: ids
    type: intList
  - name: limit
    type: int
    default: 10
query: |
  SELECT * FROM test
  {{ if .ids }}WHERE id IN ({{ .ids | sqlIntIn }}){{ end }}
  ORDER BY id LIMIT {{ .limit }}
"#;
    let LoadedCommand::Sql(loaded) = load_from_yaml(&ctx, yaml).await.unwrap() else {
        panic!("expected a command");
    };
    let loaded = loaded.with_connection_factory(shared_factory(fixture_pool().await));

    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(loaded)).unwrap();
    registry
        .register_alias(&CommandAlias::new("first-two", "ls-test").flag("ids", json!([1, 2])))
        .unwrap();

    let alias = registry.get("first-two").unwrap();
    let (outcome, collector) = run(alias.as_ref(), &ctx, Invocation::new()).await;
    assert_eq!(
        outcome.unwrap().query(),
        "SELECT * FROM test WHERE id IN (1,2) ORDER BY id LIMIT 10"
    );
    assert_eq!(collector.rows().len(), 2);

    // Caller flags win over alias presets.
    let invocation = Invocation::new().flag(DEFAULT_SLUG, "ids", json!([3]));
    let (outcome, collector) = run(alias.as_ref(), &ctx, invocation).await;
    assert_eq!(
        outcome.unwrap().query(),
        "SELECT * FROM test WHERE id IN (3) ORDER BY id LIMIT 10"
    );
    assert_eq!(values(&collector), [vec![json!(3), json!("test3")]]);
}
