use super::connection::{Connection, QueryResult};
use crate::imports::*;
use crate::processor::{RowProcessor, TableMiddleware};
use futures::stream::StreamExt;

/*
    Types:
    * ResultSet - A fully fetched result: column names and every row
*/
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Runs `sql` and feeds every row to `processor`. The processor gets the result's column
/// order as a `ReorderColumns` middleware before any row, even for an empty result. It is
/// not closed here.
#[tracing::instrument(skip_all, fields(sql = %sql))]
pub async fn run_into_processor(
    ctx: &ExecutionContext,
    db: &dyn Connection,
    sql: &str,
    args: &[ScalarValue],
    processor: &mut dyn RowProcessor,
) -> Result<usize> {
    let QueryResult { columns, mut rows } = ctx.cancellable(db.query(sql, args)).await?;
    processor.add_table_middleware(TableMiddleware::ReorderColumns(columns));
    let mut count = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(SqlCommandError::Cancelled.into()),
            next = rows.next() => next,
        };
        let Some(row) = next else { break };
        let row = row.map_err(|e| {
            tracing::warn!(error = %e, "Query failed");
            e
        })?;
        processor
            .add_row(ctx, row)
            .await
            .context("processing row")?;
        count += 1;
    }
    tracing::debug!(rows = count, "Query finished");
    Ok(count)
}

/// Collects every row of `sql`, for helpers that substitute results into a template.
pub async fn fetch_all(
    ctx: &ExecutionContext,
    db: &dyn Connection,
    sql: &str,
    args: &[ScalarValue],
) -> Result<ResultSet> {
    let QueryResult { columns, mut rows } = ctx.cancellable(db.query(sql, args)).await?;
    let mut out = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(SqlCommandError::Cancelled.into()),
            next = rows.next() => next,
        };
        match next {
            Some(row) => out.push(row?),
            None => break,
        }
    }
    Ok(ResultSet { columns, rows: out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::TableCollector;
    use crate::sql::connection::SqlxConnection;
    use serde_json::json;

    async fn database() -> SqlxConnection {
        let conn = SqlxConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(conn.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO test (id, name) VALUES (1, 'test1'), (2, 'test2')")
            .execute(conn.pool())
            .await
            .unwrap();
        conn
    }

    #[tokio::test]
    async fn rows_reach_the_processor_in_order() {
        crate::test_utils::init_tracing();
        let ctx = ExecutionContext::default();
        let db = database().await;
        let mut collector = TableCollector::new();

        let count = run_into_processor(&ctx, &db, "SELECT name, id FROM test ORDER BY id", &[], &mut collector)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            collector.middlewares(),
            [TableMiddleware::ReorderColumns(vec!["name".into(), "id".into()])]
        );
        assert_eq!(collector.rows()[1].get("name"), Some(&json!("test2")));
    }

    #[tokio::test]
    async fn empty_results_still_carry_the_column_order() {
        let ctx = ExecutionContext::default();
        let db = database().await;
        let mut collector = TableCollector::new();
        let count = run_into_processor(&ctx, &db, "SELECT name, id FROM test WHERE id = ?", &[json!(9)], &mut collector)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            collector.middlewares(),
            [TableMiddleware::ReorderColumns(vec!["name".into(), "id".into()])]
        );
        assert_eq!(collector.columns(), ["name", "id"]);
    }

    #[tokio::test]
    async fn cancelled_context_stops_the_query() {
        let ctx = ExecutionContext::default();
        ctx.cancel();
        let db = database().await;
        let mut collector = TableCollector::new();
        let err = run_into_processor(&ctx, &db, "SELECT * FROM test", &[], &mut collector)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Cancelled));
        assert!(collector.rows().is_empty());
    }

    #[tokio::test]
    async fn fetch_all_collects_rows() {
        let ctx = ExecutionContext::default();
        let db = database().await;
        let result = fetch_all(&ctx, &db, "SELECT id FROM test ORDER BY id", &[]).await.unwrap();
        assert_eq!(result.columns, ["id"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get("id"), Some(&json!(1)));

        let empty = fetch_all(&ctx, &db, "SELECT id, name FROM test WHERE id = 9", &[]).await.unwrap();
        assert_eq!(empty.columns, ["id", "name"]);
        assert!(empty.rows.is_empty());
    }
}
