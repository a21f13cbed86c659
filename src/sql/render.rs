use super::connection::Connection;
use super::executor::{ResultSet, fetch_all};
use super::helpers::{SQL_HELPER_NAMES, call_sql_helper};
use crate::imports::*;
use crate::template::builtins::{Builtins, call_builtin};
use crate::template::{Functions, Template};
use regex::Regex;

/// Sub-queries may call helpers that render further sub-queries, up to this depth.
pub const MAX_NESTING: usize = 32;

pub const DB_HELPER_NAMES: &[&str] = &["sqlColumn", "sqlSingle", "sqlSlice", "sqlMap"];

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

/// Collapses every whitespace run to one space and trims the ends.
pub fn clean_query(query: &str) -> String {
    WHITESPACE_RUN.replace_all(query, " ").trim().to_string()
}

/// Renders `template` against `params`. Database helpers run their sub-queries on `db`, in
/// template order. Failures come back as `Render`, except cancellation which stays `Cancelled`.
#[tracing::instrument(skip_all, fields(has_db = db.is_some()))]
pub async fn render_query(
    ctx: &ExecutionContext,
    db: Option<&dyn Connection>,
    template: &str,
    sub_queries: &BTreeMap<String, String>,
    params: &ScalarMap,
) -> Result<String> {
    let functions = SqlFunctions {
        ctx,
        db,
        sub_queries,
        params: params.clone(),
        depth: 0,
    };
    match functions.render(template).await {
        Ok(query) => {
            tracing::debug!(query = %query, "Rendered query");
            Ok(query)
        }
        Err(e) if is_cancelled(&e) => Err(e),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "Could not render query");
            Err(SqlCommandError::Render(e).into())
        }
    }
}

// Helper table for one render: built-ins, quoting helpers and the database helpers
// bound to this render's connection and parameters.
struct SqlFunctions<'a> {
    ctx: &'a ExecutionContext,
    db: Option<&'a dyn Connection>,
    sub_queries: &'a BTreeMap<String, String>,
    params: ScalarMap,
    depth: usize,
}

impl<'a> SqlFunctions<'a> {
    async fn render(&self, template: &str) -> Result<String> {
        let parsed = Template::parse(format!("query/{}", self.depth), template)?;
        let data = ScalarValue::Object(self.params.clone());
        let rendered = parsed.execute(&data, self).await?;
        Ok(clean_query(&rendered))
    }

    async fn run_helper(&self, name: &str, args: Vec<ScalarValue>) -> Result<ScalarValue> {
        let db = self
            .db
            .ok_or_else(|| anyhow::anyhow!("{} needs a database connection", name))?;
        let (template, overrides) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("{} needs a query template", name))?;
        let template = template.as_str_or_err("query")?;
        if overrides.len() % 2 != 0 {
            return Err(anyhow::anyhow!(
                "{} expects key/value pairs after the query, got {} values",
                name,
                overrides.len()
            ));
        }
        if self.depth + 1 > MAX_NESTING {
            return Err(anyhow::anyhow!(
                "sub-queries nested deeper than {} levels",
                MAX_NESTING
            ));
        }

        let mut params = self.params.clone();
        for pair in overrides.chunks(2) {
            let key = match &pair[0] {
                ScalarValue::String(key) => key.clone(),
                other => format_value(other),
            };
            params.insert(key, pair[1].clone());
        }
        let nested = SqlFunctions {
            ctx: self.ctx,
            db: self.db,
            sub_queries: self.sub_queries,
            params,
            depth: self.depth + 1,
        };
        let sql = nested
            .render(template)
            .await
            .with_context(|| format!("rendering sub-query for {name}"))?;
        tracing::debug!(helper = name, depth = nested.depth, sql = %sql, "Running sub-query");
        let result = fetch_all(self.ctx, db, &sql, &[]).await?;
        collect_rows(name, result)
    }

    fn sub_query(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        let name = match args {
            [name] => name.as_str_or_err("name")?,
            _ => return Err(anyhow::anyhow!("subQuery takes exactly one name")),
        };
        self.sub_queries
            .get(name)
            .map(|text| ScalarValue::String(text.clone()))
            .ok_or_else(|| anyhow::anyhow!("sub-query '{}' not found", name))
    }
}

#[async_trait]
impl Functions for SqlFunctions<'_> {
    fn has(&self, name: &str) -> bool {
        name == "subQuery"
            || DB_HELPER_NAMES.contains(&name)
            || SQL_HELPER_NAMES.contains(&name)
            || Builtins.has(name)
    }

    async fn call(&self, name: &str, args: Vec<ScalarValue>) -> Result<ScalarValue> {
        if self.ctx.is_cancelled() {
            return Err(SqlCommandError::Cancelled.into());
        }
        match name {
            "subQuery" => self.sub_query(&args),
            _ if DB_HELPER_NAMES.contains(&name) => self.run_helper(name, args).await,
            _ if SQL_HELPER_NAMES.contains(&name) => call_sql_helper(name, &args),
            _ => call_builtin(name, &args),
        }
    }
}

// Column counts come from the result's columns, so they hold for empty results and
// repeated column names alike.
fn collect_rows(helper: &str, result: ResultSet) -> Result<ScalarValue> {
    let ResultSet { columns, rows } = result;
    match helper {
        "sqlColumn" => {
            if columns.len() != 1 {
                return Err(anyhow::anyhow!("sqlColumn expects 1 column, got {}", columns.len()));
            }
            Ok(ScalarValue::Array(rows.into_iter().flat_map(Row::into_values).collect()))
        }
        "sqlSingle" => {
            if columns.len() != 1 {
                return Err(anyhow::anyhow!("sqlSingle expects 1 column, got {}", columns.len()));
            }
            if rows.len() != 1 {
                return Err(anyhow::anyhow!("sqlSingle expects 1 row, got {}", rows.len()));
            }
            Ok(rows
                .into_iter()
                .flat_map(Row::into_values)
                .next()
                .unwrap_or(ScalarValue::Null))
        }
        "sqlSlice" => Ok(ScalarValue::Array(
            rows.into_iter()
                .map(|row| ScalarValue::Array(row.into_values()))
                .collect(),
        )),
        _ => Ok(ScalarValue::Array(
            rows.into_iter()
                .map(|row| ScalarValue::Object(row.into_object()))
                .collect(),
        )),
    }
}
