use super::{Command, CommandDescription, CommandMetadata, RunOutcome};
use crate::imports::*;
use crate::processor::RowProcessor;
use crate::sql::connection::{Connection, ConnectionFactory};
use crate::sql::executor::run_into_processor;
use crate::sql::render::render_query;
use serde::Deserialize;

/*
    Types:
    * SqlCommand - A command description plus a query template, its named sub-queries and the
      factory that opens a connection for each run
    * SqlHelpersSettings - The sql-helpers layer as a record
*/
#[derive(Clone)]
pub struct SqlCommand {
    description: CommandDescription,
    query: String,
    sub_queries: BTreeMap<String, String>,
    factory: Option<ConnectionFactory>,
}

impl std::fmt::Debug for SqlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCommand")
            .field("name", &self.description.name)
            .field("query", &self.query)
            .field("sub_queries", &self.sub_queries)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SqlHelpersSettings {
    pub print_query: bool,
    pub explain: bool,
}

impl SqlCommand {
    /// Wraps `description`, appending the sql-helpers, sql-connection, dbt and glazed layers
    /// unless the description already declares them.
    pub fn new(mut description: CommandDescription) -> Self {
        description.layers.push_missing(builtin::sql_helpers());
        description.layers.push_missing(builtin::sql_connection());
        description.layers.push_missing(builtin::dbt());
        description.layers.push_missing(builtin::glazed());
        Self {
            description,
            query: String::new(),
            sub_queries: BTreeMap::new(),
            factory: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_sub_query(mut self, name: impl Into<String>, query: impl Into<String>) -> Self {
        self.sub_queries.insert(name.into(), query.into());
        self
    }

    pub fn with_sub_queries(mut self, sub_queries: BTreeMap<String, String>) -> Self {
        self.sub_queries = sub_queries;
        self
    }

    pub fn with_connection_factory(mut self, factory: ConnectionFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn sub_queries(&self) -> &BTreeMap<String, String> {
        &self.sub_queries
    }

    /// A command needs a name, a short description and a query.
    pub fn is_valid(&self) -> bool {
        !self.description.name.is_empty()
            && !self.description.short.is_empty()
            && !self.query.is_empty()
    }

    /// Renders the query against already flattened parameters.
    pub async fn render_query(
        &self,
        ctx: &ExecutionContext,
        db: Option<&dyn Connection>,
        params: &ScalarMap,
    ) -> Result<String> {
        render_query(ctx, db, &self.query, &self.sub_queries, params)
            .await
            .with_context(|| format!("command '{}'", self.description.name))
    }

    async fn connect(&self, ctx: &ExecutionContext, parsed: &ParsedLayers) -> Result<Box<dyn Connection>> {
        let factory = self.factory.as_ref().ok_or(SqlCommandError::NoFactory)?;
        let db = ctx.cancellable(factory(parsed)).await?;
        if let Err(e) = ctx.cancellable(db.ping()).await {
            let _ = db.close().await;
            if is_cancelled(&e) {
                return Err(e);
            }
            tracing::warn!(command = %self.description.name, error = %e, "Could not ping database");
            return Err(match error_kind(&e) {
                Some(ErrorKind::ConnectionUnreachable) => e,
                _ => SqlCommandError::ConnectionUnreachable(format!("{e:#}")).into(),
            });
        }
        Ok(db)
    }

    // Steps between a live connection and the rows reaching the processor.
    async fn run_with(
        &self,
        ctx: &ExecutionContext,
        db: &dyn Connection,
        parsed: &ParsedLayers,
        processor: &mut dyn RowProcessor,
    ) -> Result<RunOutcome> {
        let settings: SqlHelpersSettings = parsed.initialize_struct(SQL_HELPERS_SLUG)?;
        let query = self.render_query(ctx, Some(db), &parsed.get_data_map()).await?;

        if settings.print_query {
            ctx.services().notify(&query).await?;
            return Ok(RunOutcome::ExitWithoutProcessor { query });
        }

        let query = if settings.explain {
            format!("EXPLAIN {query}")
        } else {
            query
        };
        let rows = run_into_processor(ctx, db, &query, &[], processor).await?;
        tracing::debug!(command = %self.description.name, rows, "Command finished");
        Ok(RunOutcome::Completed { query })
    }
}

#[async_trait]
impl Command for SqlCommand {
    fn description(&self) -> &CommandDescription {
        &self.description
    }

    #[tracing::instrument(skip_all, fields(command = %self.description.name))]
    async fn run(
        &self,
        ctx: &ExecutionContext,
        parsed: &ParsedLayers,
        processor: &mut dyn RowProcessor,
    ) -> Result<RunOutcome> {
        let outcome = match self.connect(ctx, parsed).await {
            Ok(db) => {
                let outcome = self.run_with(ctx, db.as_ref(), parsed, processor).await;
                let closed = db.close().await;
                outcome.and_then(|outcome| closed.map(|_| outcome))
            }
            Err(e) => Err(e),
        };
        // The processor is closed whatever happened; the run's own error wins over a close error.
        let closed = processor.close(ctx).await;
        let outcome = outcome?;
        closed?;
        Ok(outcome)
    }

    async fn metadata(&self, ctx: &ExecutionContext, parsed: &ParsedLayers) -> Result<CommandMetadata> {
        let db = self.connect(ctx, parsed).await?;
        let query = self
            .render_query(ctx, Some(db.as_ref()), &parsed.get_data_map())
            .await;
        db.close().await?;
        Ok(CommandMetadata { query: query? })
    }
}
