use crate::imports::*;

/*
    Types:
    * RowProcessor - Where query results go: table middlewares first, then rows, then close
    * TableMiddleware - Transformations a processor applies to the whole table
    * TableCollector - In-memory processor, keeps every row
*/
#[async_trait]
pub trait RowProcessor: Send {
    fn add_table_middleware(&mut self, middleware: TableMiddleware);
    async fn add_row(&mut self, ctx: &ExecutionContext, row: Row) -> Result<()>;
    async fn close(&mut self, ctx: &ExecutionContext) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableMiddleware {
    /// Puts the listed columns first, in this order.
    ReorderColumns(Vec<String>),
}

impl TableMiddleware {
    pub fn apply(&self, rows: &mut [Row]) {
        match self {
            TableMiddleware::ReorderColumns(order) => {
                for row in rows.iter_mut() {
                    row.reorder(order);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct TableCollector {
    middlewares: Vec<TableMiddleware>,
    rows: Vec<Row>,
    closed: bool,
}

impl TableCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn middlewares(&self) -> &[TableMiddleware] {
        &self.middlewares
    }

    /// Column order of the table: the last reorder requested, otherwise the first row's.
    pub fn columns(&self) -> Vec<String> {
        let reordered = self.middlewares.iter().rev().find_map(|m| match m {
            TableMiddleware::ReorderColumns(order) => Some(order.clone()),
        });
        reordered.unwrap_or_else(|| {
            self.rows
                .first()
                .map(|row| row.columns().map(str::to_string).collect())
                .unwrap_or_default()
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl RowProcessor for TableCollector {
    fn add_table_middleware(&mut self, middleware: TableMiddleware) {
        self.middlewares.push(middleware);
    }

    async fn add_row(&mut self, _ctx: &ExecutionContext, row: Row) -> Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!("row added after the table was closed"));
        }
        self.rows.push(row);
        Ok(())
    }

    async fn close(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for middleware in &self.middlewares {
            middleware.apply(&mut self.rows);
        }
        self.closed = true;
        tracing::debug!(rows = self.rows.len(), "Table closed");
        Ok(())
    }
}
