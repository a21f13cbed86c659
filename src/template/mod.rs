use crate::imports::*;

pub mod builtins;
mod eval;
mod parser;

/*
    Text templates in the {{ ... }} dialect used by query descriptors:
    pipelines, variables, if/else/range/with blocks, trim markers and comments.

    Types:
    * Template - A parsed template, executed against a data value and a function table
    * Functions - The function table a template calls into; async so helpers can hit a database
*/
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<parser::Node>,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let nodes =
            parser::parse(source).with_context(|| format!("parsing template '{name}'"))?;
        Ok(Self { name, nodes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn execute(&self, data: &ScalarValue, functions: &dyn Functions) -> Result<String> {
        eval::Evaluator::new(functions, data)
            .run(&self.nodes)
            .await
            .with_context(|| format!("executing template '{}'", self.name))
    }
}

#[async_trait]
pub trait Functions: Send + Sync {
    fn has(&self, name: &str) -> bool;
    async fn call(&self, name: &str, args: Vec<ScalarValue>) -> Result<ScalarValue>;
}

/// Parses and executes `source` with the built-in functions only.
pub async fn render(source: &str, data: &ScalarValue) -> Result<String> {
    Template::parse("inline", source)?
        .execute(data, &builtins::Builtins)
        .await
}
