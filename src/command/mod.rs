use crate::imports::*;
use crate::processor::RowProcessor;

pub mod alias;
pub mod loader;
pub mod sql;
#[cfg(test)]
mod tests;

/*
    Types:
    * CommandDescription - A command's surface: help text, flags, positional arguments and layers
    * CommandDescriptionBuilder - Consuming builder; `build` checks names and argument ordering
    * Command - Anything runnable with parsed layers: SQL commands and resolved aliases
    * RunOutcome - How a run ended, with the query that was rendered for it
    * CommandMetadata - What `metadata` reports without executing anything
*/
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDescription {
    pub name: String,
    pub short: String,
    pub long: String,
    pub flags: Vec<ParameterDefinition>,
    pub arguments: Vec<ParameterDefinition>,
    /// Always starts with the `default` layer, which holds `flags` followed by `arguments`.
    pub layers: ParameterLayers,
    pub layout: Vec<ScalarValue>,
    pub command_type: Option<String>,
    pub tags: Vec<String>,
    pub metadata: ScalarMap,
    pub parents: Vec<String>,
    pub source: String,
}

impl CommandDescription {
    pub fn builder(name: impl Into<String>) -> CommandDescriptionBuilder {
        CommandDescriptionBuilder::new(name)
    }

    pub fn default_layer(&self) -> Option<&ParameterLayer> {
        self.layers.get(DEFAULT_SLUG)
    }

    /// Parent path followed by the command name.
    pub fn full_path(&self) -> Vec<String> {
        self.parents
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .chain(std::iter::once(self.name.clone()))
            .collect()
    }

    pub async fn check_defaults(&self, ctx: &ExecutionContext) -> Result<()> {
        for layer in &self.layers {
            layer
                .check_defaults(ctx)
                .await
                .with_context(|| format!("command '{}'", self.name))?;
        }
        Ok(())
    }

    /// Maps positional values onto the argument definitions in order. A trailing list argument
    /// takes every remaining value.
    pub fn bind_arguments(&self, values: &[ScalarValue]) -> Result<ScalarMap> {
        let mut bound = ScalarMap::new();
        let mut remaining = values;
        let last = self.arguments.len().saturating_sub(1);
        for (i, def) in self.arguments.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }
            if i == last && def.ty.is_list() {
                let value = match remaining {
                    [ScalarValue::Array(items)] => ScalarValue::Array(items.clone()),
                    rest => ScalarValue::Array(rest.to_vec()),
                };
                bound.insert(def.name.clone(), value);
                remaining = &[];
            } else {
                bound.insert(def.name.clone(), remaining[0].clone());
                remaining = &remaining[1..];
            }
        }
        if !remaining.is_empty() {
            return Err(SqlCommandError::TooManyArguments {
                expected: self.arguments.len(),
                got: values.len(),
            })
            .with_context(|| format!("command '{}'", self.name));
        }
        Ok(bound)
    }
}

#[derive(Debug, Clone)]
pub struct CommandDescriptionBuilder {
    description: CommandDescription,
    extra_layers: Vec<ParameterLayer>,
}

impl CommandDescriptionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            description: CommandDescription {
                name: name.into(),
                short: String::new(),
                long: String::new(),
                flags: Vec::new(),
                arguments: Vec::new(),
                layers: ParameterLayers::new(),
                layout: Vec::new(),
                command_type: None,
                tags: Vec::new(),
                metadata: ScalarMap::new(),
                parents: Vec::new(),
                source: String::new(),
            },
            extra_layers: Vec::new(),
        }
    }

    pub fn short(mut self, short: impl Into<String>) -> Self {
        self.description.short = short.into();
        self
    }

    pub fn long(mut self, long: impl Into<String>) -> Self {
        self.description.long = long.into();
        self
    }

    pub fn flag(mut self, flag: ParameterDefinition) -> Self {
        self.description.flags.push(flag);
        self
    }

    pub fn flags(mut self, flags: impl IntoIterator<Item = ParameterDefinition>) -> Self {
        self.description.flags.extend(flags);
        self
    }

    pub fn argument(mut self, argument: ParameterDefinition) -> Self {
        self.description.arguments.push(argument);
        self
    }

    pub fn arguments(mut self, arguments: impl IntoIterator<Item = ParameterDefinition>) -> Self {
        self.description.arguments.extend(arguments);
        self
    }

    pub fn layer(mut self, layer: ParameterLayer) -> Self {
        self.extra_layers.push(layer);
        self
    }

    pub fn layout(mut self, layout: Vec<ScalarValue>) -> Self {
        self.description.layout = layout;
        self
    }

    pub fn command_type(mut self, command_type: impl Into<String>) -> Self {
        self.description.command_type = Some(command_type.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.description.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn metadata(mut self, metadata: ScalarMap) -> Self {
        self.description.metadata = metadata;
        self
    }

    pub fn parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.description.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.description.source = source.into();
        self
    }

    pub fn build(self) -> Result<CommandDescription> {
        let mut description = self.description;
        DEFAULT_NAME_POLICY.validate(&description.name, "command")?;
        validate_argument_order(&description.arguments)
            .with_context(|| format!("command '{}'", description.name))?;

        let default_layer = ParameterLayer::new(DEFAULT_SLUG, "Flags")
            .definitions(description.flags.iter().cloned())
            .definitions(description.arguments.iter().cloned());
        default_layer
            .validate()
            .with_context(|| format!("command '{}'", description.name))?;

        let mut layers = ParameterLayers::new();
        layers.push(default_layer)?;
        for layer in self.extra_layers {
            layer.validate()?;
            layers
                .push(layer)
                .with_context(|| format!("command '{}'", description.name))?;
        }
        description.layers = layers;
        tracing::debug!(command = %description.name, layers = ?description.layers.slugs(), "Built command description");
        Ok(description)
    }
}

// Required after optional is ambiguous, and only the last argument can absorb a list.
fn validate_argument_order(arguments: &[ParameterDefinition]) -> Result<()> {
    let mut optional_seen: Option<&str> = None;
    for (i, def) in arguments.iter().enumerate() {
        if def.ty.is_list() && i + 1 != arguments.len() {
            return Err(SqlCommandError::InvalidDescriptor(format!(
                "list argument '{}' must be the last argument",
                def.name
            ))
            .into());
        }
        match optional_seen {
            Some(optional) if !def.is_optional() => {
                return Err(SqlCommandError::InvalidDescriptor(format!(
                    "required argument '{}' follows optional argument '{}'",
                    def.name, optional
                ))
                .into());
            }
            None if def.is_optional() => optional_seen = Some(&def.name),
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Rows were streamed into the processor.
    Completed { query: String },
    /// `print-query` was set: the query went to the output services and nothing ran.
    ExitWithoutProcessor { query: String },
}

impl RunOutcome {
    pub fn query(&self) -> &str {
        match self {
            RunOutcome::Completed { query } | RunOutcome::ExitWithoutProcessor { query } => query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommandMetadata {
    pub query: String,
}

#[async_trait]
pub trait Command: Send + Sync {
    fn description(&self) -> &CommandDescription;

    /// Values injected under the `alias` source before caller values.
    fn presets(&self) -> Option<LayerValues> {
        None
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        parsed: &ParsedLayers,
        processor: &mut dyn RowProcessor,
    ) -> Result<RunOutcome>;

    async fn metadata(&self, ctx: &ExecutionContext, parsed: &ParsedLayers) -> Result<CommandMetadata>;

    /// Runs the canonical middleware chain for `invocation` over this command's layers.
    async fn parse_layers(&self, ctx: &ExecutionContext, invocation: &Invocation) -> Result<ParsedLayers> {
        let description = self.description();
        let chain = invocation.chain(description, self.presets())?;
        chain
            .execute(ctx, &description.layers)
            .await
            .with_context(|| format!("parsing parameters for '{}'", description.name))
    }
}
