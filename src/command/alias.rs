use super::{Command, CommandDescription, CommandMetadata, RunOutcome};
use crate::imports::*;
use crate::processor::RowProcessor;
use serde::{Deserialize, Serialize};

/*
    Types:
    * CommandAlias - A named shortcut to another command with preset flag and argument values
    * ResolvedAlias - An alias bound to its target; runs as the target with the presets applied
    * CommandRegistry - Commands by name; aliases are resolved when they are registered
*/
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandAlias {
    pub name: String,
    #[serde(rename = "aliasFor")]
    pub alias_for: String,
    #[serde(default, skip_serializing_if = "ScalarMap::is_empty")]
    pub flags: ScalarMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ScalarValue>,
    #[serde(skip)]
    pub parents: Vec<String>,
    #[serde(skip)]
    pub source: String,
}

impl CommandAlias {
    pub fn new(name: impl Into<String>, alias_for: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias_for: alias_for.into(),
            ..Self::default()
        }
    }

    pub fn flag(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }

    pub fn argument(mut self, value: impl Into<ScalarValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.alias_for.is_empty()
    }

    /// Binds the alias to `target`. Every preset must name a parameter the target declares.
    pub fn resolve(&self, target: Arc<dyn Command>) -> Result<ResolvedAlias> {
        let target_description = target.description();
        let mut presets = LayerValues::new();
        for (name, value) in &self.flags {
            let slug = target_description
                .layers
                .iter()
                .find(|layer| layer.get(name).is_some())
                .map(|layer| layer.slug.clone())
                .ok_or_else(|| SqlCommandError::UnknownParameter {
                    layer: DEFAULT_SLUG.to_string(),
                    name: name.clone(),
                })
                .with_context(|| format!("alias '{}'", self.name))?;
            presets
                .entry(slug)
                .or_default()
                .insert(name.clone(), value.clone());
        }
        if !self.arguments.is_empty() {
            let bound = target_description
                .bind_arguments(&self.arguments)
                .with_context(|| format!("alias '{}'", self.name))?;
            presets.entry(DEFAULT_SLUG.to_string()).or_default().extend(bound);
        }

        let description = alias_surface(target_description, self, &presets);
        tracing::debug!(alias = %self.name, target = %self.alias_for, "Resolved alias");
        Ok(ResolvedAlias {
            description,
            presets,
            target,
        })
    }
}

// The target's description under the alias name: presets become defaults and the
// flags and arguments stop being required.
fn alias_surface(
    target: &CommandDescription,
    alias: &CommandAlias,
    presets: &LayerValues,
) -> CommandDescription {
    let mut description = target.clone();
    description.name = alias.name.clone();
    description.parents = alias.parents.clone();
    description.source = alias.source.clone();

    let default_presets = presets.get(DEFAULT_SLUG);
    for def in description.flags.iter_mut().chain(description.arguments.iter_mut()) {
        def.required = false;
        if let Some(value) = default_presets.and_then(|p| p.get(&def.name)) {
            def.default = Some(value.clone());
        }
    }
    let slugs: Vec<String> = description.layers.slugs().into_iter().map(str::to_string).collect();
    for slug in slugs {
        let Some(layer) = description.layers.get_mut(&slug) else {
            continue;
        };
        let layer_presets = presets.get(&slug);
        for def in layer.definitions.iter_mut() {
            if slug == DEFAULT_SLUG {
                def.required = false;
            }
            if let Some(value) = layer_presets.and_then(|p| p.get(&def.name)) {
                def.default = Some(value.clone());
            }
        }
    }
    description
}

#[derive(Clone)]
pub struct ResolvedAlias {
    description: CommandDescription,
    presets: LayerValues,
    target: Arc<dyn Command>,
}

impl ResolvedAlias {
    pub fn target(&self) -> &Arc<dyn Command> {
        &self.target
    }
}

#[async_trait]
impl Command for ResolvedAlias {
    fn description(&self) -> &CommandDescription {
        &self.description
    }

    fn presets(&self) -> Option<LayerValues> {
        Some(self.presets.clone())
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        parsed: &ParsedLayers,
        processor: &mut dyn RowProcessor,
    ) -> Result<RunOutcome> {
        self.target.run(ctx, parsed, processor).await
    }

    async fn metadata(&self, ctx: &ExecutionContext, parsed: &ParsedLayers) -> Result<CommandMetadata> {
        self.target.metadata(ctx, parsed).await
    }
}

#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let name = command.description().name.clone();
        if self.commands.contains_key(&name) {
            return Err(SqlCommandError::InvalidDescriptor(format!(
                "command '{name}' is registered twice"
            ))
            .into());
        }
        self.commands.insert(name, command);
        Ok(())
    }

    /// Resolves `alias` against an already registered command and registers the result.
    pub fn register_alias(&mut self, alias: &CommandAlias) -> Result<()> {
        let target = self.commands.get(&alias.alias_for).cloned().ok_or_else(|| {
            SqlCommandError::AliasTargetMissing {
                alias: alias.name.clone(),
                target: alias.alias_for.clone(),
            }
        })?;
        let resolved = alias.resolve(target)?;
        self.register(Arc::new(resolved))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
