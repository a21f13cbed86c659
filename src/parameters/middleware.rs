use crate::imports::*;

/*
    The middleware chain turns raw values from several sources into ParsedLayers.
    It is plain data: an ordered list of steps, applied first to last, each one free to
    overwrite what an earlier step wrote.

    Types:
    * Middleware - One step of the chain
    * MiddlewareChain - Ordered steps plus the canonical builder
*/
pub mod sources {
    pub const DEFAULTS: &str = "default";
    pub const CONFIG: &str = "config";
    pub const ALIAS: &str = "alias";
    pub const COBRA: &str = "cobra";
    pub const ARGUMENTS: &str = "arguments";
    pub const OVERRIDE: &str = "override";
    pub const OUTPUT_OVERRIDE: &str = "output-override";
}

#[derive(Debug, Clone)]
pub enum Middleware {
    /// Writes every definition's default.
    SetDefaults,
    /// Writes values found in the configuration store.
    FromConfig(Arc<ConfigStore>),
    /// Writes caller-supplied raw values, tagged with `source`.
    FromValues { source: String, values: LayerValues },
    /// Coerces every written value and enforces required parameters.
    Coerce,
}

impl Middleware {
    async fn apply(&self, ctx: &ExecutionContext, parsed: &mut ParsedLayers) -> Result<()> {
        match self {
            Middleware::SetDefaults => {
                for layer in parsed.iter_mut() {
                    let defaults: Vec<(String, ScalarValue)> = layer
                        .layer
                        .definitions
                        .iter()
                        .filter_map(|def| def.default.clone().map(|v| (def.name.clone(), v)))
                        .collect();
                    for (name, value) in defaults {
                        layer.set(&name, value, sources::DEFAULTS);
                    }
                }
            }
            Middleware::FromConfig(store) => {
                for layer in parsed.iter_mut() {
                    let slug = layer.slug().to_string();
                    let names: Vec<String> =
                        layer.layer.definitions.iter().map(|d| d.name.clone()).collect();
                    for name in names {
                        if let Some(value) = store.get(&slug, &name)? {
                            tracing::debug!(layer = %slug, parameter = %name, "Value from config");
                            layer.set(&name, value, sources::CONFIG);
                        }
                    }
                }
            }
            Middleware::FromValues { source, values } => {
                for (slug, entries) in values {
                    let layer = parsed.get_mut(slug).ok_or_else(|| {
                        anyhow::Error::from(SqlCommandError::UnknownParameter {
                            layer: slug.clone(),
                            name: entries.keys().next().cloned().unwrap_or_default(),
                        })
                        .context(format!("layer '{slug}' is not part of this command"))
                    })?;
                    for (name, value) in entries {
                        if layer.layer.get(name).is_none() {
                            return Err(SqlCommandError::UnknownParameter {
                                layer: slug.clone(),
                                name: name.clone(),
                            }
                            .into());
                        }
                        layer.set(name, value.clone(), source);
                    }
                }
            }
            Middleware::Coerce => {
                for layer in parsed.iter_mut() {
                    let definitions = layer.layer.definitions.clone();
                    for def in &definitions {
                        match layer.value(&def.name).cloned() {
                            None | Some(ScalarValue::Null) => {
                                if def.required {
                                    return Err(SqlCommandError::MissingRequired {
                                        name: def.name.clone(),
                                    })
                                    .with_context(|| format!("in layer '{}'", layer.slug()));
                                }
                            }
                            Some(raw) => {
                                let value = coerce(ctx, def, &raw)
                                    .await
                                    .with_context(|| format!("in layer '{}'", layer.slug()))?;
                                layer.replace_value(&def.name, value);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MiddlewareChain {
    steps: Vec<Middleware>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, middleware: Middleware) -> Self {
        self.steps.push(middleware);
        self
    }

    pub fn defaults(self) -> Self {
        self.step(Middleware::SetDefaults)
    }

    pub fn config(self, store: Arc<ConfigStore>) -> Self {
        self.step(Middleware::FromConfig(store))
    }

    pub fn values(self, source: impl Into<String>, values: LayerValues) -> Self {
        if values.is_empty() {
            return self;
        }
        self.step(Middleware::FromValues {
            source: source.into(),
            values,
        })
    }

    pub fn coerce(self) -> Self {
        self.step(Middleware::Coerce)
    }

    pub fn steps(&self) -> &[Middleware] {
        &self.steps
    }

    #[tracing::instrument(skip_all, fields(layers = layers.len(), steps = self.steps.len()))]
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        layers: &ParameterLayers,
    ) -> Result<ParsedLayers> {
        let mut parsed = ParsedLayers::from_layers(layers);
        for step in &self.steps {
            if ctx.is_cancelled() {
                return Err(SqlCommandError::Cancelled.into());
            }
            step.apply(ctx, &mut parsed).await?;
        }
        Ok(parsed)
    }
}

/*
    Invocation - Everything a caller hands over for one run, turned into the canonical chain:
    defaults -> config -> alias presets -> flags -> positional arguments -> overrides -> coerce
*/
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub config: Option<Arc<ConfigStore>>,
    pub flags: LayerValues,
    pub arguments: Vec<ScalarValue>,
    pub overrides: LayerValues,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, store: ConfigStore) -> Self {
        self.config = Some(Arc::new(store));
        self
    }

    pub fn flag(mut self, slug: &str, name: &str, value: impl Into<ScalarValue>) -> Self {
        self.flags
            .entry(slug.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
        self
    }

    pub fn argument(mut self, value: impl Into<ScalarValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn override_value(mut self, slug: &str, name: &str, value: impl Into<ScalarValue>) -> Self {
        self.overrides
            .entry(slug.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
        self
    }

    pub fn chain(
        &self,
        description: &CommandDescription,
        presets: Option<LayerValues>,
    ) -> Result<MiddlewareChain> {
        let mut chain = MiddlewareChain::new().defaults();
        if let Some(store) = &self.config {
            chain = chain.config(store.clone());
        }
        if let Some(presets) = presets {
            chain = chain.values(sources::ALIAS, presets);
        }
        chain = chain.values(sources::COBRA, self.flags.clone());
        if !self.arguments.is_empty() {
            let bound = description.bind_arguments(&self.arguments)?;
            chain = chain.values(
                sources::ARGUMENTS,
                LayerValues::from([(DEFAULT_SLUG.to_string(), bound)]),
            );
        }
        Ok(chain.values(sources::OVERRIDE, self.overrides.clone()).coerce())
    }
}
