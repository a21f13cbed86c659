use crate::imports::*;
use serde::{Deserialize, Serialize};

/*
    Types:
    * ParameterLayer - A named, slugged group of parameter definitions
    * ParameterLayers - Ordered collection of layers; a command's full parameter surface

    Consts:
    * DEFAULT_SLUG, GLAZED_SLUG, SQL_CONNECTION_SLUG, DBT_SLUG, SQL_HELPERS_SLUG - Well-known layer slugs
*/
pub const DEFAULT_SLUG: &str = "default";
pub const GLAZED_SLUG: &str = "glazed";
pub const SQL_CONNECTION_SLUG: &str = "sql-connection";
pub const DBT_SLUG: &str = "dbt";
pub const SQL_HELPERS_SLUG: &str = "sql-helpers";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterLayer {
    pub slug: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, rename = "flags")]
    pub definitions: Vec<ParameterDefinition>,
}

impl ParameterLayer {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            definitions: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn definition(mut self, definition: ParameterDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn definitions(mut self, definitions: impl IntoIterator<Item = ParameterDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|def| def.name == name)
    }

    /// Slug and definition names must be well-formed and unique within the layer.
    pub fn validate(&self) -> Result<()> {
        DEFAULT_NAME_POLICY.validate(&self.slug, "layer")?;
        let mut seen = HashSet::new();
        for def in &self.definitions {
            def.validate_shape(&format!("parameter in layer '{}'", self.slug))?;
            if !seen.insert(def.name.as_str()) {
                return Err(SqlCommandError::InvalidDescriptor(format!(
                    "parameter '{}' is declared twice in layer '{}'",
                    def.name, self.slug
                ))
                .into());
            }
        }
        Ok(())
    }

    pub async fn check_defaults(&self, ctx: &ExecutionContext) -> Result<()> {
        for def in &self.definitions {
            check_default_validity(ctx, def)
                .await
                .with_context(|| format!("in layer '{}'", self.slug))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterLayers {
    layers: Vec<ParameterLayer>,
}

impl ParameterLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer. A layer whose slug is already present is rejected.
    pub fn push(&mut self, layer: ParameterLayer) -> Result<()> {
        if self.get(&layer.slug).is_some() {
            return Err(SqlCommandError::InvalidDescriptor(format!(
                "layer '{}' is declared twice",
                layer.slug
            ))
            .into());
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Appends a layer unless one with the same slug exists.
    pub fn push_missing(&mut self, layer: ParameterLayer) {
        if self.get(&layer.slug).is_none() {
            self.layers.push(layer);
        }
    }

    pub fn get(&self, slug: &str) -> Option<&ParameterLayer> {
        self.layers.iter().find(|layer| layer.slug == slug)
    }

    pub fn get_mut(&mut self, slug: &str) -> Option<&mut ParameterLayer> {
        self.layers.iter_mut().find(|layer| layer.slug == slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterLayer> {
        self.layers.iter()
    }

    pub fn slugs(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.slug.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<'a> IntoIterator for &'a ParameterLayers {
    type Item = &'a ParameterLayer;
    type IntoIter = std::slice::Iter<'a, ParameterLayer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

/*
    Built-in layers appended to every SQL command.
*/
pub mod builtin {
    use super::*;

    pub fn glazed() -> ParameterLayer {
        ParameterLayer::new(GLAZED_SLUG, "Glazed output")
            .description("How rows are rendered by the output processor")
            .definitions([
                ParameterDefinition::new("output", ParameterType::Choice)
                    .help("Output format")
                    .choices(["table", "csv", "tsv", "json", "yaml", "markdown", "html"])
                    .default_value("table"),
                ParameterDefinition::new("output-file", ParameterType::String)
                    .help("Write output to this file instead of stdout"),
                ParameterDefinition::new("table-format", ParameterType::Choice)
                    .help("Table style when output is 'table'")
                    .choices(["ascii", "markdown", "html"])
                    .default_value("ascii"),
                ParameterDefinition::new("fields", ParameterType::StringList)
                    .help("Only output these columns"),
                ParameterDefinition::new("filter", ParameterType::StringList)
                    .help("Drop these columns from the output"),
            ])
    }

    pub fn sql_connection() -> ParameterLayer {
        ParameterLayer::new(SQL_CONNECTION_SLUG, "SQL connection")
            .description("Discrete database connection settings")
            .definitions([
                ParameterDefinition::new("host", ParameterType::String)
                    .help("Database host")
                    .short_flag("H")
                    .default_value("localhost"),
                ParameterDefinition::new("port", ParameterType::Int)
                    .help("Database port")
                    .short_flag("P")
                    .default_value(3306),
                ParameterDefinition::new("user", ParameterType::String)
                    .help("Database user")
                    .short_flag("u")
                    .default_value("root"),
                ParameterDefinition::new("password", ParameterType::String)
                    .help("Database password")
                    .short_flag("p")
                    .default_value(""),
                ParameterDefinition::new("database", ParameterType::String)
                    .help("Database name")
                    .short_flag("D")
                    .default_value(""),
                ParameterDefinition::new("schema", ParameterType::String)
                    .help("Database schema")
                    .default_value(""),
                ParameterDefinition::new("db-type", ParameterType::Choice)
                    .help("Database type")
                    .short_flag("t")
                    .choices(["mysql", "postgres", "postgresql", "pgx", "sqlite", "sqlite3"])
                    .default_value("mysql"),
                ParameterDefinition::new("dsn", ParameterType::String)
                    .help("Full connection string, takes precedence over the discrete settings")
                    .default_value(""),
                ParameterDefinition::new("driver", ParameterType::String)
                    .help("Database driver, defaults to one derived from db-type")
                    .default_value(""),
            ])
    }

    pub fn dbt() -> ParameterLayer {
        ParameterLayer::new(DBT_SLUG, "DBT profiles")
            .description("Resolve connections from a dbt profiles file")
            .definitions([
                ParameterDefinition::new("use-dbt-profiles", ParameterType::Bool)
                    .help("Use a dbt profile instead of the discrete settings")
                    .default_value(false),
                ParameterDefinition::new("dbt-profiles-path", ParameterType::String)
                    .help("Path to profiles.yml, defaults to ~/.dbt/profiles.yml")
                    .default_value(""),
                ParameterDefinition::new("dbt-profile", ParameterType::String)
                    .help("Profile source to use, as <profile>.<output>")
                    .default_value(""),
            ])
    }

    pub fn sql_helpers() -> ParameterLayer {
        ParameterLayer::new(SQL_HELPERS_SLUG, "SQL helpers")
            .description("Inspect the rendered query")
            .definitions([
                ParameterDefinition::new("print-query", ParameterType::Bool)
                    .help("Print the rendered query and exit")
                    .default_value(false),
                ParameterDefinition::new("explain", ParameterType::Bool)
                    .help("Prefix the rendered query with EXPLAIN")
                    .default_value(false),
            ])
    }
}
