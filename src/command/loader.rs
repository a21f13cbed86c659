use super::alias::CommandAlias;
use super::sql::SqlCommand;
use super::{Command, CommandDescription};
use crate::imports::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/*
    YAML descriptors. One document describes either a SQL command or, when it carries
    `aliasFor`, an alias of another command.

    Types:
    * SqlCommandDescriptor - The serialized shape of a SQL command
    * LoadedCommand - What a document turned out to be
    * LoadedCommands - Everything found under a directory
*/
pub const COMMAND_TYPE: &str = "sqleton";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlCommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub short: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub long: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub command_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "ScalarMap::is_empty")]
    pub metadata: ScalarMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<ParameterDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ParameterDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<ParameterLayer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layout: Vec<ScalarValue>,
    #[serde(default)]
    pub query: String,
    #[serde(
        default,
        rename = "subqueries",
        alias = "subQueries",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub sub_queries: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum LoadedCommand {
    Sql(SqlCommand),
    Alias(CommandAlias),
}

#[derive(Debug, Default)]
pub struct LoadedCommands {
    pub commands: Vec<SqlCommand>,
    pub aliases: Vec<CommandAlias>,
}

// Where a document came from; recorded on the command it produces.
#[derive(Debug, Clone, Default)]
struct Origin {
    source: String,
    parents: Vec<String>,
}

/// Parses one descriptor and validates it, including every default value.
pub async fn load_from_yaml(ctx: &ExecutionContext, yaml: &str) -> Result<LoadedCommand> {
    load(ctx, yaml, Origin::default()).await
}

/// Like [`load_from_yaml`], recording `file:<path>` as the source.
pub async fn load_from_file(ctx: &ExecutionContext, path: &Path) -> Result<LoadedCommand> {
    let origin = Origin {
        source: format!("file:{}", path.display()),
        parents: Vec::new(),
    };
    load_file(ctx, path, origin).await
}

/// Loads every `.yml`/`.yaml` file under `dir`, skipping hidden entries. A command's parents
/// are the directories between `dir` and its file. Files that fail to load are logged and skipped.
#[tracing::instrument(skip(ctx))]
pub async fn load_from_directory(ctx: &ExecutionContext, dir: &Path) -> Result<LoadedCommands> {
    let mut loaded = LoadedCommands::default();
    let mut pending: Vec<(PathBuf, Vec<String>)> = vec![(dir.to_path_buf(), Vec::new())];

    while let Some((current, parents)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("reading directory {}", current.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                let mut child_parents = parents.clone();
                child_parents.push(file_name);
                pending.push((path, child_parents));
            } else if file_name.ends_with(".yml") || file_name.ends_with(".yaml") {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let origin = Origin {
                source: format!("file:{}", path.display()),
                parents: parents.clone(),
            };
            match load_file(ctx, &path, origin).await {
                Ok(LoadedCommand::Sql(command)) => loaded.commands.push(command),
                Ok(LoadedCommand::Alias(alias)) => loaded.aliases.push(alias),
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Skipping command file");
                }
            }
        }
    }
    tracing::debug!(
        commands = loaded.commands.len(),
        aliases = loaded.aliases.len(),
        "Loaded command directory"
    );
    Ok(loaded)
}

async fn load_file(ctx: &ExecutionContext, path: &Path, origin: Origin) -> Result<LoadedCommand> {
    let yaml = ctx
        .cancellable(async {
            tokio::fs::read_to_string(path).await.map_err(|e| {
                anyhow::Error::from(SqlCommandError::FileNotReadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            })
        })
        .await?;
    load(ctx, &yaml, origin)
        .await
        .with_context(|| format!("loading {}", path.display()))
}

async fn load(ctx: &ExecutionContext, yaml: &str, origin: Origin) -> Result<LoadedCommand> {
    let document: serde_yaml::Value = serde_yaml::from_str(yaml)
        .map_err(|e| SqlCommandError::InvalidDescriptor(e.to_string()))?;
    let is_alias = document
        .as_mapping()
        .is_some_and(|m| m.contains_key(serde_yaml::Value::from("aliasFor")));

    if is_alias {
        let mut alias: CommandAlias = serde_yaml::from_value(document)
            .map_err(|e| SqlCommandError::InvalidDescriptor(e.to_string()))?;
        if !alias.is_valid() {
            return Err(SqlCommandError::InvalidDescriptor(
                "an alias needs a name and aliasFor".to_string(),
            )
            .into());
        }
        alias.source = origin.source;
        alias.parents = origin.parents;
        return Ok(LoadedCommand::Alias(alias));
    }

    let descriptor: SqlCommandDescriptor = serde_yaml::from_value(document)
        .map_err(|e| SqlCommandError::InvalidDescriptor(e.to_string()))?;
    let command = descriptor.into_command(origin)?;
    command.description().check_defaults(ctx).await?;
    Ok(LoadedCommand::Sql(command))
}

impl SqlCommandDescriptor {
    fn into_command(self, origin: Origin) -> Result<SqlCommand> {
        if let Some(command_type) = &self.command_type {
            if command_type != COMMAND_TYPE {
                return Err(SqlCommandError::InvalidDescriptor(format!(
                    "command '{}' has type '{}', expected '{}'",
                    self.name, command_type, COMMAND_TYPE
                ))
                .into());
            }
        }
        let mut builder = CommandDescription::builder(&self.name)
            .short(self.short)
            .long(self.long)
            .flags(self.flags)
            .arguments(self.arguments)
            .layout(self.layout)
            .tags(self.tags)
            .metadata(self.metadata)
            .parents(origin.parents)
            .source(origin.source);
        if let Some(command_type) = self.command_type {
            builder = builder.command_type(command_type);
        }
        for layer in self.layers {
            builder = builder.layer(layer);
        }
        let command = SqlCommand::new(builder.build()?)
            .with_query(self.query)
            .with_sub_queries(self.sub_queries);
        if !command.is_valid() {
            return Err(SqlCommandError::InvalidDescriptor(format!(
                "command '{}' needs a name, a short description and a query",
                self.name
            ))
            .into());
        }
        Ok(command)
    }
}

impl SqlCommand {
    /// The descriptor this command would be loaded from. Layers every SQL command gets are left out.
    pub fn to_descriptor(&self) -> SqlCommandDescriptor {
        let description = self.description();
        let implicit = [
            builtin::sql_helpers(),
            builtin::sql_connection(),
            builtin::dbt(),
            builtin::glazed(),
        ];
        let layers = description
            .layers
            .iter()
            .filter(|layer| layer.slug != DEFAULT_SLUG && !implicit.contains(layer))
            .cloned()
            .collect();
        SqlCommandDescriptor {
            name: description.name.clone(),
            short: description.short.clone(),
            long: description.long.clone(),
            command_type: description.command_type.clone(),
            tags: description.tags.clone(),
            metadata: description.metadata.clone(),
            flags: description.flags.clone(),
            arguments: description.arguments.clone(),
            layers,
            layout: description.layout.clone(),
            query: self.query().to_string(),
            sub_queries: self.sub_queries().clone(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.to_descriptor()).context("serializing command")
    }
}
