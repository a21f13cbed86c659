use crate::imports::*;
use std::path::Path;

/*
    Types:
    * ConfigStore - Read-only view over a configuration file and prefixed environment variables.

    Lookups try "<layer-slug>.<name>" first, then "<name>", each also with '-' spelled '_'
    since environment variable names cannot carry dashes.
*/
pub const ENV_PREFIX: &str = "SQLPLATE";

#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: config::Config,
}

impl ConfigStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> ConfigStoreBuilder {
        ConfigStoreBuilder::default()
    }

    /// Loads an optional file (format from its extension) plus `SQLPLATE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        builder.env(ENV_PREFIX).build()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::builder().yaml(yaml).build()
    }

    pub fn get(&self, slug: &str, name: &str) -> Result<Option<ScalarValue>> {
        let underscored = name.replace('-', "_");
        let keys = [
            format!("{slug}.{name}"),
            format!("{slug}.{underscored}"),
            name.to_string(),
            underscored.clone(),
        ];
        for key in keys.iter() {
            match self.inner.get::<ScalarValue>(key) {
                Ok(value) => return Ok(Some(value)),
                Err(config::ConfigError::NotFound(_)) => continue,
                Err(e) => {
                    return Err(anyhow::anyhow!("could not read config key '{}': {}", key, e));
                }
            }
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct ConfigStoreBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigStoreBuilder {
    pub fn file(mut self, path: &Path) -> Self {
        self.builder = self
            .builder
            .add_source(config::File::from(path).required(false));
        self
    }

    pub fn yaml(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    pub fn env(mut self, prefix: &str) -> Self {
        self.builder = self
            .builder
            .add_source(config::Environment::with_prefix(prefix).separator("__"));
        self
    }

    pub fn build(self) -> Result<ConfigStore> {
        let inner = self
            .builder
            .build()
            .context("could not build configuration")?;
        Ok(ConfigStore { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layer_scoped_keys_win_over_flat_keys() {
        let store = ConfigStore::from_yaml_str(
            "host: flat-host\nsql-connection:\n  host: scoped-host\n  port: 5432\nlimit: 5\n",
        )
        .unwrap();
        assert_eq!(
            store.get("sql-connection", "host").unwrap(),
            Some(json!("scoped-host"))
        );
        assert_eq!(store.get("sql-connection", "port").unwrap(), Some(json!(5432)));
        assert_eq!(store.get("default", "limit").unwrap(), Some(json!(5)));
        assert_eq!(store.get("default", "missing").unwrap(), None);
    }

    #[test]
    fn dashed_names_fall_back_to_underscores() {
        let store = ConfigStore::from_yaml_str("dbt:\n  dbt_profile: prod.main\n").unwrap();
        assert_eq!(
            store.get("dbt", "dbt-profile").unwrap(),
            Some(json!("prod.main"))
        );
    }

    #[test]
    fn file_sources_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::builder()
            .file(&dir.path().join("absent.yaml"))
            .build()
            .unwrap();
        assert_eq!(store.get("default", "anything").unwrap(), None);
    }
}
