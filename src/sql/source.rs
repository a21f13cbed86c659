use super::connection::{Connection, ConnectionFactory, SqlxConnection, connection_factory, redact};
use crate::imports::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/*
    Types:
    * DatabaseConfig - The sql-connection and dbt layers of one invocation, as a record
    * Source - One resolved database target, either from dbt profiles or from the discrete settings
*/
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub host: String,
    pub port: i64,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    pub db_type: String,
    pub dsn: String,
    pub driver: String,
    #[serde(skip)]
    pub dbt: DbtSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
            schema: String::new(),
            db_type: "mysql".to_string(),
            dsn: String::new(),
            driver: String::new(),
            dbt: DbtSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DbtSettings {
    pub use_dbt_profiles: bool,
    pub dbt_profiles_path: String,
    pub dbt_profile: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Source {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "server")]
    pub hostname: String,
    pub port: i64,
    pub username: String,
    pub password: String,
    pub schema: String,
    pub database: String,
}

#[derive(Debug, Deserialize)]
struct DbtProfile {
    #[serde(default)]
    outputs: BTreeMap<String, Source>,
}

impl DatabaseConfig {
    pub fn from_layers(parsed: &ParsedLayers) -> Result<Self> {
        let mut config: DatabaseConfig = parsed
            .initialize_struct(SQL_CONNECTION_SLUG)
            .context("reading connection settings")?;
        config.dbt = parsed
            .initialize_struct(DBT_SLUG)
            .context("reading dbt settings")?;
        Ok(config)
    }

    /// The target this configuration points at; `sqlite` is normalised to `sqlite3`.
    pub async fn source(&self) -> Result<Source> {
        let mut source = if self.dbt.use_dbt_profiles {
            if self.dbt.dbt_profile.is_empty() {
                return Err(anyhow::anyhow!("no dbt profile specified"));
            }
            let path = profiles_path(&self.dbt.dbt_profiles_path)?;
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                SqlCommandError::FileNotReadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            parse_dbt_profiles(&content)?
                .into_iter()
                .find(|source| source.name == self.dbt.dbt_profile)
                .ok_or_else(|| anyhow::anyhow!("source {} not found", self.dbt.dbt_profile))?
        } else {
            Source {
                name: String::new(),
                kind: self.db_type.clone(),
                hostname: self.host.clone(),
                port: self.port,
                username: self.user.clone(),
                password: self.password.clone(),
                schema: self.schema.clone(),
                database: self.database.clone(),
            }
        };
        if source.kind == "sqlite" {
            source.kind = "sqlite3".to_string();
        }
        Ok(source)
    }

    /// Connection url for sqlx. An explicit DSN wins over profiles and discrete settings.
    pub async fn connection_url(&self) -> Result<String> {
        if !self.dsn.is_empty() {
            return Ok(self.dsn.clone());
        }
        self.source().await?.to_url()
    }

    /// Human-readable target, without the password. Profiles are named, not read.
    pub fn describe(&self) -> String {
        if !self.dsn.is_empty() {
            return format!("dsn: {}, driver: {}", redact(&self.dsn), self.driver);
        }
        if self.dbt.use_dbt_profiles {
            return format!("dbt-profile: {}", self.dbt.dbt_profile);
        }
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl Source {
    pub fn to_url(&self) -> Result<String> {
        let credentials = if self.password.is_empty() {
            self.username.clone()
        } else {
            format!("{}:{}", self.username, self.password)
        };
        match self.kind.as_str() {
            "mysql" => Ok(format!(
                "mysql://{}@{}:{}/{}",
                credentials, self.hostname, self.port, self.database
            )),
            "postgres" | "postgresql" | "pgx" => {
                let mut url = format!(
                    "postgres://{}@{}:{}/{}?sslmode=disable",
                    credentials, self.hostname, self.port, self.database
                );
                if !self.schema.is_empty() {
                    url.push_str(&format!("&options=-csearch_path%3D{}", self.schema));
                }
                Ok(url)
            }
            "sqlite" | "sqlite3" => Ok(if self.database.starts_with("sqlite:") {
                self.database.clone()
            } else {
                format!("sqlite://{}", self.database)
            }),
            other => Err(anyhow::anyhow!("unsupported database type '{}'", other)),
        }
    }
}

fn profiles_path(configured: &str) -> Result<PathBuf> {
    if !configured.is_empty() {
        return Ok(PathBuf::from(configured));
    }
    let home = std::env::var("HOME").context("HOME is not set, cannot locate ~/.dbt/profiles.yml")?;
    Ok(PathBuf::from(home).join(".dbt").join("profiles.yml"))
}

/// Flattens a dbt `profiles.yml` into sources named `<profile>.<output>`.
pub fn parse_dbt_profiles(content: &str) -> Result<Vec<Source>> {
    let profiles: BTreeMap<String, DbtProfile> =
        serde_yaml::from_str(content).context("parsing dbt profiles")?;
    let mut sources = Vec::new();
    for (profile_name, profile) in profiles {
        for (output_name, mut source) in profile.outputs {
            source.name = format!("{profile_name}.{output_name}");
            sources.push(source);
        }
    }
    Ok(sources)
}

/// Opens a [`SqlxConnection`] from the sql-connection and dbt layers.
pub fn default_connection_factory() -> ConnectionFactory {
    connection_factory(|parsed: &ParsedLayers| {
        let config = DatabaseConfig::from_layers(parsed);
        async move {
            let config = config?;
            let url = config.connection_url().await?;
            tracing::debug!(target_db = %config.describe(), "Connecting");
            let conn = SqlxConnection::connect(&url).await?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        }
    })
}
