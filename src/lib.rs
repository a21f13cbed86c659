mod command;
mod error;
mod parameters;
mod processor;
mod services;
mod sql;
mod template;
mod values;

// Library exports
pub mod prelude {
    // Commands
    pub use crate::command::alias::{CommandAlias, CommandRegistry, ResolvedAlias};
    pub use crate::command::loader::{
        LoadedCommand, LoadedCommands, SqlCommandDescriptor, load_from_directory, load_from_file,
        load_from_yaml,
    };
    pub use crate::command::sql::{SqlCommand, SqlHelpersSettings};
    pub use crate::command::{
        Command, CommandDescription, CommandDescriptionBuilder, CommandMetadata, RunOutcome,
    };

    // Parameters
    pub use crate::parameters::config::{ConfigStore, ConfigStoreBuilder};
    pub use crate::parameters::layers::{
        DBT_SLUG, DEFAULT_SLUG, GLAZED_SLUG, ParameterLayer, ParameterLayers, SQL_CONNECTION_SLUG,
        SQL_HELPERS_SLUG, builtin,
    };
    pub use crate::parameters::middleware::{Invocation, Middleware, MiddlewareChain, sources};
    pub use crate::parameters::parsed::{ParsedLayer, ParsedLayers, ParsedParameter};
    pub use crate::parameters::{ParameterDefinition, ParameterType};

    // Database
    pub use crate::sql::connection::{
        Connection, ConnectionFactory, QueryResult, SqlxConnection, connection_factory,
    };
    pub use crate::sql::helpers::{sql_escape, sql_string};
    pub use crate::sql::render::{clean_query, render_query};
    pub use crate::sql::source::{DatabaseConfig, Source, default_connection_factory};

    // Templates
    pub use crate::template::{Functions, Template};

    // Processing
    pub use crate::processor::{RowProcessor, TableCollector, TableMiddleware};

    // Context and services
    pub use crate::services::io::{CapturedOutput, StdoutInteraction};
    pub use crate::services::{CommandIO, CommandServices};
    pub use crate::values::context::ExecutionContext;
    pub use crate::values::row::Row;
    pub use crate::values::{LayerValues, ScalarMap, ScalarValue};

    // Errors
    pub use crate::error::{ErrorKind, SqlCommandError, error_kind};
}

// Internal imports for use within the crate
#[allow(unused_imports)]
pub(crate) mod imports {
    // Core types
    pub use crate::command::CommandDescription;
    pub use crate::services::{CommandIO, CommandServices};
    pub use crate::values::{
        LayerValues, ScalarAsExt, ScalarMap, ScalarValue, as_integer, context::ExecutionContext,
        dates, describe_value, format_value, is_truthy, number_from_f64, row::Row,
    };

    // Parameters
    pub use crate::parameters::coerce::{FileData, check_default_validity, coerce};
    pub use crate::parameters::config::{ConfigStore, ConfigStoreBuilder, ENV_PREFIX};
    pub use crate::parameters::layers::{
        DBT_SLUG, DEFAULT_SLUG, GLAZED_SLUG, ParameterLayer, ParameterLayers, SQL_CONNECTION_SLUG,
        SQL_HELPERS_SLUG, builtin,
    };
    pub use crate::parameters::middleware::{Invocation, Middleware, MiddlewareChain, sources};
    pub use crate::parameters::parsed::{ParseStep, ParsedLayer, ParsedLayers, ParsedParameter};
    pub use crate::parameters::{DEFAULT_NAME_POLICY, NamePolicy, ParameterDefinition, ParameterType};

    // Result and error handling
    pub type Result<T> = anyhow::Result<T>;
    pub use crate::error::{ErrorKind, SqlCommandError, error_kind};
    pub(crate) use crate::error::is_cancelled;
    pub use anyhow::Context as _;

    // Collections
    pub use std::collections::{BTreeMap, HashMap, HashSet};

    // Async
    pub use async_trait::async_trait;
    pub use std::future::Future;
    pub use std::sync::Arc;
    pub use tokio::sync::RwLock;

    // Lazy initialization
    pub use std::sync::LazyLock;
}

#[cfg(test)]
pub(crate) mod test_utils {
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    }
}
