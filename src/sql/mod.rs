pub mod connection;
pub mod executor;
pub mod helpers;
pub mod render;
pub mod source;

/*
    Everything that talks to, or writes for, a database:
    * connection - Connection trait, factories and the sqlx implementation
    * executor - Streams query results into a row processor
    * helpers - Quoting helpers for query templates
    * render - Query rendering with database helpers and named sub-queries
    * source - Connection settings from parsed layers and dbt profiles
*/
