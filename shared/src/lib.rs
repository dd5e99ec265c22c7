//! Types shared between the dashboard library and its command-line front end:
//! the schema of the four reference tables and the TOML configuration.

pub mod config;
pub mod table;

pub use config::{
    AppSection, AuthSection, ConfigError, DashboardConfig, MapSection, MigrationStrategy,
    TablesSection,
};
pub use table::{EditResult, ObjectId, Query, Row, Table, equality_clause, fields, sql_quote};
