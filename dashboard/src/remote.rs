//! Collaborators the dashboard talks to over the network.

use crate::error::{DashboardError, RemoteError};
use crate::map::LiveLayer;
use async_trait::async_trait;
use shared::{EditResult, ObjectId, Query, Row, Table};

/// Reads and writes the four reference tables.
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError>;

    async fn count(&self, table: Table, where_clause: &str) -> Result<u64, RemoteError>;

    /// Inserts `rows` in one call. The result holds one entry per row.
    async fn insert(
        &self,
        table: Table,
        rows: Vec<Row>,
        token: &str,
    ) -> Result<Vec<EditResult>, RemoteError>;

    async fn delete(
        &self,
        table: Table,
        ids: &[ObjectId],
        token: &str,
    ) -> Result<Vec<EditResult>, RemoteError>;
}

/// Turns a layer URL into a live layer.
#[async_trait]
pub trait LayerService: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<LiveLayer, RemoteError>;
}

/// Hands out an auth token for edits, signing in interactively when nothing
/// is cached.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<String, RemoteError>;
}

/// First failed row of an edit response, if any.
pub fn first_failure(results: &[EditResult]) -> Option<String> {
    results.iter().find(|result| !result.success).map(|result| {
        result
            .error
            .clone()
            .unwrap_or_else(|| "edit rejected without a message".to_string())
    })
}

/// Turns an edit response into a `RemoteWrite` error unless every one of the
/// `expected` rows was applied.
pub(crate) fn ensure_applied(
    table: Table,
    results: Vec<EditResult>,
    expected: usize,
) -> Result<Vec<EditResult>, DashboardError> {
    if let Some(message) = first_failure(&results) {
        return Err(DashboardError::RemoteWrite(message));
    }
    if results.len() != expected {
        return Err(DashboardError::RemoteWrite(format!(
            "{table} answered {} results for {expected} rows",
            results.len()
        )));
    }
    Ok(results)
}
