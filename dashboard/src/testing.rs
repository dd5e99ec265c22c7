//! In-memory collaborators for tests and offline runs.

use crate::error::{MapSurfaceError, RemoteError};
use crate::map::{HeadlessMap, LayerKind, LiveLayer, MapSurface};
use crate::remote::{CredentialProvider, LayerService, TableClient};
use async_trait::async_trait;
use serde_json::Value;
use shared::{EditResult, ObjectId, Query, Row, Table, fields};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// One call received by [`MemoryTables`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Query(Table),
    Count(Table),
    Insert(Table, usize),
    Delete(Table, usize),
}

/// The four reference tables held in memory. Supports `1=1` and single
/// `FIELD = value` where clauses.
#[derive(Debug, Default)]
pub struct MemoryTables {
    state: Mutex<TablesState>,
}

#[derive(Debug, Default)]
struct TablesState {
    rows: HashMap<Table, Vec<Row>>,
    next_id: ObjectId,
    calls: Vec<Call>,
    tokens: Vec<String>,
    failures: HashMap<Table, RemoteError>,
    write_failures: HashMap<Table, RemoteError>,
    rejections: HashMap<Table, String>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer_url(id: ObjectId) -> String {
        format!("https://services.example.com/arcgis/rest/services/Layer{id}/FeatureServer/0")
    }

    pub fn layer_row(id: ObjectId, title: &str, scope: &str, category: ObjectId) -> Row {
        Row::new()
            .with(fields::OBJECTID, id)
            .with(fields::TITLE, title)
            .with(fields::SCOPE, scope)
            .with(fields::URL, Self::layer_url(id))
            .with(fields::CATEGORYID, category)
    }

    pub fn relationship_row(id: ObjectId, template: ObjectId, layer: ObjectId) -> Row {
        Row::new()
            .with(fields::OBJECTID, id)
            .with(fields::TEMPLATEID, template)
            .with(fields::LAYERID, layer)
    }

    /// Replaces the contents of `table`.
    pub fn seed(&self, table: Table, rows: Vec<Row>) {
        let mut state = self.lock();
        let highest = rows
            .iter()
            .filter_map(|row| row.integer(fields::OBJECTID))
            .max()
            .unwrap_or(0);
        state.next_id = state.next_id.max(highest + 1);
        state.rows.insert(table, rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().rows.get(&table).cloned().unwrap_or_default()
    }

    /// Every call against `table` fails with `err`.
    pub fn fail(&self, table: Table, err: RemoteError) {
        self.lock().failures.insert(table, err);
    }

    /// Inserts and deletes against `table` fail with `err`; reads still work.
    pub fn fail_writes(&self, table: Table, err: RemoteError) {
        self.lock().write_failures.insert(table, err);
    }

    /// Inserts into `table` succeed at the transport level but every row is
    /// rejected with `message`.
    pub fn reject_inserts(&self, table: Table, message: &str) {
        self.lock().rejections.insert(table, message.to_string());
    }

    pub fn recover(&self, table: Table) {
        let mut state = self.lock();
        state.failures.remove(&table);
        state.write_failures.remove(&table);
        state.rejections.remove(&table);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Tokens passed to inserts and deletes, in call order.
    pub fn tokens(&self) -> Vec<String> {
        self.lock().tokens.clone()
    }

    fn lock(&self) -> MutexGuard<'_, TablesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TablesState {
    fn check(&self, table: Table, write: bool) -> Result<(), RemoteError> {
        if let Some(err) = self.failures.get(&table) {
            return Err(err.clone());
        }
        if write {
            if let Some(err) = self.write_failures.get(&table) {
                return Err(err.clone());
            }
        }
        Ok(())
    }

    fn matching(&self, table: Table, where_clause: &str) -> Result<Vec<Row>, RemoteError> {
        let filter = WhereClause::parse(where_clause)?;
        Ok(self
            .rows
            .get(&table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default())
    }
}

enum WhereClause {
    All,
    Equals(String, Value),
}

impl WhereClause {
    fn parse(clause: &str) -> Result<Self, RemoteError> {
        let clause = clause.trim();
        if clause == "1=1" {
            return Ok(WhereClause::All);
        }
        let Some((field, value)) = clause.split_once('=') else {
            return Err(RemoteError::Rejected(format!("unsupported where clause: {clause}")));
        };
        let value = value.trim();
        let value = if let Some(text) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
            Value::from(text.replace("''", "'"))
        } else {
            value
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| RemoteError::Rejected(format!("unsupported where clause: {clause}")))?
        };
        Ok(WhereClause::Equals(field.trim().to_string(), value))
    }

    fn matches(&self, row: &Row) -> bool {
        match self {
            WhereClause::All => true,
            WhereClause::Equals(field, Value::Number(number)) => row.integer(field) == number.as_i64(),
            WhereClause::Equals(field, Value::String(text)) => row.text(field).as_deref() == Some(text.as_str()),
            WhereClause::Equals(..) => false,
        }
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl TableClient for MemoryTables {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(Call::Query(table));
        state.check(table, false)?;

        let mut rows = state.matching(table, &query.where_clause)?;
        rows.sort_by(|a, b| {
            query
                .order_by
                .iter()
                .map(|field| compare(a.get(field), b.get(field)))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(rows)
    }

    async fn count(&self, table: Table, where_clause: &str) -> Result<u64, RemoteError> {
        let mut state = self.lock();
        state.calls.push(Call::Count(table));
        state.check(table, false)?;
        Ok(state.matching(table, where_clause)?.len() as u64)
    }

    async fn insert(
        &self,
        table: Table,
        rows: Vec<Row>,
        token: &str,
    ) -> Result<Vec<EditResult>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(Call::Insert(table, rows.len()));
        state.tokens.push(token.to_string());
        state.check(table, true)?;

        if let Some(message) = state.rejections.get(&table) {
            return Ok(rows.iter().map(|_| EditResult::failed(message.clone())).collect());
        }

        let mut results = Vec::with_capacity(rows.len());
        for mut row in rows {
            let id = state.next_id.max(1);
            state.next_id = id + 1;
            row.set(fields::OBJECTID, id);
            state.rows.entry(table).or_default().push(row);
            results.push(EditResult::succeeded(id));
        }
        Ok(results)
    }

    async fn delete(
        &self,
        table: Table,
        ids: &[ObjectId],
        token: &str,
    ) -> Result<Vec<EditResult>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(Call::Delete(table, ids.len()));
        state.tokens.push(token.to_string());
        state.check(table, true)?;

        let rows = state.rows.entry(table).or_default();
        Ok(ids
            .iter()
            .map(|id| {
                let before = rows.len();
                rows.retain(|row| row.integer(fields::OBJECTID) != Some(*id));
                if rows.len() < before {
                    EditResult::succeeded(*id)
                } else {
                    EditResult::failed(format!("no row with OBJECTID {id}"))
                }
            })
            .collect())
    }
}

/// Resolves every URL to a feature layer unless told otherwise.
#[derive(Debug, Default)]
pub struct MemoryLayerService {
    state: Mutex<LayerServiceState>,
}

#[derive(Debug, Default)]
struct LayerServiceState {
    kinds: HashMap<String, LayerKind>,
    failing: HashSet<String>,
    resolves: HashMap<String, usize>,
    held: HashMap<String, Arc<Notify>>,
}

impl MemoryLayerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_kind(&self, url: &str, kind: LayerKind) {
        self.lock().kinds.insert(url.to_string(), kind);
    }

    pub fn fail(&self, url: &str) {
        self.lock().failing.insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.lock().failing.remove(url);
    }

    /// Makes resolves of `url` wait until the returned gate is notified.
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        self.lock()
            .held
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// How many times `url` was resolved, failures included.
    pub fn resolve_count(&self, url: &str) -> usize {
        self.lock().resolves.get(url).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, LayerServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LayerService for MemoryLayerService {
    async fn resolve(&self, url: &str) -> Result<LiveLayer, RemoteError> {
        let gate = self.lock().held.get(url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.lock();
        *state.resolves.entry(url.to_string()).or_default() += 1;
        if state.failing.contains(url) {
            return Err(RemoteError::Unreachable(format!("{url} did not respond")));
        }
        let kind = state.kinds.get(url).cloned().unwrap_or(LayerKind::Feature);
        Ok(LiveLayer::new(url, kind))
    }
}

/// A [`HeadlessMap`] that refuses to add chosen layers.
#[derive(Debug, Default)]
pub struct FlakyMap {
    map: HeadlessMap,
    rejected: Mutex<HashSet<String>>,
}

impl FlakyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, layer_id: impl ToString) {
        self.lock_rejected().insert(layer_id.to_string());
    }

    pub fn headless(&self) -> &HeadlessMap {
        &self.map
    }

    /// Operational layer ids, bottom to top.
    pub fn layer_ids(&self) -> Vec<String> {
        self.map
            .operational_layers()
            .into_iter()
            .map(|layer| layer.id)
            .collect()
    }

    fn lock_rejected(&self) -> MutexGuard<'_, HashSet<String>> {
        self.rejected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MapSurface for FlakyMap {
    fn add(&self, layer: LiveLayer) -> Result<(), MapSurfaceError> {
        if self.lock_rejected().contains(&layer.id) {
            return Err(MapSurfaceError::new(format!("layer view for {} failed to load", layer.id)));
        }
        self.map.add(layer)
    }

    fn remove(&self, layer_id: &str) -> Result<(), MapSurfaceError> {
        self.map.remove(layer_id)
    }

    fn remove_all(&self) {
        self.map.remove_all()
    }

    fn all_layers(&self) -> Vec<LiveLayer> {
        self.map.all_layers()
    }

    fn set_basemap(&self, basemap: &str) {
        self.map.set_basemap(basemap)
    }
}

/// Credential provider whose sign-in always fails.
#[derive(Debug, Default)]
pub struct DeniedCredentials;

#[async_trait]
impl CredentialProvider for DeniedCredentials {
    async fn token(&self) -> Result<String, RemoteError> {
        Err(RemoteError::Rejected("Invalid username or password.".to_string()))
    }
}
