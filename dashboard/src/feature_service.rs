//! ArcGIS feature-service REST implementations of the table client and the
//! layer service.

use crate::error::{DashboardError, RemoteError};
use crate::map::{LayerKind, LiveLayer};
use crate::remote::{LayerService, TableClient};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use shared::{EditResult, ObjectId, Query, Row, Table, TablesSection};
use std::collections::HashMap;

// ===== RESPONSES =====

#[derive(Deserialize)]
struct ServiceError {
    code: Option<i64>,
    message: Option<String>,
    #[serde(default)]
    details: Vec<String>,
}

impl ServiceError {
    fn describe(&self) -> String {
        let mut text = self.message.clone().unwrap_or_else(|| "unknown error".to_string());
        if !self.details.is_empty() {
            text = format!("{text} ({})", self.details.join("; "));
        }
        match self.code {
            Some(code) => format!("{text} [code {code}]"),
            None => text,
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    attributes: Row,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddResponse {
    #[serde(default)]
    add_results: Vec<EditResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    #[serde(default)]
    delete_results: Vec<EditResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditResponse {
    object_id: Option<ObjectId>,
    #[serde(default)]
    success: bool,
    error: Option<EditError>,
}

#[derive(Deserialize)]
struct EditError {
    code: Option<i64>,
    description: Option<String>,
}

impl From<EditResponse> for EditResult {
    fn from(response: EditResponse) -> Self {
        EditResult {
            object_id: response.object_id,
            success: response.success,
            error: response.error.map(|error| {
                let description = error.description.unwrap_or_else(|| "edit rejected".to_string());
                match error.code {
                    Some(code) => format!("{description} [code {code}]"),
                    None => description,
                }
            }),
        }
    }
}

/// Decodes a service body. An `error` object in the body is a rejection
/// even when the HTTP status was 200.
pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    let value: Value =
        serde_json::from_str(body).map_err(|err| RemoteError::Malformed(err.to_string()))?;
    if let Some(error) = value.get("error") {
        let error: ServiceError = serde_json::from_value(error.clone())
            .map_err(|err| RemoteError::Malformed(err.to_string()))?;
        return Err(RemoteError::Rejected(error.describe()));
    }
    serde_json::from_value(value).map_err(|err| RemoteError::Malformed(err.to_string()))
}

pub(crate) fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() || err.is_body() {
        RemoteError::Malformed(err.to_string())
    } else if err.is_status() {
        RemoteError::Rejected(err.to_string())
    } else {
        RemoteError::Unreachable(err.to_string())
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        let excerpt: String = body.chars().take(200).collect();
        return Err(RemoteError::Rejected(format!("HTTP {status}: {excerpt}")));
    }
    Ok(body)
}

// ===== TABLE CLIENT =====

/// Reads and edits the four tables through their feature-service endpoints.
pub struct FeatureServiceClient {
    http: reqwest::Client,
    tables: HashMap<Table, Url>,
}

impl FeatureServiceClient {
    /// Parses every table URL up front; a bad URL fails like an unreachable
    /// table.
    pub fn new(http: reqwest::Client, tables: &TablesSection) -> Result<Self, DashboardError> {
        let mut urls = HashMap::new();
        for table in Table::ALL {
            let raw = tables.url(table);
            let url = Url::parse(raw.trim())
                .ok()
                .filter(|url| !url.cannot_be_a_base())
                .ok_or_else(|| DashboardError::Connection {
                    table,
                    message: format!("invalid table URL {raw:?}"),
                })?;
            urls.insert(table, url);
        }
        Ok(Self { http, tables: urls })
    }

    fn endpoint(&self, table: Table, operation: &str) -> Result<Url, RemoteError> {
        let mut url = self
            .tables
            .get(&table)
            .cloned()
            .ok_or_else(|| RemoteError::Unreachable(format!("no URL configured for {table}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Unreachable(format!("{table} URL cannot take a path")))?
            .pop_if_empty()
            .push(operation);
        Ok(url)
    }

    async fn post_edits<T: DeserializeOwned>(
        &self,
        table: Table,
        operation: &str,
        form: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(table, operation)?;
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;
        decode(&read_body(response).await?)
    }
}

#[async_trait]
impl TableClient for FeatureServiceClient {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let url = self.endpoint(table, "query")?;
        let out_fields = query.out_fields.join(",");
        let order_by = query.order_by.join(",");
        let response = self
            .http
            .get(url)
            .query(&[
                ("where", query.where_clause.as_str()),
                ("outFields", out_fields.as_str()),
                ("orderByFields", order_by.as_str()),
                ("returnGeometry", "false"),
                ("f", "json"),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let decoded: QueryResponse = decode(&read_body(response).await?)?;
        log::debug!("{table}: {} rows for {:?}", decoded.features.len(), query.where_clause);
        Ok(decoded.features.into_iter().map(|feature| feature.attributes).collect())
    }

    async fn count(&self, table: Table, where_clause: &str) -> Result<u64, RemoteError> {
        let url = self.endpoint(table, "query")?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("where", where_clause),
                ("returnCountOnly", "true"),
                ("f", "json"),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let decoded: CountResponse = decode(&read_body(response).await?)?;
        Ok(decoded.count)
    }

    async fn insert(
        &self,
        table: Table,
        rows: Vec<Row>,
        token: &str,
    ) -> Result<Vec<EditResult>, RemoteError> {
        let features: Vec<Value> = rows.iter().map(|row| json!({ "attributes": row })).collect();
        let features = serde_json::to_string(&features)
            .map_err(|err| RemoteError::Malformed(err.to_string()))?;
        let decoded: AddResponse = self
            .post_edits(
                table,
                "addFeatures",
                &[("features", features.as_str()), ("token", token), ("f", "json")],
            )
            .await?;
        Ok(decoded.add_results.into_iter().map(EditResult::from).collect())
    }

    async fn delete(
        &self,
        table: Table,
        ids: &[ObjectId],
        token: &str,
    ) -> Result<Vec<EditResult>, RemoteError> {
        let object_ids = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let decoded: DeleteResponse = self
            .post_edits(
                table,
                "deleteFeatures",
                &[("objectIds", object_ids.as_str()), ("token", token), ("f", "json")],
            )
            .await?;
        Ok(decoded.delete_results.into_iter().map(EditResult::from).collect())
    }
}

// ===== LAYER SERVICE =====

/// Resolves layer URLs by reading the layer's service description.
pub struct RestLayerService {
    http: reqwest::Client,
}

impl RestLayerService {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl LayerService for RestLayerService {
    async fn resolve(&self, url: &str) -> Result<LiveLayer, RemoteError> {
        let parsed = Url::parse(url)
            .map_err(|err| RemoteError::Rejected(format!("invalid layer URL {url:?}: {err}")))?;
        let response = self
            .http
            .get(parsed)
            .query(&[("f", "json")])
            .send()
            .await
            .map_err(transport_error)?;
        let info: Value = decode(&read_body(response).await?)?;
        Ok(live_layer_from_info(url, &info))
    }
}

/// Builds a live layer from a layer's `?f=json` description.
fn live_layer_from_info(url: &str, info: &Value) -> LiveLayer {
    let kind = match info.get("type").and_then(Value::as_str) {
        Some("Feature Layer") => LayerKind::Feature,
        Some(other) => LayerKind::Other(other.to_string()),
        None => LayerKind::Other("Unknown".to_string()),
    };
    LiveLayer {
        title: info
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        renderer: info.pointer("/drawingInfo/renderer").cloned(),
        definition_expression: info
            .get("definitionExpression")
            .and_then(Value::as_str)
            .filter(|expression| !expression.trim().is_empty())
            .map(str::to_string),
        ..LiveLayer::new(url, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables_section() -> TablesSection {
        TablesSection {
            categories: "https://host/arcgis/rest/services/oem/FeatureServer/0".to_string(),
            layers: "https://host/arcgis/rest/services/oem/FeatureServer/1/".to_string(),
            templates: "https://host/arcgis/rest/services/oem/FeatureServer/2".to_string(),
            template_layer_relationships: "https://host/arcgis/rest/services/oem/FeatureServer/3"
                .to_string(),
        }
    }

    #[test]
    fn test_endpoints() {
        let client = FeatureServiceClient::new(reqwest::Client::new(), &tables_section()).unwrap();
        assert_eq!(
            client.endpoint(Table::Categories, "query").unwrap().as_str(),
            "https://host/arcgis/rest/services/oem/FeatureServer/0/query"
        );
        assert_eq!(
            client.endpoint(Table::Layers, "addFeatures").unwrap().as_str(),
            "https://host/arcgis/rest/services/oem/FeatureServer/1/addFeatures"
        );
    }

    #[test]
    fn test_invalid_table_url_is_a_connection_error() {
        let mut tables = tables_section();
        tables.templates = "FeatureServer/2".to_string();

        let err = FeatureServiceClient::new(reqwest::Client::new(), &tables).err().unwrap();
        assert!(matches!(err, DashboardError::Connection { table: Table::Templates, .. }));
    }

    #[test]
    fn test_decode_service_error() {
        let body = r#"{"error": {"code": 400, "message": "Unable to complete operation.", "details": ["Invalid where clause"]}}"#;
        let err = decode::<QueryResponse>(body).err().unwrap();
        assert_eq!(
            err,
            RemoteError::Rejected("Unable to complete operation. (Invalid where clause) [code 400]".to_string())
        );
    }

    #[test]
    fn test_decode_malformed_body() {
        assert!(matches!(decode::<CountResponse>("<html>"), Err(RemoteError::Malformed(_))));
        assert!(matches!(decode::<CountResponse>(r#"{"total": 3}"#), Err(RemoteError::Malformed(_))));
    }

    #[test]
    fn test_decode_query_rows() {
        let body = r#"{"features": [{"attributes": {"OBJECTID": 1, "TITLE": "Parks"}}]}"#;
        let decoded: QueryResponse = decode(body).unwrap();
        assert_eq!(decoded.features[0].attributes.text("TITLE").as_deref(), Some("Parks"));
    }

    #[test]
    fn test_add_results() {
        let body = r#"{"addResults": [
            {"objectId": 12, "success": true},
            {"objectId": -1, "success": false, "error": {"code": 1000, "description": "Invalid TEMPLATEID"}}
        ]}"#;
        let decoded: AddResponse = decode(body).unwrap();
        let results: Vec<EditResult> = decoded.add_results.into_iter().map(EditResult::from).collect();
        assert_eq!(results[0], EditResult::succeeded(12));
        assert!(!results[1].success);
        assert_eq!(results[1].error.as_deref(), Some("Invalid TEMPLATEID [code 1000]"));
    }

    #[test]
    fn test_layer_info() {
        let info = json!({
            "type": "Feature Layer",
            "name": "parks",
            "definitionExpression": "",
            "drawingInfo": {"renderer": {"type": "simple"}}
        });
        let layer = live_layer_from_info("https://host/FeatureServer/4", &info);
        assert!(layer.is_feature());
        assert_eq!(layer.title, "parks");
        assert_eq!(layer.definition_expression, None);
        assert_eq!(layer.renderer, Some(json!({"type": "simple"})));

        let raster = live_layer_from_info("https://host/ImageServer", &json!({"type": "Raster Layer"}));
        assert_eq!(raster.kind, LayerKind::Other("Raster Layer".to_string()));
    }
}
