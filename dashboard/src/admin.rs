//! Authenticated maintenance of the reference tables: categories, layers and
//! templates.

use crate::entities::{CategoryId, LayerId, TemplateId};
use crate::error::{DashboardError, LoadStage};
use crate::remote::{CredentialProvider, TableClient, ensure_applied};
use shared::{ObjectId, Query, Row, Table, fields};
use std::sync::Arc;

/// A layer row to insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewLayer {
    pub title: String,
    pub url: String,
    pub scope: Option<String>,
    pub category: Option<CategoryId>,
    /// Serialized renderer; must be JSON when present.
    pub renderer: Option<String>,
    pub filter: Option<String>,
    pub source: Option<String>,
    pub description: Option<String>,
}

impl NewLayer {
    fn into_row(self) -> Result<Row, DashboardError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(DashboardError::Validation("please enter a title".to_string()));
        }
        let url = self.url.trim();
        if url.is_empty() {
            return Err(DashboardError::Validation("please enter a URL".to_string()));
        }

        let mut row = Row::new().with(fields::TITLE, title).with(fields::URL, url);
        if let Some(renderer) = non_blank(self.renderer) {
            if let Err(err) = serde_json::from_str::<serde_json::Value>(&renderer) {
                return Err(DashboardError::Validation(format!("the renderer is not valid JSON ({err})")));
            }
            row.set(fields::RENDERER, renderer);
        }
        if let Some(category) = self.category {
            row.set(fields::CATEGORYID, category.0);
        }
        for (field, value) in [
            (fields::SCOPE, self.scope),
            (fields::FILTER, self.filter),
            (fields::SOURCE, self.source),
            (fields::DESCRIPTION, self.description),
        ] {
            if let Some(value) = non_blank(value) {
                row.set(field, value);
            }
        }
        Ok(row)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct ReferenceDataAdmin {
    client: Arc<dyn TableClient>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ReferenceDataAdmin {
    pub fn new(client: Arc<dyn TableClient>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub async fn add_category(&self, title: &str) -> Result<CategoryId, DashboardError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DashboardError::Validation("please enter a title".to_string()));
        }
        let id = self
            .insert(Table::Categories, Row::new().with(fields::TITLE, title))
            .await?;
        log::info!("Added category {title:?} as {id}");
        Ok(CategoryId(id))
    }

    pub async fn delete_category(&self, id: CategoryId) -> Result<(), DashboardError> {
        let token = self.token().await?;
        self.delete(Table::Categories, &[id.0], &token).await?;
        log::info!("Deleted category {id}");
        Ok(())
    }

    pub async fn add_layer(&self, layer: NewLayer) -> Result<LayerId, DashboardError> {
        let row = layer.into_row()?;
        let id = self.insert(Table::Layers, row).await?;
        log::info!("Added layer {id}");
        Ok(LayerId(id))
    }

    /// Deletes a layer and every relationship row that points at it.
    pub async fn delete_layer(&self, id: LayerId) -> Result<(), DashboardError> {
        let token = self.token().await?;
        self.delete_relationships(fields::LAYERID, id.0, &token).await?;
        self.delete(Table::Layers, &[id.0], &token).await?;
        log::info!("Deleted layer {id}");
        Ok(())
    }

    /// Deletes a template and its relationship rows.
    pub async fn delete_template(&self, id: TemplateId) -> Result<(), DashboardError> {
        let token = self.token().await?;
        self.delete_relationships(fields::TEMPLATEID, id.0, &token).await?;
        self.delete(Table::Templates, &[id.0], &token).await?;
        log::info!("Deleted template {id}");
        Ok(())
    }

    async fn delete_relationships(
        &self,
        field: &str,
        id: ObjectId,
        token: &str,
    ) -> Result<(), DashboardError> {
        let stage = LoadStage::Relationships;
        let rows = self
            .client
            .query(stage.table(), &Query::equals(field, id).fields(&[fields::OBJECTID]))
            .await
            .map_err(|err| DashboardError::from_stage(stage, err))?;
        let ids: Vec<ObjectId> = rows
            .iter()
            .filter_map(|row| row.integer(fields::OBJECTID))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        log::debug!("Deleting {} relationship rows with {field} = {id}", ids.len());
        self.delete(stage.table(), &ids, token).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<ObjectId, DashboardError> {
        let token = self.token().await?;
        let results = self
            .client
            .insert(table, vec![row], &token)
            .await
            .map_err(|err| DashboardError::RemoteWrite(err.to_string()))?;
        ensure_applied(table, results, 1)?
            .first()
            .and_then(|result| result.object_id)
            .ok_or_else(|| DashboardError::RemoteWrite(format!("no OBJECTID returned by {table}")))
    }

    async fn delete(&self, table: Table, ids: &[ObjectId], token: &str) -> Result<(), DashboardError> {
        let results = self
            .client
            .delete(table, ids, token)
            .await
            .map_err(|err| DashboardError::RemoteWrite(err.to_string()))?;
        ensure_applied(table, results, ids.len()).map(|_| ())
    }

    async fn token(&self) -> Result<String, DashboardError> {
        self.credentials
            .token()
            .await
            .map_err(|err| DashboardError::Auth(err.to_string()))
    }
}
