//! Writes new templates and their layer associations.

use crate::entities::{LayerId, TemplateId};
use crate::error::{DashboardError, LoadStage};
use crate::remote::{CredentialProvider, TableClient, ensure_applied};
use serde_json::Value;
use shared::{EditResult, Row, Table, equality_clause, fields};
use std::sync::Arc;

pub struct TemplatePersistence {
    client: Arc<dyn TableClient>,
    credentials: Arc<dyn CredentialProvider>,
}

impl TemplatePersistence {
    pub fn new(client: Arc<dyn TableClient>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Inserts a Templates row titled `title` and one relationship row per
    /// entry of `layers`, in order. Returns the new template's id.
    ///
    /// The two inserts are not atomic: when the relationship batch is
    /// rejected the template row stays behind without members.
    pub async fn save_template(
        &self,
        title: &str,
        layers: &[LayerId],
    ) -> Result<TemplateId, DashboardError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DashboardError::Validation("please enter a title".to_string()));
        }

        let existing = self
            .client
            .count(Table::Templates, &equality_clause(fields::TITLE, &Value::from(title)))
            .await
            .map_err(|err| DashboardError::from_stage(LoadStage::Templates, err))?;
        if existing > 0 {
            return Err(DashboardError::DuplicateTitle(title.to_string()));
        }

        let token = self
            .credentials
            .token()
            .await
            .map_err(|err| DashboardError::Auth(err.to_string()))?;

        let template_row = Row::new().with(fields::TITLE, title);
        let results = self.insert(Table::Templates, vec![template_row], &token).await?;
        let template_id = results
            .first()
            .and_then(|result| result.object_id)
            .map(TemplateId)
            .ok_or_else(|| DashboardError::RemoteWrite("no OBJECTID returned for the new template".to_string()))?;
        log::info!("Inserted template {title:?} as {template_id}");

        if layers.is_empty() {
            log::debug!("Template {title:?} has no active layers to associate");
            return Ok(template_id);
        }

        let relationship_rows = layers
            .iter()
            .map(|layer| {
                Row::new()
                    .with(fields::TEMPLATEID, template_id.0)
                    .with(fields::LAYERID, layer.0)
            })
            .collect();
        if let Err(err) = self
            .insert(Table::TemplateLayerRelationships, relationship_rows, &token)
            .await
        {
            log::warn!("Template {template_id} was saved without layers");
            return Err(err);
        }

        Ok(template_id)
    }

    async fn insert(
        &self,
        table: Table,
        rows: Vec<Row>,
        token: &str,
    ) -> Result<Vec<EditResult>, DashboardError> {
        let expected = rows.len();
        let results = self
            .client
            .insert(table, rows, token)
            .await
            .map_err(|err| DashboardError::RemoteWrite(err.to_string()))?;
        ensure_applied(table, results, expected)
    }
}
