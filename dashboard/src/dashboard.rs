//! The dashboard as the presentation layer sees it.
//!
//! [`Dashboard`] wires the builder, the materializer, the active-set
//! controller and template persistence together. Presenters drive it through
//! its operations and follow along on the streams returned by
//! [`Dashboard::new`].

use crate::active_set::{ActiveSetController, ActiveSnapshot};
use crate::builder::EntityBuilder;
use crate::entities::{Catalog, Category, LayerId, Template, TemplateId};
use crate::error::{DashboardError, LoadStage};
use crate::map::{LiveLayer, MapSurface};
use crate::materializer::Materializer;
use crate::notifications::{Notification, Notifier};
use crate::persistence::TemplatePersistence;
use crate::relay::relay;
use crate::remote::{CredentialProvider, LayerService, TableClient};
use futures::channel::mpsc::UnboundedReceiver;
use shared::{Query, Table, fields};
use std::sync::Arc;

/// External services the dashboard runs against.
pub struct Collaborators {
    pub tables: Arc<dyn TableClient>,
    pub layers: Arc<dyn LayerService>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub map: Arc<dyn MapSurface>,
}

pub struct DashboardStreams {
    pub notifications: UnboundedReceiver<Notification>,
    pub snapshots: UnboundedReceiver<ActiveSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed(LoadStage),
}

/// Source details of a dashboard layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub source: String,
    pub description: String,
    pub url: String,
}

impl LayerInfo {
    const PLACEHOLDER: &'static str = "Error";

    fn unavailable(url: &str) -> Self {
        Self {
            source: Self::PLACEHOLDER.to_string(),
            description: Self::PLACEHOLDER.to_string(),
            url: url.to_string(),
        }
    }
}

pub struct Dashboard {
    controller: ActiveSetController,
    builder: EntityBuilder,
    persistence: TemplatePersistence,
    tables: Arc<dyn TableClient>,
    materializer: Arc<Materializer>,
    map: Arc<dyn MapSurface>,
    notifier: Notifier,
    basemap: String,
    view_attached: bool,
    state: LoadState,
}

impl Dashboard {
    pub fn new(collaborators: Collaborators, basemap: impl Into<String>) -> (Self, DashboardStreams) {
        let (notification_relay, notifications) = relay();
        let (snapshot_relay, snapshots) = relay();
        let notifier = Notifier::new(notification_relay);

        let materializer = Arc::new(Materializer::new(collaborators.layers, notifier.clone()));
        let dashboard = Self {
            controller: ActiveSetController::new(
                collaborators.map.clone(),
                materializer.clone(),
                notifier.clone(),
                snapshot_relay,
            ),
            builder: EntityBuilder::new(collaborators.tables.clone(), materializer.clone()),
            persistence: TemplatePersistence::new(
                collaborators.tables.clone(),
                collaborators.credentials,
            ),
            tables: collaborators.tables,
            materializer,
            map: collaborators.map,
            notifier,
            basemap: basemap.into(),
            view_attached: false,
            state: LoadState::Idle,
        };
        (
            dashboard,
            DashboardStreams {
                notifications,
                snapshots,
            },
        )
    }

    // ===== LOADING =====

    /// Runs the full load sequence and installs the result. On failure the
    /// previous catalog stays and the state names the failing stage.
    pub async fn load(&mut self) -> Result<(), DashboardError> {
        self.state = LoadState::Loading;
        match self.builder.load().await {
            Ok(catalog) => {
                log::info!(
                    "Loaded {} categories, {} templates, {} layers",
                    catalog.categories().count(),
                    catalog.templates().count(),
                    catalog.layers().count()
                );
                self.controller.replace_catalog(catalog);
                self.state = LoadState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = LoadState::Failed(err.load_stage().unwrap_or(LoadStage::Categories));
                self.notifier.error(&err);
                Err(err)
            }
        }
    }

    /// Waits until every background materialization has finished.
    pub async fn settle(&self) {
        self.materializer.settle().await;
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    /// Marks a map view as attached. The first attach sets the configured
    /// basemap.
    pub fn attach_view(&mut self) {
        if !self.view_attached {
            self.map.set_basemap(&self.basemap);
            self.view_attached = true;
        }
    }

    // ===== ACTIVE SET =====

    pub async fn activate_layer(&mut self, id: LayerId) -> Result<bool, DashboardError> {
        self.controller.activate_layer(id).await
    }

    pub async fn activate_template(&mut self, id: TemplateId) -> Result<(), DashboardError> {
        self.controller.activate_template(id).await
    }

    pub fn deactivate_layer(&mut self, live: &LiveLayer) {
        self.controller.deactivate_layer(live)
    }

    pub fn deactivate_template(&mut self, id: TemplateId) -> Result<(), DashboardError> {
        self.controller.deactivate_template(id)
    }

    pub fn clear_all(&mut self) {
        self.controller.clear_all()
    }

    pub fn templates_of(&self, live: &LiveLayer, active_only: bool) -> Vec<&Template> {
        self.controller.templates_of(live, active_only)
    }

    pub fn category_of(&self, live: &LiveLayer) -> Option<&Category> {
        self.controller.category_of(live)
    }

    pub fn catalog(&self) -> &Catalog {
        self.controller.catalog()
    }

    pub fn snapshot(&self) -> ActiveSnapshot {
        self.controller.snapshot()
    }

    pub fn map(&self) -> &Arc<dyn MapSurface> {
        &self.map
    }

    // ===== TEMPLATES =====

    /// Saves the active dashboard layers as a new template, then refetches
    /// templates so it shows up in the catalog.
    pub async fn save_template(&mut self, title: &str) -> Result<TemplateId, DashboardError> {
        let layers = self.controller.layers_to_save();
        let id = match self.persistence.save_template(title, &layers).await {
            Ok(id) => id,
            Err(err) => {
                self.notifier.error(&err);
                return Err(err);
            }
        };
        self.notifier.notify(Notification::template_saved(title.trim()));

        if let Err(err) = self.builder.refetch_templates(self.controller.catalog_mut()).await {
            log::warn!("Template {id} was saved but templates could not be reloaded");
            self.notifier.error(&err);
        }
        self.controller.sync_after_refetch();
        Ok(id)
    }

    // ===== LAYER INFO =====

    /// Source and description of a dashboard layer; `None` for map layers the
    /// dashboard does not own. A failed lookup is reported and yields
    /// placeholder text.
    pub async fn layer_info(&self, live: &LiveLayer) -> Option<LayerInfo> {
        let id = self.catalog().layer_for(live)?.id;
        self.layer_info_by_id(id).await
    }

    pub async fn layer_info_by_id(&self, id: LayerId) -> Option<LayerInfo> {
        let wrapper = self.catalog().layer(id)?;
        let query = Query::equals(fields::OBJECTID, id.0).fields(&[fields::SOURCE, fields::DESCRIPTION]);

        let failure = match self.tables.query(Table::Layers, &query).await {
            Ok(rows) => match rows.first() {
                Some(row) => {
                    return Some(LayerInfo {
                        source: row.text(fields::SOURCE).unwrap_or_default(),
                        description: row.text(fields::DESCRIPTION).unwrap_or_default(),
                        url: wrapper.url.clone(),
                    });
                }
                None => format!("no layer row with OBJECTID {id}"),
            },
            Err(err) => err.to_string(),
        };
        self.notifier.notify(Notification::layer_info_failed(failure));
        Some(LayerInfo::unavailable(&wrapper.url))
    }
}
