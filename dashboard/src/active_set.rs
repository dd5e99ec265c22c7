//! Tracks which layers and templates are shown and keeps the map in step.
//!
//! Every mutation takes `&mut self`, so one controller never runs two
//! activations at once. Observers follow along through [`ActiveSnapshot`]s
//! published on the snapshot relay.

use crate::entities::{Catalog, Category, LayerId, Template, TemplateId};
use crate::error::DashboardError;
use crate::map::{LiveLayer, MapSurface};
use crate::materializer::Materializer;
use crate::notifications::Notifier;
use crate::relay::Relay;
use indexmap::IndexSet;
use std::hash::Hash;
use std::sync::Arc;

/// Active layer and template ids in activation order.
#[derive(Debug, Clone, Default)]
struct ActiveSets {
    layers: IndexSet<LayerId>,
    templates: IndexSet<TemplateId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSnapshot {
    pub layers: Vec<LayerId>,
    pub templates: Vec<TemplateId>,
}

pub struct ActiveSetController {
    catalog: Catalog,
    active: ActiveSets,
    map: Arc<dyn MapSurface>,
    materializer: Arc<Materializer>,
    notifier: Notifier,
    snapshot_relay: Relay<ActiveSnapshot>,
}

impl ActiveSetController {
    pub fn new(
        map: Arc<dyn MapSurface>,
        materializer: Arc<Materializer>,
        notifier: Notifier,
        snapshot_relay: Relay<ActiveSnapshot>,
    ) -> Self {
        Self {
            catalog: Catalog::default(),
            active: ActiveSets::default(),
            map,
            materializer,
            notifier,
            snapshot_relay,
        }
    }

    // ===== OPERATIONS =====

    /// Shows a layer, materializing it first if needed. Returns whether the
    /// layer is active afterwards; a layer that fails to resolve or to reach
    /// the map is reported and stays inactive.
    pub async fn activate_layer(&mut self, id: LayerId) -> Result<bool, DashboardError> {
        let wrapper = self
            .catalog
            .layer(id)
            .ok_or(DashboardError::UnknownLayer(id))?;
        if self.active.layers.contains(&id) {
            return Ok(true);
        }

        let mut layer = match self.materializer.ensure(wrapper).await {
            Ok(layer) => layer,
            Err(err) => {
                self.notifier.error(&err);
                return Ok(false);
            }
        };
        layer.visible = true;

        if let Err(err) = self.map.add(layer) {
            self.notifier.error(&DashboardError::MapMutation {
                title: wrapper.title.clone(),
                message: err.to_string(),
            });
            return Ok(false);
        }

        log::debug!("Activated layer {}", wrapper.title);
        self.active.layers.insert(id);
        self.publish();
        Ok(true)
    }

    /// Selects a template and activates each member independently.
    pub async fn activate_template(&mut self, id: TemplateId) -> Result<(), DashboardError> {
        let template = self
            .catalog
            .template(id)
            .ok_or(DashboardError::UnknownTemplate(id))?;
        let members = template.layer_wrappers.clone();

        if self.active.templates.insert(id) {
            log::debug!("Activated template {}", template.title);
        }
        for member in members {
            if let Err(err) = self.activate_layer(member).await {
                self.notifier.error(&err);
            }
        }
        self.publish();
        Ok(())
    }

    /// Hides a live layer. Layers the dashboard does not own are only removed
    /// from the map. Templates left without an active member are deselected.
    pub fn deactivate_layer(&mut self, live: &LiveLayer) {
        self.remove_from_map(&live.id, &live.title);

        let Some(id) = LayerId::from_live(live).filter(|id| self.catalog.contains_layer(*id))
        else {
            log::debug!("Layer {} is not a dashboard layer", live.id);
            return;
        };
        self.active.layers.shift_remove(&id);
        self.release_templates_of(id);
        self.publish();
    }

    /// Deselects a template and hides every member no other active template
    /// still references. Members are released even when the template itself
    /// was not selected.
    pub fn deactivate_template(&mut self, id: TemplateId) -> Result<(), DashboardError> {
        let template = self
            .catalog
            .template(id)
            .ok_or(DashboardError::UnknownTemplate(id))?;
        if !self.active.templates.shift_remove(&id) {
            log::debug!("Template {} is not active", template.title);
        }

        for member in &template.layer_wrappers {
            if !self.active.layers.contains(member) {
                continue;
            }
            let Some(wrapper) = self.catalog.layer(*member) else {
                continue;
            };
            if still_referenced(&wrapper.templates, &self.active.templates) {
                continue;
            }
            self.active.layers.shift_remove(member);
            self.remove_from_map(&member.to_string(), &wrapper.title);
        }
        self.publish();
        Ok(())
    }

    /// Empties both sets and every operational layer from the map.
    pub fn clear_all(&mut self) {
        self.active.layers.clear();
        self.active.templates.clear();
        self.map.remove_all();
        self.publish();
    }

    // ===== READS =====

    /// Templates containing a live layer's wrapper, optionally only the
    /// active ones.
    pub fn templates_of(&self, live: &LiveLayer, active_only: bool) -> Vec<&Template> {
        let Some(wrapper) = self.catalog.layer_for(live) else {
            return Vec::new();
        };
        wrapper
            .templates
            .iter()
            .filter(|id| !active_only || self.active.templates.contains(*id))
            .filter_map(|id| self.catalog.template(*id))
            .collect()
    }

    pub fn category_of(&self, live: &LiveLayer) -> Option<&Category> {
        self.catalog
            .layer_for(live)
            .and_then(|wrapper| wrapper.category)
            .and_then(|id| self.catalog.category(id))
    }

    /// Members for a new template: the map's layers in map order, limited to
    /// dashboard layers that are active.
    pub fn layers_to_save(&self) -> Vec<LayerId> {
        let mut ids = IndexSet::new();
        for layer in self.map.all_layers() {
            let Some(id) = LayerId::from_live(&layer) else {
                continue;
            };
            if self.catalog.contains_layer(id) && self.active.layers.contains(&id) {
                ids.insert(id);
            }
        }
        ids.into_iter().collect()
    }

    pub fn is_layer_active(&self, id: LayerId) -> bool {
        self.active.layers.contains(&id)
    }

    pub fn is_template_active(&self, id: TemplateId) -> bool {
        self.active.templates.contains(&id)
    }

    pub fn snapshot(&self) -> ActiveSnapshot {
        ActiveSnapshot {
            layers: self.active.layers.iter().copied().collect(),
            templates: self.active.templates.iter().copied().collect(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    // ===== CATALOG CHANGES =====

    /// Installs a freshly loaded catalog. Anything shown for the previous
    /// catalog is cleared first.
    pub fn replace_catalog(&mut self, catalog: Catalog) {
        self.clear_all();
        self.catalog = catalog;
    }

    /// Drops active template ids that vanished in a template refetch.
    pub fn sync_after_refetch(&mut self) {
        let catalog = &self.catalog;
        let before = self.active.templates.len();
        self.active
            .templates
            .retain(|id| catalog.template(*id).is_some());
        if self.active.templates.len() != before {
            log::warn!(
                "{} active templates disappeared after refetch",
                before - self.active.templates.len()
            );
        }
        self.publish();
    }

    // ===== CASCADES =====

    /// Deselects active templates of `id` that have no active member left.
    fn release_templates_of(&mut self, id: LayerId) {
        let Some(wrapper) = self.catalog.layer(id) else {
            return;
        };
        let catalog = &self.catalog;
        let active_layers = &self.active.layers;
        self.active.templates.retain(|template_id| {
            if !wrapper.templates.contains(template_id) {
                return true;
            }
            let keep = catalog
                .template(*template_id)
                .is_some_and(|template| still_referenced(&template.layer_wrappers, active_layers));
            if !keep {
                log::debug!("Template {template_id} has no active layers left");
            }
            keep
        });
    }

    fn remove_from_map(&self, layer_id: &str, title: &str) {
        if let Err(err) = self.map.remove(layer_id) {
            self.notifier.error(&DashboardError::MapMutation {
                title: title.to_string(),
                message: err.to_string(),
            });
        }
    }

    fn publish(&self) {
        self.snapshot_relay.send(self.snapshot());
    }
}

/// Whether any of `references` is still in `active`. Shared by both
/// cascades: template members against active layers, and a layer's
/// templates against active templates.
fn still_referenced<T: Hash + Eq>(references: &[T], active: &IndexSet<T>) -> bool {
    references.iter().any(|reference| active.contains(reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EntityBuilder;
    use crate::entities::CategoryId;
    use crate::notifications::Notification;
    use crate::relay::relay;
    use crate::testing::{FlakyMap, MemoryLayerService, MemoryTables};
    use futures::channel::mpsc::UnboundedReceiver;
    use shared::{Row, Table};

    struct Fixture {
        controller: ActiveSetController,
        map: Arc<FlakyMap>,
        notifications: UnboundedReceiver<Notification>,
        snapshots: UnboundedReceiver<ActiveSnapshot>,
    }

    fn tables() -> MemoryTables {
        let tables = MemoryTables::new();
        tables.seed(Table::Categories, vec![
            Row::new().with("OBJECTID", 1).with("TITLE", "Parks"),
            Row::new().with("OBJECTID", 2).with("TITLE", "Transit"),
        ]);
        tables.seed(Table::Templates, vec![
            Row::new().with("OBJECTID", 5).with("TITLE", "Spring Event"),
            Row::new().with("OBJECTID", 6).with("TITLE", "Flood"),
            Row::new().with("OBJECTID", 7).with("TITLE", "Empty"),
        ]);
        tables.seed(Table::Layers, vec![
            MemoryTables::layer_row(10, "Parks", "City", 1),
            MemoryTables::layer_row(11, "Trails", "City", 1),
            MemoryTables::layer_row(20, "Bus Stops", "County", 2),
        ]);
        tables.seed(Table::TemplateLayerRelationships, vec![
            MemoryTables::relationship_row(100, 5, 10),
            MemoryTables::relationship_row(101, 5, 11),
            MemoryTables::relationship_row(102, 6, 11),
            MemoryTables::relationship_row(103, 6, 20),
        ]);
        tables
    }

    async fn fixture(tables: MemoryTables) -> Fixture {
        let (notification_relay, notifications) = relay();
        let (snapshot_relay, snapshots) = relay();
        let notifier = Notifier::new(notification_relay);
        let materializer = Arc::new(Materializer::new(
            Arc::new(MemoryLayerService::new()),
            notifier.clone(),
        ));
        let builder = EntityBuilder::new(Arc::new(tables), materializer.clone());
        let catalog = builder.load().await.unwrap();
        materializer.settle().await;

        let map = Arc::new(FlakyMap::new());
        let mut controller =
            ActiveSetController::new(map.clone(), materializer, notifier, snapshot_relay);
        controller.replace_catalog(catalog);
        Fixture {
            controller,
            map,
            notifications,
            snapshots,
        }
    }

    fn live(controller: &ActiveSetController, id: i64) -> LiveLayer {
        controller
            .catalog()
            .layer(LayerId(id))
            .and_then(|wrapper| wrapper.live_layer())
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_activate_single_layer() {
        let tables = MemoryTables::new();
        tables.seed(Table::Categories, vec![Row::new().with("OBJECTID", 1).with("TITLE", "Parks")]);
        tables.seed(Table::Layers, vec![
            Row::new()
                .with("OBJECTID", 10)
                .with("TITLE", "Parks")
                .with("URL", "url1")
                .with("CATEGORYID", 1),
        ]);
        let mut fx = fixture(tables).await;
        assert!(fx.controller.snapshot().layers.is_empty());

        assert!(fx.controller.activate_layer(LayerId(10)).await.unwrap());

        assert_eq!(fx.controller.snapshot().layers, vec![LayerId(10)]);
        assert_eq!(fx.map.layer_ids(), vec!["10"]);
        assert!(fx.map.headless().operational_layers()[0].visible);
    }

    #[tokio::test]
    async fn test_activate_layer_is_idempotent() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_layer(LayerId(10)).await.unwrap();
        fx.controller.activate_layer(LayerId(10)).await.unwrap();

        assert_eq!(fx.map.layer_ids(), vec!["10"]);
        assert_eq!(fx.controller.snapshot().layers, vec![LayerId(10)]);
    }

    #[tokio::test]
    async fn test_unknown_layer_is_an_error() {
        let mut fx = fixture(tables()).await;
        let err = fx.controller.activate_layer(LayerId(99)).await.unwrap_err();
        assert_eq!(err, DashboardError::UnknownLayer(LayerId(99)));
    }

    #[tokio::test]
    async fn test_deactivate_template_removes_all_members() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(5)).await.unwrap();
        assert_eq!(fx.map.layer_ids(), vec!["10", "11"]);

        fx.controller.deactivate_template(TemplateId(5)).unwrap();

        let snapshot = fx.controller.snapshot();
        assert!(snapshot.layers.is_empty());
        assert!(snapshot.templates.is_empty());
        assert!(fx.map.layer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_activate_template_twice_matches_once() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(5)).await.unwrap();
        let once = fx.controller.snapshot();
        fx.controller.activate_template(TemplateId(5)).await.unwrap();

        assert_eq!(fx.controller.snapshot(), once);
        assert_eq!(fx.map.layer_ids(), vec!["10", "11"]);
    }

    #[tokio::test]
    async fn test_shared_member_survives_first_template() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(5)).await.unwrap();
        fx.controller.activate_template(TemplateId(6)).await.unwrap();

        fx.controller.deactivate_template(TemplateId(5)).unwrap();
        assert!(!fx.controller.is_layer_active(LayerId(10)));
        assert!(fx.controller.is_layer_active(LayerId(11)));
        assert!(fx.controller.is_layer_active(LayerId(20)));

        fx.controller.deactivate_template(TemplateId(6)).unwrap();
        assert!(!fx.controller.is_layer_active(LayerId(11)));
        assert!(fx.map.layer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_deactivating_inactive_template_releases_members() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_layer(LayerId(10)).await.unwrap();
        fx.controller.activate_layer(LayerId(11)).await.unwrap();

        fx.controller.deactivate_template(TemplateId(5)).unwrap();

        assert!(!fx.controller.is_template_active(TemplateId(5)));
        assert!(fx.controller.snapshot().layers.is_empty());
        assert!(fx.map.layer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_deactivating_inactive_template_keeps_other_template_members() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(6)).await.unwrap();
        fx.controller.activate_layer(LayerId(10)).await.unwrap();

        fx.controller.deactivate_template(TemplateId(5)).unwrap();

        assert_eq!(fx.controller.snapshot().layers, vec![LayerId(11), LayerId(20)]);
        assert_eq!(fx.map.layer_ids(), vec!["11", "20"]);
    }

    #[tokio::test]
    async fn test_layer_cascade_releases_empty_templates() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(5)).await.unwrap();

        let parks = live(&fx.controller, 10);
        fx.controller.deactivate_layer(&parks);
        assert!(fx.controller.is_template_active(TemplateId(5)));
        assert_eq!(fx.map.layer_ids(), vec!["11"]);

        let trails = live(&fx.controller, 11);
        fx.controller.deactivate_layer(&trails);
        assert!(!fx.controller.is_template_active(TemplateId(5)));
        assert!(fx.controller.snapshot().layers.is_empty());
    }

    #[tokio::test]
    async fn test_deactivating_foreign_or_inactive_layer_is_graceful() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(6)).await.unwrap();

        fx.controller.deactivate_layer(&LiveLayer::basemap("arcgis-topographic"));
        let parks = live(&fx.controller, 10);
        fx.controller.deactivate_layer(&parks);

        assert!(fx.controller.is_template_active(TemplateId(6)));
        assert_eq!(fx.controller.snapshot().layers, vec![LayerId(11), LayerId(20)]);
    }

    #[tokio::test]
    async fn test_empty_template_activates() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(7)).await.unwrap();

        assert_eq!(fx.controller.snapshot().templates, vec![TemplateId(7)]);
        assert!(fx.controller.snapshot().layers.is_empty());
    }

    #[tokio::test]
    async fn test_map_failure_keeps_layer_inactive() {
        let mut fx = fixture(tables()).await;
        fx.map.reject("11");

        fx.controller.activate_template(TemplateId(5)).await.unwrap();

        assert!(fx.controller.is_template_active(TemplateId(5)));
        assert_eq!(fx.controller.snapshot().layers, vec![LayerId(10)]);
        assert_eq!(fx.map.layer_ids(), vec!["10"]);

        let notification = fx.notifications.try_recv().unwrap();
        assert_eq!(notification.message, "Error adding layer City Trails!");
    }

    #[tokio::test]
    async fn test_layers_to_save_follow_map_order() {
        let mut fx = fixture(tables()).await;
        fx.map.set_basemap("arcgis-topographic");
        fx.controller.activate_layer(LayerId(20)).await.unwrap();
        fx.controller.activate_layer(LayerId(10)).await.unwrap();
        fx.map.add(LiveLayer::basemap("sketch")).unwrap();

        assert_eq!(fx.controller.layers_to_save(), vec![LayerId(20), LayerId(10)]);
    }

    #[tokio::test]
    async fn test_read_helpers() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(6)).await.unwrap();
        let trails = live(&fx.controller, 11);

        let all: Vec<&str> = fx
            .controller
            .templates_of(&trails, false)
            .iter()
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(all, vec!["Spring Event", "Flood"]);

        let active: Vec<TemplateId> = fx
            .controller
            .templates_of(&trails, true)
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec![TemplateId(6)]);

        assert_eq!(fx.controller.category_of(&trails).map(|c| c.id), Some(CategoryId(1)));
        assert!(fx.controller.category_of(&LiveLayer::basemap("streets")).is_none());
    }

    #[tokio::test]
    async fn test_clear_all_keeps_basemap() {
        let mut fx = fixture(tables()).await;
        fx.map.set_basemap("arcgis-topographic");
        fx.controller.activate_template(TemplateId(5)).await.unwrap();

        fx.controller.clear_all();

        assert_eq!(fx.controller.snapshot(), ActiveSnapshot::default());
        assert!(fx.map.layer_ids().is_empty());
        assert!(fx.map.headless().basemap().is_some());
    }

    #[tokio::test]
    async fn test_refetch_drops_vanished_templates() {
        let mut fx = fixture(tables()).await;
        fx.controller.activate_template(TemplateId(7)).await.unwrap();
        fx.controller.activate_template(TemplateId(5)).await.unwrap();

        fx.controller.catalog_mut().templates.shift_remove(&TemplateId(7));
        fx.controller.sync_after_refetch();

        assert_eq!(fx.controller.snapshot().templates, vec![TemplateId(5)]);
    }

    #[tokio::test]
    async fn test_mutations_publish_snapshots() {
        let mut fx = fixture(tables()).await;
        while fx.snapshots.try_recv().is_ok() {}

        fx.controller.activate_layer(LayerId(10)).await.unwrap();

        let snapshot = fx.snapshots.try_recv().unwrap();
        assert_eq!(snapshot.layers, vec![LayerId(10)]);
    }
}
