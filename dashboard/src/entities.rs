//! The in-memory relational model rebuilt from the reference tables.
//!
//! Entities refer to each other by id only. The [`Catalog`] owns every
//! entity; a category's or template's layer list and a layer's category and
//! template links are lookups into it, never ownership.

use crate::map::LiveLayer;
use indexmap::IndexMap;
use shared::ObjectId;
use std::fmt;
use std::sync::{Arc, OnceLock};

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub ObjectId);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<ObjectId> for $name {
            fn from(id: ObjectId) -> Self {
                Self(id)
            }
        }
    };
}

object_id!(
    /// OBJECTID of a Categories row.
    CategoryId
);
object_id!(
    /// OBJECTID of a Templates row.
    TemplateId
);
object_id!(
    /// OBJECTID of a Layers row. Also the id carried by the live layer.
    LayerId
);

impl LayerId {
    /// Reverse lookup from a live layer's id. Layers the dashboard did not
    /// create (basemaps, sketches) yield `None`.
    pub fn from_live(layer: &LiveLayer) -> Option<Self> {
        layer.id.trim().parse().ok().map(LayerId)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: CategoryId,
    pub title: String,
    pub layer_wrappers: Vec<LayerId>,
}

impl Category {
    pub fn new(id: CategoryId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            layer_wrappers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: TemplateId,
    pub title: String,
    /// Members in relationship-row order.
    pub layer_wrappers: Vec<LayerId>,
}

impl Template {
    pub fn new(id: TemplateId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            layer_wrappers: Vec::new(),
        }
    }
}

/// Write-once cell holding a wrapper's live layer. Clones share the cell, so
/// a background materialization fills the slot every clone sees.
#[derive(Debug, Clone, Default)]
pub struct LayerSlot(Arc<OnceLock<LiveLayer>>);

impl LayerSlot {
    pub fn get(&self) -> Option<&LiveLayer> {
        self.0.get()
    }

    pub fn is_filled(&self) -> bool {
        self.0.get().is_some()
    }

    /// Fills the slot unless it is already filled; returns the stored layer.
    pub(crate) fn fill(&self, layer: LiveLayer) -> LiveLayer {
        self.0.get_or_init(move || layer).clone()
    }
}

#[derive(Debug, Clone)]
pub struct LayerWrapper {
    pub id: LayerId,
    pub title: String,
    pub url: String,
    pub filter: Option<String>,
    /// Serialized renderer description.
    pub renderer: Option<String>,
    pub layer: LayerSlot,
    pub category: Option<CategoryId>,
    pub templates: Vec<TemplateId>,
}

impl LayerWrapper {
    pub fn new(id: LayerId, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            url: url.into(),
            filter: None,
            renderer: None,
            layer: LayerSlot::default(),
            category: None,
            templates: Vec::new(),
        }
    }

    pub fn live_layer(&self) -> Option<&LiveLayer> {
        self.layer.get()
    }
}

/// Outcome of linking a template and a layer from one relationship row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Linked,
    MissingLayer,
    MissingTemplate,
    Duplicate,
}

/// The three entity maps, each in server order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub(crate) categories: IndexMap<CategoryId, Category>,
    pub(crate) templates: IndexMap<TemplateId, Template>,
    pub(crate) layers: IndexMap<LayerId, LayerWrapper>,
}

impl Catalog {
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerWrapper> {
        self.layers.values()
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn template(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(&id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerWrapper> {
        self.layers.get(&id)
    }

    pub fn contains_layer(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    /// The wrapper behind a live layer, if the dashboard created it.
    pub fn layer_for(&self, live: &LiveLayer) -> Option<&LayerWrapper> {
        LayerId::from_live(live).and_then(|id| self.layer(id))
    }

    pub fn template_by_title(&self, title: &str) -> Option<&Template> {
        self.templates().find(|template| template.title == title)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.templates.is_empty() && self.layers.is_empty()
    }

    /// Adds a wrapper and appends it to its category. Returns `false` and
    /// leaves the catalog untouched when the id is already present. A wrapper
    /// whose category is unknown is kept with `category = None`.
    pub(crate) fn insert_layer(&mut self, mut wrapper: LayerWrapper) -> bool {
        if self.layers.contains_key(&wrapper.id) {
            return false;
        }
        match wrapper
            .category
            .and_then(|category| self.categories.get_mut(&category))
        {
            Some(category) => category.layer_wrappers.push(wrapper.id),
            None => wrapper.category = None,
        }
        self.layers.insert(wrapper.id, wrapper);
        true
    }

    /// Records one relationship row on both sides.
    pub(crate) fn link(&mut self, template_id: TemplateId, layer_id: LayerId) -> Link {
        let Some(wrapper) = self.layers.get_mut(&layer_id) else {
            return Link::MissingLayer;
        };
        let Some(template) = self.templates.get_mut(&template_id) else {
            return Link::MissingTemplate;
        };
        if template.layer_wrappers.contains(&layer_id) {
            return Link::Duplicate;
        }
        template.layer_wrappers.push(layer_id);
        wrapper.templates.push(template_id);
        Link::Linked
    }

    /// Swaps in a freshly fetched template map and relinks it. Template links
    /// on the wrappers are rebuilt from scratch.
    pub(crate) fn replace_templates(&mut self, templates: IndexMap<TemplateId, Template>) {
        for wrapper in self.layers.values_mut() {
            wrapper.templates.clear();
        }
        self.templates = templates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::LayerKind;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog
            .categories
            .insert(CategoryId(1), Category::new(CategoryId(1), "Parks"));
        catalog
            .templates
            .insert(TemplateId(5), Template::new(TemplateId(5), "Spring Event"));
        catalog
    }

    fn wrapper(id: ObjectId, category: Option<ObjectId>) -> LayerWrapper {
        LayerWrapper {
            category: category.map(CategoryId),
            ..LayerWrapper::new(LayerId(id), format!("Layer {id}"), format!("https://example.com/{id}"))
        }
    }

    #[test]
    fn test_insert_layer_links_category_once() {
        let mut catalog = catalog();
        assert!(catalog.insert_layer(wrapper(10, Some(1))));
        assert!(!catalog.insert_layer(wrapper(10, Some(1))));

        let parks = catalog.category(CategoryId(1)).unwrap();
        assert_eq!(parks.layer_wrappers, vec![LayerId(10)]);
        assert_eq!(catalog.layer(LayerId(10)).unwrap().category, Some(CategoryId(1)));
    }

    #[test]
    fn test_unknown_category_is_cleared() {
        let mut catalog = catalog();
        assert!(catalog.insert_layer(wrapper(11, Some(99))));
        assert_eq!(catalog.layer(LayerId(11)).unwrap().category, None);
    }

    #[test]
    fn test_link_outcomes() {
        let mut catalog = catalog();
        catalog.insert_layer(wrapper(10, Some(1)));

        assert_eq!(catalog.link(TemplateId(5), LayerId(10)), Link::Linked);
        assert_eq!(catalog.link(TemplateId(5), LayerId(10)), Link::Duplicate);
        assert_eq!(catalog.link(TemplateId(5), LayerId(42)), Link::MissingLayer);
        assert_eq!(catalog.link(TemplateId(6), LayerId(10)), Link::MissingTemplate);

        assert_eq!(catalog.layer(LayerId(10)).unwrap().templates, vec![TemplateId(5)]);
    }

    #[test]
    fn test_replace_templates_clears_stale_links() {
        let mut catalog = catalog();
        catalog.insert_layer(wrapper(10, Some(1)));
        catalog.link(TemplateId(5), LayerId(10));

        let mut fresh = IndexMap::new();
        fresh.insert(TemplateId(6), Template::new(TemplateId(6), "Flood"));
        catalog.replace_templates(fresh);

        assert!(catalog.layer(LayerId(10)).unwrap().templates.is_empty());
        assert!(catalog.template(TemplateId(5)).is_none());
    }

    #[test]
    fn test_layer_slot_fills_once() {
        let slot = LayerSlot::default();
        let shared = slot.clone();

        let mut first = LiveLayer::new("https://example.com/a", LayerKind::Feature);
        first.id = "10".to_string();
        let mut second = first.clone();
        second.id = "11".to_string();

        assert_eq!(slot.fill(first).id, "10");
        assert_eq!(shared.fill(second).id, "10");
        assert!(shared.is_filled());
    }

    #[test]
    fn test_reverse_lookup_from_live_layer() {
        let mut catalog = catalog();
        catalog.insert_layer(wrapper(10, Some(1)));

        let mut live = LiveLayer::new("https://example.com/10", LayerKind::Feature);
        live.id = "10".to_string();
        assert_eq!(catalog.layer_for(&live).map(|w| w.id), Some(LayerId(10)));

        let basemap = LiveLayer::basemap("arcgis-topographic");
        assert!(catalog.layer_for(&basemap).is_none());
    }
}
