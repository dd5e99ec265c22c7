//! The map surface: live layers and the collection that draws them.

use crate::error::MapSurfaceError;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerKind {
    /// A feature layer; the only kind that accepts renderers and filters.
    Feature,
    Basemap,
    Other(String),
}

/// A resolved, drawable layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveLayer {
    pub id: String,
    pub title: String,
    pub url: String,
    pub kind: LayerKind,
    pub renderer: Option<Value>,
    pub definition_expression: Option<String>,
    pub visible: bool,
}

impl LiveLayer {
    pub fn new(url: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            url: url.into(),
            kind,
            renderer: None,
            definition_expression: None,
            visible: true,
        }
    }

    pub fn basemap(basemap: &str) -> Self {
        Self {
            id: format!("basemap:{basemap}"),
            title: basemap.to_string(),
            ..Self::new("", LayerKind::Basemap)
        }
    }

    pub fn is_feature(&self) -> bool {
        self.kind == LayerKind::Feature
    }
}

/// The map's layer collection.
pub trait MapSurface: Send + Sync {
    fn add(&self, layer: LiveLayer) -> Result<(), MapSurfaceError>;

    /// Removes the layer with `layer_id`. Removing an absent layer is not an
    /// error.
    fn remove(&self, layer_id: &str) -> Result<(), MapSurfaceError>;

    /// Removes every operational layer; the basemap stays.
    fn remove_all(&self);

    /// Basemap layers first, then operational layers bottom to top.
    fn all_layers(&self) -> Vec<LiveLayer>;

    fn set_basemap(&self, basemap: &str);
}

/// In-memory map surface for headless use (command line, tests).
#[derive(Debug, Default)]
pub struct HeadlessMap {
    state: Mutex<HeadlessMapState>,
}

#[derive(Debug, Default)]
struct HeadlessMapState {
    basemap: Option<LiveLayer>,
    layers: Vec<LiveLayer>,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operational_layers(&self) -> Vec<LiveLayer> {
        self.lock().layers.clone()
    }

    pub fn basemap(&self) -> Option<LiveLayer> {
        self.lock().basemap.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeadlessMapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MapSurface for HeadlessMap {
    fn add(&self, layer: LiveLayer) -> Result<(), MapSurfaceError> {
        if layer.id.is_empty() {
            return Err(MapSurfaceError::new("layer has no id"));
        }
        let mut state = self.lock();
        // Adding a layer that is already on the map moves it to the top.
        state.layers.retain(|existing| existing.id != layer.id);
        state.layers.push(layer);
        Ok(())
    }

    fn remove(&self, layer_id: &str) -> Result<(), MapSurfaceError> {
        self.lock().layers.retain(|existing| existing.id != layer_id);
        Ok(())
    }

    fn remove_all(&self) {
        self.lock().layers.clear();
    }

    fn all_layers(&self) -> Vec<LiveLayer> {
        let state = self.lock();
        state
            .basemap
            .iter()
            .chain(state.layers.iter())
            .cloned()
            .collect()
    }

    fn set_basemap(&self, basemap: &str) {
        self.lock().basemap = Some(LiveLayer::basemap(basemap));
    }
}
