//! Turns layer descriptions into live layers in the background.
//!
//! During a load every wrapper is dispatched onto its own task and loading
//! moves on without waiting. Completion order is unspecified; the only
//! observer is the wrapper's [`LayerSlot`](crate::entities::LayerSlot).
//! Activation joins a pending task lazily through [`Materializer::ensure`].

use crate::entities::{LayerId, LayerWrapper};
use crate::error::DashboardError;
use crate::map::LiveLayer;
use crate::notifications::Notifier;
use crate::remote::LayerService;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

pub struct Materializer {
    service: Arc<dyn LayerService>,
    notifier: Notifier,
    pending: Mutex<HashMap<LayerId, JoinHandle<()>>>,
}

impl Materializer {
    pub fn new(service: Arc<dyn LayerService>, notifier: Notifier) -> Self {
        Self {
            service,
            notifier,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `wrapper` into a live layer and stores it in the wrapper's
    /// slot. A malformed renderer or filter is logged and skipped; only a
    /// failed URL resolution is an error.
    pub async fn materialize(&self, wrapper: &LayerWrapper) -> Result<LiveLayer, DashboardError> {
        let mut layer = self.service.resolve(&wrapper.url).await.map_err(|err| {
            DashboardError::LayerResolution {
                title: wrapper.title.clone(),
                message: err.to_string(),
            }
        })?;
        layer.id = wrapper.id.to_string();
        layer.title = wrapper.title.clone();

        if layer.is_feature() {
            if let Some(renderer) = wrapper.renderer.as_deref() {
                match parse_renderer(renderer) {
                    Ok(renderer) => layer.renderer = Some(renderer),
                    Err(message) => log_skipped(wrapper, "renderer", message),
                }
            }
            if let Some(filter) = wrapper.filter.as_deref() {
                match check_filter(filter) {
                    Ok(filter) => layer.definition_expression = Some(filter),
                    Err(message) => log_skipped(wrapper, "SQL filter", message),
                }
            }
        } else if wrapper.renderer.is_some() || wrapper.filter.is_some() {
            log::debug!(
                "Layer {} is not a feature layer, ignoring its renderer and filter",
                wrapper.title
            );
        }

        Ok(wrapper.layer.fill(layer))
    }

    /// Starts materializing `wrapper` on a background task and returns
    /// immediately. A failure is reported through the notifier and leaves the
    /// slot empty.
    pub fn dispatch(self: &Arc<Self>, wrapper: &LayerWrapper) {
        let this = Arc::clone(self);
        let wrapper = wrapper.clone();
        let id = wrapper.id;
        let handle = tokio::spawn(async move {
            if let Err(err) = this.materialize(&wrapper).await {
                this.notifier.error(&err);
            }
        });
        if let Some(previous) = self.lock_pending().insert(id, handle) {
            previous.abort();
        }
    }

    /// Live layer for `wrapper`, joining its background task if one is still
    /// running and materializing on demand if the slot is still empty.
    pub async fn ensure(&self, wrapper: &LayerWrapper) -> Result<LiveLayer, DashboardError> {
        if let Some(layer) = wrapper.live_layer() {
            return Ok(layer.clone());
        }
        let pending = self.lock_pending().remove(&wrapper.id);
        if let Some(handle) = pending {
            if let Err(err) = handle.await {
                log::warn!("Materialization task for layer {} ended abnormally: {err}", wrapper.title);
            }
            if let Some(layer) = wrapper.live_layer() {
                return Ok(layer.clone());
            }
        }
        self.materialize(wrapper).await
    }

    /// Waits for every dispatched task.
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = self.lock_pending().drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                log::warn!("Materialization task ended abnormally: {err}");
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<LayerId, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_skipped(wrapper: &LayerWrapper, setting: &'static str, message: String) {
    let err = DashboardError::RenderConfig {
        title: wrapper.title.clone(),
        setting,
        message,
    };
    log::warn!("{err}; using defaults");
}

/// A renderer must be a JSON object naming its renderer `type`.
fn parse_renderer(serialized: &str) -> Result<Value, String> {
    let renderer: Value = serde_json::from_str(serialized).map_err(|err| err.to_string())?;
    match renderer.get("type") {
        Some(Value::String(_)) => Ok(renderer),
        Some(_) => Err("renderer `type` must be a string".to_string()),
        None if renderer.is_object() => Err("renderer has no `type`".to_string()),
        None => Err("renderer must be a JSON object".to_string()),
    }
}

/// Cheap structural check of a definition expression: not blank, quotes
/// closed, parentheses balanced.
fn check_filter(filter: &str) -> Result<String, String> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Err("filter is blank".to_string());
    }
    let mut depth: i32 = 0;
    let mut in_string = false;
    for ch in filter.chars() {
        match ch {
            // Doubled quotes inside a literal toggle twice and cancel out.
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced parentheses".to_string());
                }
            }
            _ => {}
        }
    }
    if in_string {
        return Err("unterminated string literal".to_string());
    }
    if depth != 0 {
        return Err("unbalanced parentheses".to_string());
    }
    Ok(filter.to_string())
}
