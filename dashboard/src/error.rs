use crate::entities::{LayerId, TemplateId};
use shared::Table;
use std::fmt;

/// Failure reported by an external collaborator (table client, layer service,
/// credential provider).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The service could not be reached at all.
    #[error("service unreachable: {0}")]
    Unreachable(String),
    /// The service answered with an error.
    #[error("service rejected the request: {0}")]
    Rejected(String),
    /// The service answered with something that could not be decoded.
    #[error("malformed service response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct MapSurfaceError {
    pub message: String,
}

impl MapSurfaceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The four stages of the load sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStage {
    Categories,
    Templates,
    Layers,
    Relationships,
}

impl LoadStage {
    pub fn for_table(table: Table) -> Self {
        match table {
            Table::Categories => LoadStage::Categories,
            Table::Templates => LoadStage::Templates,
            Table::Layers => LoadStage::Layers,
            Table::TemplateLayerRelationships => LoadStage::Relationships,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            LoadStage::Categories => Table::Categories,
            LoadStage::Templates => Table::Templates,
            LoadStage::Layers => Table::Layers,
            LoadStage::Relationships => Table::TemplateLayerRelationships,
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStage::Categories => "categories",
            LoadStage::Templates => "templates",
            LoadStage::Layers => "layers",
            LoadStage::Relationships => "template layers",
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DashboardError {
    #[error("error connecting to the {table} table: {message}")]
    Connection { table: Table, message: String },

    #[error("error loading {stage}: {message}")]
    Query { stage: LoadStage, message: String },

    #[error("error loading layer {title}: {message}")]
    LayerResolution { title: String, message: String },

    #[error("invalid {setting} for layer {title}: {message}")]
    RenderConfig {
        title: String,
        setting: &'static str,
        message: String,
    },

    #[error("a template titled {0:?} already exists")]
    DuplicateTitle(String),

    #[error("{0}")]
    Validation(String),

    #[error("the server rejected the edit: {0}")]
    RemoteWrite(String),

    #[error("error updating the map for layer {title}: {message}")]
    MapMutation { title: String, message: String },

    #[error("sign-in failed: {0}")]
    Auth(String),

    #[error("layer {0} is not part of the catalog")]
    UnknownLayer(LayerId),

    #[error("template {0} is not part of the catalog")]
    UnknownTemplate(TemplateId),
}

impl DashboardError {
    /// Maps a collaborator failure during a load stage. An unreachable
    /// service is a connection failure, anything else fails the stage.
    pub fn from_stage(stage: LoadStage, err: RemoteError) -> Self {
        match err {
            RemoteError::Unreachable(message) => DashboardError::Connection {
                table: stage.table(),
                message,
            },
            other => DashboardError::Query {
                stage,
                message: other.to_string(),
            },
        }
    }

    /// The load stage a loading error belongs to.
    pub fn load_stage(&self) -> Option<LoadStage> {
        match self {
            DashboardError::Connection { table, .. } => Some(LoadStage::for_table(*table)),
            DashboardError::Query { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
