//! Map dashboard core: rebuilds categories, templates and layers from four
//! feature-service tables, keeps the active layer and template sets
//! consistent with a map surface, and saves new templates.

pub mod active_set;
pub mod admin;
pub mod builder;
pub mod credentials;
pub mod dashboard;
pub mod entities;
pub mod error;
pub mod feature_service;
pub mod map;
pub mod materializer;
pub mod notifications;
pub mod persistence;
pub mod relay;
pub mod remote;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use active_set::{ActiveSetController, ActiveSnapshot};
pub use admin::{NewLayer, ReferenceDataAdmin};
pub use builder::EntityBuilder;
pub use credentials::{PasswordPrompt, PortalSignIn, StaticToken};
pub use dashboard::{Collaborators, Dashboard, DashboardStreams, LayerInfo, LoadState};
pub use entities::{Catalog, Category, CategoryId, LayerId, LayerSlot, LayerWrapper, Template, TemplateId};
pub use error::{DashboardError, LoadStage, MapSurfaceError, RemoteError};
pub use feature_service::{FeatureServiceClient, RestLayerService};
pub use map::{HeadlessMap, LayerKind, LiveLayer, MapSurface};
pub use materializer::Materializer;
pub use notifications::{Notification, NotificationVariant, Notifier};
pub use persistence::TemplatePersistence;
pub use relay::{Relay, RelayError, relay};
pub use remote::{CredentialProvider, LayerService, TableClient};
