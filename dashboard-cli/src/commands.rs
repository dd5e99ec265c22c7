use crate::config::{TOKEN_ENV, credential_provider, load_config};
use anyhow::{Context, Result};
use clap::Subcommand;
use dashboard::{
    Catalog, CategoryId, Collaborators, CredentialProvider, Dashboard, DashboardError, HeadlessMap, LayerId,
    LayerService, MapSurface, Notification, ReferenceDataAdmin, TableClient, TemplateId,
};
use dashboard::{FeatureServiceClient, RestLayerService};
use futures::channel::mpsc::UnboundedReceiver;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Dashboard(DashboardCommands),
    #[command(flatten)]
    Admin(AdminCommands),
}

#[derive(Subcommand)]
pub enum DashboardCommands {
    /// List categories, templates and layers
    Catalog,
    /// Activate templates and layers and print the resulting map
    Activate {
        #[arg(long)]
        template: Vec<i64>,
        #[arg(long)]
        layer: Vec<i64>,
    },
    /// Activate layers and save them as a new template
    SaveTemplate {
        #[arg(long)]
        title: String,
        #[arg(long)]
        layer: Vec<i64>,
    },
    /// Show source and description of a layer
    LayerInfo {
        #[arg(long)]
        layer: i64,
    },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Add a category
    AddCategory {
        #[arg(long)]
        title: String,
    },
    /// Delete a category by OBJECTID
    DeleteCategory {
        #[arg(long)]
        id: i64,
    },
    /// Delete a template and its layer associations
    DeleteTemplate {
        #[arg(long)]
        id: i64,
    },
    /// Delete a layer and its template associations
    DeleteLayer {
        #[arg(long)]
        id: i64,
    },
}

/// Remote services a command runs against.
pub struct Services {
    pub tables: Arc<dyn TableClient>,
    pub layers: Arc<dyn LayerService>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub basemap: String,
}

/// Sets up the services from the config file, then runs `command`. Setup
/// problems are errors; a failed operation is `Ok(false)`.
pub async fn run(config_path: &Path, command: Commands) -> Result<bool> {
    let config = load_config(config_path)?;
    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let tables = FeatureServiceClient::new(http.clone(), &config.tables)
        .context("Failed to connect to the dashboard tables")?;
    let credentials = credential_provider(&config, std::env::var(TOKEN_ENV).ok(), http.clone())?;

    let services = Services {
        tables: Arc::new(tables),
        layers: Arc::new(RestLayerService::new(http)),
        credentials,
        basemap: config.map.basemap,
    };
    Ok(execute(command, services).await)
}

pub async fn execute(command: Commands, services: Services) -> bool {
    match command {
        Commands::Dashboard(command) => run_dashboard(command, services).await,
        Commands::Admin(command) => run_admin(command, services).await,
    }
}

async fn run_dashboard(command: DashboardCommands, services: Services) -> bool {
    let map = Arc::new(HeadlessMap::new());
    let (mut dashboard, mut streams) = Dashboard::new(
        Collaborators {
            tables: services.tables,
            layers: services.layers,
            credentials: services.credentials,
            map: map.clone(),
        },
        services.basemap,
    );
    dashboard.attach_view();

    let succeeded = match dashboard.load().await {
        Ok(()) => dashboard_command(&mut dashboard, command).await,
        Err(_) => false,
    };
    drain(&mut streams.notifications);
    succeeded
}

async fn dashboard_command(dashboard: &mut Dashboard, command: DashboardCommands) -> bool {
    match command {
        DashboardCommands::Catalog => {
            dashboard.settle().await;
            print_catalog(dashboard.catalog());
            true
        }
        DashboardCommands::Activate { template, layer } => {
            let mut succeeded = true;
            for id in template {
                if let Err(err) = dashboard.activate_template(TemplateId(id)).await {
                    log::error!("{err}");
                    succeeded = false;
                }
            }
            succeeded &= activate_layers(dashboard, &layer).await;
            print_map(dashboard.map().as_ref());
            succeeded
        }
        DashboardCommands::SaveTemplate { title, layer } => {
            if !activate_layers(dashboard, &layer).await {
                return false;
            }
            match dashboard.save_template(&title).await {
                Ok(id) => {
                    println!("Saved template {id}: {}", title.trim());
                    true
                }
                Err(_) => false,
            }
        }
        DashboardCommands::LayerInfo { layer } => match dashboard.layer_info_by_id(LayerId(layer)).await {
            Some(info) => {
                println!("Source:      {}", info.source);
                println!("Description: {}", info.description);
                println!("URL:         {}", info.url);
                true
            }
            None => {
                log::error!("{}", DashboardError::UnknownLayer(LayerId(layer)));
                false
            }
        },
    }
}

async fn activate_layers(dashboard: &mut Dashboard, ids: &[i64]) -> bool {
    let mut succeeded = true;
    for id in ids {
        match dashboard.activate_layer(LayerId(*id)).await {
            Ok(true) => {}
            Ok(false) => succeeded = false,
            Err(err) => {
                log::error!("{err}");
                succeeded = false;
            }
        }
    }
    succeeded
}

async fn run_admin(command: AdminCommands, services: Services) -> bool {
    let admin = ReferenceDataAdmin::new(services.tables, services.credentials);
    let outcome = match command {
        AdminCommands::AddCategory { title } => admin
            .add_category(&title)
            .await
            .map(|id| println!("Added category {id}: {}", title.trim())),
        AdminCommands::DeleteCategory { id } => admin.delete_category(CategoryId(id)).await,
        AdminCommands::DeleteTemplate { id } => admin.delete_template(TemplateId(id)).await,
        AdminCommands::DeleteLayer { id } => admin.delete_layer(LayerId(id)).await,
    };
    match outcome {
        Ok(()) => true,
        Err(err) => {
            log::error!("{err}");
            false
        }
    }
}

fn drain(notifications: &mut UnboundedReceiver<Notification>) {
    while let Ok(notification) = notifications.try_recv() {
        log::debug!("{}: {}", notification.title, notification.message);
    }
}

fn print_catalog(catalog: &Catalog) {
    println!("Categories:");
    for category in catalog.categories() {
        println!("  {} {}", category.id, category.title);
        for layer in category.layer_wrappers.iter().filter_map(|id| catalog.layer(*id)) {
            let status = if layer.layer.is_filled() { "" } else { " (unavailable)" };
            println!("      {} {}{status}", layer.id, layer.title);
        }
    }
    let uncategorized: Vec<_> = catalog.layers().filter(|layer| layer.category.is_none()).collect();
    if !uncategorized.is_empty() {
        println!("  Uncategorized");
        for layer in uncategorized {
            println!("      {} {}", layer.id, layer.title);
        }
    }

    println!("Templates:");
    for template in catalog.templates() {
        let members: Vec<String> = template.layer_wrappers.iter().map(|id| id.to_string()).collect();
        println!("  {} {} [{}]", template.id, template.title, members.join(", "));
    }
}

fn print_map(map: &dyn MapSurface) {
    for layer in map.all_layers() {
        println!("{}\t{}", layer.id, layer.title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashboard::StaticToken;
    use dashboard::testing::{Call, MemoryLayerService, MemoryTables};
    use shared::{Row, Table};

    fn tables() -> Arc<MemoryTables> {
        let tables = MemoryTables::new();
        tables.seed(Table::Categories, vec![Row::new().with("OBJECTID", 1).with("TITLE", "Parks")]);
        tables.seed(Table::Layers, vec![
            MemoryTables::layer_row(10, "Parks", "City", 1),
            MemoryTables::layer_row(11, "Trails", "City", 1),
        ]);
        Arc::new(tables)
    }

    fn services(tables: &Arc<MemoryTables>) -> Services {
        Services {
            tables: tables.clone(),
            layers: Arc::new(MemoryLayerService::new()),
            credentials: Arc::new(StaticToken::new("secret")),
            basemap: "arcgis-topographic".to_string(),
        }
    }

    #[tokio::test]
    async fn test_catalog_command() {
        let tables = tables();
        assert!(execute(Commands::Dashboard(DashboardCommands::Catalog), services(&tables)).await);
    }

    #[tokio::test]
    async fn test_save_template_command() {
        let tables = tables();
        let command = DashboardCommands::SaveTemplate {
            title: "Trail Closures".to_string(),
            layer: vec![11, 10],
        };

        assert!(execute(Commands::Dashboard(command), services(&tables)).await);

        let layers: Vec<Option<i64>> = tables
            .rows(Table::TemplateLayerRelationships)
            .iter()
            .map(|row| row.integer("LAYERID"))
            .collect();
        assert_eq!(layers, vec![Some(11), Some(10)]);
    }

    #[tokio::test]
    async fn test_unknown_layer_fails() {
        let tables = tables();
        let command = DashboardCommands::Activate {
            template: vec![],
            layer: vec![99],
        };
        assert!(!execute(Commands::Dashboard(command), services(&tables)).await);
    }

    #[tokio::test]
    async fn test_load_failure_fails_command() {
        let tables = tables();
        tables.fail(Table::Categories, dashboard::RemoteError::Unreachable("down".to_string()));
        assert!(!execute(Commands::Dashboard(DashboardCommands::Catalog), services(&tables)).await);
    }

    #[tokio::test]
    async fn test_admin_command() {
        let tables = tables();
        let command = AdminCommands::DeleteLayer { id: 11 };

        assert!(execute(Commands::Admin(command), services(&tables)).await);
        assert_eq!(tables.rows(Table::Layers).len(), 1);
        assert!(tables.calls().contains(&Call::Delete(Table::Layers, 1)));
    }
}
