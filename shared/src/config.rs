use crate::table::Table;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no URL configured for the {0} table")]
    MissingTableUrl(Table),
}

// ===== CONFIG TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DashboardConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub tables: TablesSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub map: MapSection,
}

impl DashboardConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DashboardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for table in Table::ALL {
            if self.tables.url(table).trim().is_empty() {
                return Err(ConfigError::MissingTableUrl(table));
            }
        }
        Ok(())
    }
}

// AppSection carries the config format version so older files can be migrated
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppSection {
    pub version: String,
}

impl AppSection {
    /// Current configuration format version
    pub const CURRENT_VERSION: &'static str = "1.0.0";

    pub fn migration_strategy(&self) -> MigrationStrategy {
        match self.version.as_str() {
            "1.0.0" => MigrationStrategy::None,
            "0.9.0" => MigrationStrategy::Upgrade("[map] section added with the default basemap".to_string()),
            _ => MigrationStrategy::Recreate,
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStrategy {
    None,            // No migration needed
    Upgrade(String), // Automatic upgrade with description
    Recreate,        // Unknown version, create new config
}

/// Feature-service URLs of the four reference tables.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TablesSection {
    pub categories: String,
    pub layers: String,
    pub templates: String,
    pub template_layer_relationships: String,
}

impl TablesSection {
    pub fn url(&self, table: Table) -> &str {
        match table {
            Table::Categories => &self.categories,
            Table::Layers => &self.layers,
            Table::Templates => &self.templates,
            Table::TemplateLayerRelationships => &self.template_layer_relationships,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthSection {
    pub portal_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl AuthSection {
    pub const DEFAULT_PORTAL_URL: &'static str = "https://www.arcgis.com";
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            portal_url: Self::DEFAULT_PORTAL_URL.to_string(),
            username: None,
            token: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MapSection {
    pub basemap: String,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            basemap: "arcgis-topographic".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[app]
version = "1.0.0"

[tables]
categories = "https://example.com/FeatureServer/0"
layers = "https://example.com/FeatureServer/1"
templates = "https://example.com/FeatureServer/2"
template_layer_relationships = "https://example.com/FeatureServer/3"

[auth]
portal_url = "https://portal.example.com"
username = "editor"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = DashboardConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.tables.url(Table::Layers), "https://example.com/FeatureServer/1");
        assert_eq!(config.auth.username.as_deref(), Some("editor"));
        assert_eq!(config.auth.token, None);
        assert_eq!(config.map, MapSection::default());
        assert_eq!(config.app.migration_strategy(), MigrationStrategy::None);
    }

    #[test]
    fn test_missing_table_url_is_rejected() {
        let content = SAMPLE.replace("layers = \"https://example.com/FeatureServer/1\"", "layers = \"\"");
        let err = DashboardConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTableUrl(Table::Layers)));
    }

    #[test]
    fn test_unknown_version_is_recreated() {
        let app = AppSection {
            version: "0.3.0".to_string(),
        };
        assert_eq!(app.migration_strategy(), MigrationStrategy::Recreate);
    }

    #[test]
    fn test_pre_map_version_is_upgraded() {
        let content = SAMPLE.replace("version = \"1.0.0\"", "version = \"0.9.0\"");
        let config = DashboardConfig::from_toml_str(&content).unwrap();
        assert!(matches!(config.app.migration_strategy(), MigrationStrategy::Upgrade(_)));
        assert_eq!(config.map, MapSection::default());
    }
}
