use anyhow::{Context, Result};
use async_trait::async_trait;
use dashboard::{CredentialProvider, PasswordPrompt, PortalSignIn, RemoteError, StaticToken};
use shared::{DashboardConfig, MigrationStrategy};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_CONFIG_PATH: &str = "oem-dashboard.toml";

/// Environment variable holding a pre-issued token.
pub const TOKEN_ENV: &str = "OEM_DASHBOARD_TOKEN";

pub fn load_config(path: &Path) -> Result<DashboardConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = DashboardConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    match config.app.migration_strategy() {
        MigrationStrategy::None => {}
        MigrationStrategy::Upgrade(description) => {
            log::info!("Config {} needs an upgrade: {description}", path.display());
        }
        MigrationStrategy::Recreate => {
            log::warn!(
                "Config version {} is not supported (expected {}), unknown settings are ignored",
                config.app.version,
                shared::AppSection::CURRENT_VERSION
            );
        }
    }

    Ok(config)
}

/// Picks the token source: the environment, then `auth.token`, then an
/// interactive portal sign-in.
pub fn credential_provider(
    config: &DashboardConfig,
    env_token: Option<String>,
    http: reqwest::Client,
) -> Result<Arc<dyn CredentialProvider>> {
    let present = |token: &String| !token.trim().is_empty();
    let preset = env_token
        .filter(present)
        .or_else(|| config.auth.token.clone().filter(present));
    if let Some(token) = preset {
        return Ok(Arc::new(StaticToken::new(token.trim())));
    }

    let Some(username) = config.auth.username.clone() else {
        return Ok(Arc::new(NoCredentials));
    };
    let sign_in = PortalSignIn::new(http, &config.auth.portal_url, username, stdin_prompt())
        .with_context(|| format!("Invalid portal URL: {}", config.auth.portal_url))?;
    Ok(Arc::new(sign_in))
}

fn stdin_prompt() -> PasswordPrompt {
    Arc::new(|username: &str| {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "Password for {username}: ");
        let _ = stderr.flush();

        let mut password = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut password)
            .map_err(|err| RemoteError::Rejected(format!("could not read password: {err}")))?;
        let password = password.trim_end_matches(['\r', '\n']).to_string();
        if password.is_empty() {
            return Err(RemoteError::Rejected("sign-in cancelled".to_string()));
        }
        Ok(password)
    })
}

/// Used when neither a token nor a username is configured; read-only
/// commands still work.
struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn token(&self) -> Result<String, RemoteError> {
        Err(RemoteError::Rejected(format!(
            "no credentials configured, set {TOKEN_ENV} or [auth] username"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>, username: Option<&str>) -> DashboardConfig {
        let mut config = DashboardConfig::default();
        config.auth.token = token.map(str::to_string);
        config.auth.username = username.map(str::to_string);
        config
    }

    #[tokio::test]
    async fn test_environment_token_wins() {
        let provider =
            credential_provider(&config(Some("from-file"), None), Some("from-env".to_string()), reqwest::Client::new())
                .unwrap();
        assert_eq!(provider.token().await.unwrap(), "from-env");
    }

    #[tokio::test]
    async fn test_config_token_used_without_environment() {
        let provider =
            credential_provider(&config(Some("from-file"), Some("editor")), None, reqwest::Client::new()).unwrap();
        assert_eq!(provider.token().await.unwrap(), "from-file");
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_on_use() {
        let provider = credential_provider(&config(None, None), Some("  ".to_string()), reqwest::Client::new()).unwrap();
        assert!(provider.token().await.is_err());
    }

    #[test]
    fn test_missing_config_file_has_context() {
        let err = load_config(Path::new("does-not-exist.toml")).unwrap_err();
        assert!(err.to_string().contains("does-not-exist.toml"));
    }
}
