//! Auth tokens for edits.

use crate::error::RemoteError;
use crate::feature_service::{decode, transport_error};
use crate::remote::CredentialProvider;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A pre-issued token.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Result<String, RemoteError> {
        Ok(self.token.clone())
    }
}

/// Asks the user for a password. Called at most once per successful sign-in,
/// on the blocking thread pool, so it may wait on the terminal.
pub type PasswordPrompt = Arc<dyn Fn(&str) -> Result<String, RemoteError> + Send + Sync>;

/// Signs in against a portal's `generateToken` endpoint on first use and
/// caches the token for the rest of the session.
pub struct PortalSignIn {
    http: reqwest::Client,
    endpoint: Url,
    username: String,
    prompt: PasswordPrompt,
    cached: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct GenerateTokenResponse {
    token: String,
}

/// Token lifetime requested from the portal, in minutes.
const TOKEN_EXPIRATION_MINUTES: u32 = 120;

impl PortalSignIn {
    pub fn new(
        http: reqwest::Client,
        portal_url: &str,
        username: impl Into<String>,
        prompt: PasswordPrompt,
    ) -> Result<Self, RemoteError> {
        // Keep a portal path like `/portal` when joining.
        let base = format!("{}/", portal_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)
            .and_then(|portal| portal.join("sharing/rest/generateToken"))
            .map_err(|err| RemoteError::Unreachable(format!("invalid portal URL {portal_url:?}: {err}")))?;
        Ok(Self {
            http,
            endpoint,
            username: username.into(),
            prompt,
            cached: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn sign_in(&self) -> Result<String, RemoteError> {
        let prompt = Arc::clone(&self.prompt);
        let username = self.username.clone();
        let password = tokio::task::spawn_blocking(move || prompt(&username))
            .await
            .map_err(|err| RemoteError::Rejected(format!("password prompt failed: {err}")))??;
        let expiration = TOKEN_EXPIRATION_MINUTES.to_string();
        let form = [
            ("username", self.username.as_str()),
            ("password", password.as_str()),
            ("client", "referer"),
            ("referer", self.endpoint.as_str()),
            ("expiration", expiration.as_str()),
            ("f", "json"),
        ];
        let body = self
            .http
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?
            .text()
            .await
            .map_err(transport_error)?;
        let response: GenerateTokenResponse = decode(&body)?;
        log::info!("Signed in to {} as {}", self.endpoint, self.username);
        Ok(response.token)
    }
}

#[async_trait]
impl CredentialProvider for PortalSignIn {
    async fn token(&self) -> Result<String, RemoteError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.sign_in().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("abc").token().await.unwrap(), "abc");
    }

    #[test]
    fn test_portal_endpoint() {
        let prompt: PasswordPrompt = Arc::new(|_| Ok("hunter2".to_string()));
        let sign_in = PortalSignIn::new(reqwest::Client::new(), "https://www.arcgis.com/", "editor", prompt).unwrap();
        assert_eq!(
            sign_in.endpoint().as_str(),
            "https://www.arcgis.com/sharing/rest/generateToken"
        );
    }

    #[test]
    fn test_invalid_portal_url() {
        let prompt: PasswordPrompt = Arc::new(|_| Ok(String::new()));
        assert!(PortalSignIn::new(reqwest::Client::new(), "not a url", "editor", prompt).is_err());
    }

    #[tokio::test]
    async fn test_prompt_failure_is_returned() {
        let prompt: PasswordPrompt = Arc::new(|_| Err(RemoteError::Rejected("sign-in cancelled".to_string())));
        let sign_in = PortalSignIn::new(reqwest::Client::new(), "https://www.arcgis.com", "editor", prompt).unwrap();
        assert_eq!(
            sign_in.token().await.unwrap_err(),
            RemoteError::Rejected("sign-in cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn test_prompt_runs_off_the_runtime_thread() {
        let prompted_on = Arc::new(std::sync::Mutex::new(None));
        let recorder = prompted_on.clone();
        let prompt: PasswordPrompt = Arc::new(move |_| {
            *recorder.lock().unwrap() = Some(std::thread::current().id());
            Err(RemoteError::Rejected("sign-in cancelled".to_string()))
        });
        let sign_in = PortalSignIn::new(reqwest::Client::new(), "https://www.arcgis.com", "editor", prompt).unwrap();

        assert!(sign_in.token().await.is_err());

        let prompted_on = prompted_on.lock().unwrap().expect("prompt was called");
        assert_ne!(prompted_on, std::thread::current().id());
    }
}
