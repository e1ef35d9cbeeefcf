//! Authentication and client construction.
//!
//! Login is an OAuth authorization-code exchange brokered by the server:
//!
//! 1. `GET /api/auth/{provider}/client_id` for the OAuth client id
//! 2. the [`OAuthLauncher`] runs the provider's web flow and returns the code
//! 3. `POST /api/auth/{provider}/authenticate?code=…&redirect_uri=…` trades
//!    the code for a geekmarks token
//! 4. the token goes into the [`CredentialStore`]
//!
//! [`ClientFactory::create_logged_in`] turns a stored token into an
//! [`RpcClient`], or `None` when there is no token so callers can redirect
//! to the login page.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;
use crate::credentials::{CredentialStore, Credentials};
use crate::rpc::RpcClient;

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request failed.
    #[error("auth request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The web auth flow failed or was cancelled.
    #[error("auth flow failed: {0}")]
    Launcher(String),
    /// Credential store failure.
    #[error("credential store: {0}")]
    Store(String),
    /// Provider name is not supported.
    #[error("unknown auth provider: {0}")]
    UnknownProvider(String),
}

/// Supported OAuth providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProvider {
    /// Google accounts.
    Google,
}

impl AuthProvider {
    /// Name used in server paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }

    /// Authorization page of the provider for `client_id`.
    pub fn authorize_url(self, client_id: &str, redirect_uri: &str) -> String {
        match self {
            Self::Google => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("scope", "email")
                    .append_pair("redirect_uri", redirect_uri)
                    .append_pair("client_id", client_id)
                    .append_pair("response_type", "code")
                    .finish();
                format!("https://accounts.google.com/o/oauth2/auth?{query}")
            }
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            other => Err(AuthError::UnknownProvider(other.to_string())),
        }
    }
}

/// Result of a completed provider web flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthGrant {
    /// Authorization code.
    pub code: String,
    /// Redirect URI the code was issued for.
    pub redirect_uri: String,
}

/// Runs the provider's interactive web flow.
#[async_trait]
pub trait OAuthLauncher: Send + Sync {
    /// Run the flow for `provider` with the server's OAuth `client_id`.
    async fn launch(&self, provider: AuthProvider, client_id: &str)
        -> Result<OAuthGrant, AuthError>;
}

/// Response from `GET /api/auth/{provider}/client_id`.
#[derive(Debug, Deserialize)]
pub struct ClientIdResponse {
    /// OAuth client id.
    #[serde(rename = "clientID")]
    pub client_id: String,
}

/// Response from `POST /api/auth/{provider}/authenticate`.
#[derive(Debug, Deserialize)]
pub struct AuthenticateResponse {
    /// Geekmarks API token.
    pub token: String,
}

/// HTTP side of the login flow.
#[derive(Debug, Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    base: String,
}

impl AuthApi {
    /// Client for the API rooted at `base` (`http[s]://host/api`).
    pub fn new(base: impl Into<String>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: base.into(),
        })
    }

    /// Client for the configured server.
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        Self::new(config.http_base())
    }

    /// OAuth client id the server uses for `provider`.
    pub async fn client_id(&self, provider: AuthProvider) -> Result<String, AuthError> {
        let url = format!("{}/auth/{}/client_id", self.base, provider);
        let response = self.http.get(&url).send().await?;
        let resp: ClientIdResponse = check_status(response).await?.json().await?;
        Ok(resp.client_id)
    }

    /// Exchange an authorization code for a geekmarks token.
    pub async fn authenticate(
        &self,
        provider: AuthProvider,
        redirect_uri: &str,
        code: &str,
    ) -> Result<String, AuthError> {
        let url = format!("{}/auth/{}/authenticate", self.base, provider);
        let response = self
            .http
            .post(&url)
            .query(&[("code", code), ("redirect_uri", redirect_uri)])
            .send()
            .await?;
        let resp: AuthenticateResponse = check_status(response).await?.json().await?;
        Ok(resp.token)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AuthError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Builds authenticated clients from stored credentials.
pub struct ClientFactory {
    config: Config,
    store: Arc<dyn CredentialStore>,
    api: AuthApi,
    launcher: Option<Arc<dyn OAuthLauncher>>,
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("server", &self.config.server)
            .field("has_launcher", &self.launcher.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientFactory {
    /// Factory for the configured server.
    pub fn new(config: Config, store: Arc<dyn CredentialStore>) -> Result<Self, AuthError> {
        let api = AuthApi::from_config(&config)?;
        Ok(Self {
            config,
            store,
            api,
            launcher: None,
        })
    }

    /// Set the web flow used by [`login`](Self::login).
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn OAuthLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Configuration clients are created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for the stored token, `None` when not logged in.
    pub async fn create_logged_in(&self) -> Result<Option<RpcClient>, AuthError> {
        let creds = self
            .store
            .get()
            .await
            .map_err(|e| AuthError::Store(format!("{e:#}")))?;

        match creds.as_ref().and_then(Credentials::token) {
            Some(token) => {
                log::info!("[Auth] Creating client for {}", self.config.server);
                Ok(Some(RpcClient::open(&self.config, token)))
            }
            None => {
                log::debug!("[Auth] No token stored, not logged in");
                Ok(None)
            }
        }
    }

    /// Run the full login flow for `provider` and return the new client.
    pub async fn login(&self, provider: &str) -> Result<Option<RpcClient>, AuthError> {
        let provider: AuthProvider = provider.parse()?;
        let launcher = self
            .launcher
            .as_ref()
            .ok_or_else(|| AuthError::Launcher("no web auth flow available".to_string()))?;

        let client_id = self.api.client_id(provider).await?;
        let grant = launcher.launch(provider, &client_id).await?;
        let token = self
            .api
            .authenticate(provider, &grant.redirect_uri, &grant.code)
            .await?;

        log::info!("[Auth] Logged in via {}", provider);
        self.on_authenticated(token).await
    }

    /// Store `token` and create a client for it.
    pub async fn on_authenticated(&self, token: String) -> Result<Option<RpcClient>, AuthError> {
        self.store
            .set(Credentials::with_token(token))
            .await
            .map_err(|e| AuthError::Store(format!("{e:#}")))?;
        self.create_logged_in().await
    }

    /// Forget the stored token.
    pub async fn logout(&self) -> Result<(), AuthError> {
        log::info!("[Auth] Logging out");
        self.store
            .set(Credentials::default())
            .await
            .map_err(|e| AuthError::Store(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedLauncher;

    #[async_trait]
    impl OAuthLauncher for FixedLauncher {
        async fn launch(
            &self,
            provider: AuthProvider,
            client_id: &str,
        ) -> Result<OAuthGrant, AuthError> {
            assert_eq!(provider, AuthProvider::Google);
            assert_eq!(client_id, "cid");
            Ok(OAuthGrant {
                code: "the-code".to_string(),
                redirect_uri: "https://ext.example/cb".to_string(),
            })
        }
    }

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config {
            server: server.address().to_string(),
            server_ssl: false,
            ..Config::default()
        };
        config.reconnect.auto_reconnect = false;
        config
    }

    async fn mount_auth(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/auth/google/client_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"clientID": "cid"})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/google/authenticate"))
            .and(query_param("code", "the-code"))
            .and(query_param("redirect_uri", "https://ext.example/cb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "gm-token"})))
            .mount(server)
            .await;
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("google".parse::<AuthProvider>().unwrap(), AuthProvider::Google);
        assert!(matches!(
            "github".parse::<AuthProvider>(),
            Err(AuthError::UnknownProvider(p)) if p == "github"
        ));
    }

    #[test]
    fn test_authorize_url() {
        let url = AuthProvider::Google.authorize_url("cid", "https://ext.example/cb");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fext.example%2Fcb"));
        assert!(url.contains("response_type=code"));
    }

    #[tokio::test]
    async fn test_auth_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/google/client_id"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let api = AuthApi::new(format!("{}/api", server.uri())).unwrap();
        let err = api.client_id(AuthProvider::Google).await.unwrap_err();
        assert!(matches!(err, AuthError::Status { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
        let factory = ClientFactory::new(config_for(&server), Arc::clone(&store))
            .unwrap()
            .with_launcher(Arc::new(FixedLauncher));

        let client = factory.login("google").await.unwrap();
        assert!(client.is_some());
        let creds = store.get().await.unwrap().unwrap();
        assert_eq!(creds.token(), Some("gm-token"));
    }

    #[tokio::test]
    async fn test_logged_out_yields_no_client() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::with(Credentials::with_token("t")));
        let factory = ClientFactory::new(config_for(&server), store).unwrap();
        assert!(factory.create_logged_in().await.unwrap().is_some());

        factory.logout().await.unwrap();
        assert!(factory.create_logged_in().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_without_launcher_fails() {
        let server = MockServer::start().await;
        let factory = ClientFactory::new(config_for(&server), Arc::new(MemoryStore::default())).unwrap();
        assert!(matches!(
            factory.login("google").await,
            Err(AuthError::Launcher(_))
        ));
        assert!(matches!(
            factory.login("github").await,
            Err(AuthError::UnknownProvider(_))
        ));
    }
}
