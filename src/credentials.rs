//! Credential storage.
//!
//! The geekmarks token is the only secret. It is stored as one JSON blob so
//! a future field does not need another keychain prompt.
//!
//! # Storage
//!
//! Production: single OS keyring entry `geekmarks/credentials`.
//! Test mode: file at `{config_dir}/credentials.json`.
//!
//! "Logged out" is an empty blob (`{}`), not a missing entry.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Keyring service name.
const KEYRING_SERVICE: &str = "geekmarks";
/// Keyring entry name.
const KEYRING_CREDENTIALS: &str = "credentials";

/// Number of attempts for keyring access.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between attempts.
const KEYRING_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Stored credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Geekmarks API token, as returned by the authenticate endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    /// Credentials holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Token, if logged in.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Where credentials live.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credentials, `None` if nothing was ever stored.
    async fn get(&self) -> Result<Option<Credentials>>;

    /// Replace the stored credentials.
    async fn set(&self, credentials: Credentials) -> Result<()>;
}

/// Store for the current environment: a file in test mode, the OS keyring
/// otherwise.
pub fn default_store() -> Result<Box<dyn CredentialStore>> {
    if crate::env::should_skip_keyring() {
        let path = crate::config::Config::config_dir()?.join("credentials.json");
        return Ok(Box::new(FileStore::new(path)));
    }
    Ok(Box::new(KeyringStore::default()))
}

/// OS keyring store.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    entry: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
    }
}

impl KeyringStore {
    /// Store using a custom service/entry pair.
    pub fn new(service: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entry: entry.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))
    }

    fn load_blocking(&self) -> Result<Option<Credentials>> {
        let entry = self.entry()?;
        let mut last_error = None;

        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "[Auth] Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                std::thread::sleep(KEYRING_RETRY_DELAY);
            }

            match entry.get_password() {
                Ok(json) => match serde_json::from_str(&json) {
                    Ok(creds) => return Ok(Some(creds)),
                    Err(e) => {
                        // Retrying will not fix corrupted data.
                        log::warn!("[Auth] Keyring data corrupted, ignoring it: {}", e);
                        return Ok(None);
                    }
                },
                Err(keyring::Error::NoEntry) => return Ok(None),
                Err(e) => {
                    log::debug!("[Auth] Keyring access attempt {} failed: {:?}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(anyhow::anyhow!("Keyring access failed: {e:?}")),
            None => Ok(None),
        }
    }

    fn save_blocking(&self, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_string(credentials)?;
        self.entry()?
            .set_password(&json)
            .map_err(|e| anyhow::anyhow!("Failed to store credentials in keyring: {e:?}"))?;
        log::info!("[Auth] Saved credentials to OS keyring");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self) -> Result<Option<Credentials>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_blocking())
            .await
            .context("Keyring task failed")?
    }

    async fn set(&self, credentials: Credentials) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&credentials))
            .await
            .context("Keyring task failed")?
    }
}

/// JSON file store, used in test mode or with an explicit path.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self) -> Result<Option<Credentials>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let creds = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid credentials file {}", self.path.display()))?;
                Ok(Some(creds))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[Auth] No credentials file found");
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn set(&self, credentials: Credentials) -> Result<()> {
        let json = serde_json::to_string_pretty(&credentials)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        log::debug!("[Auth] Saved credentials to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<Credentials>>,
}

impl MemoryStore {
    /// Store pre-filled with `credentials`.
    pub fn with(credentials: Credentials) -> Self {
        Self {
            inner: Mutex::new(Some(credentials)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self) -> Result<Option<Credentials>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn set(&self, credentials: Credentials) -> Result<()> {
        *self.inner.lock().await = Some(credentials);
        Ok(())
    }
}
