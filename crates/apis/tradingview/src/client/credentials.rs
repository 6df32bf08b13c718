use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use standard_lib::engine_core::api_traits::{AuthCredentials, CredentialProvider, PlanTier};

use crate::client::server_models::UNAUTHORIZED_TOKEN;

/// A provider for a token the caller already holds (e.g. from the
/// environment). Cannot recover from a rejection.
pub struct StaticTokenProvider {
    creds: AuthCredentials,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, plan: PlanTier) -> Self {
        Self {
            creds: AuthCredentials::new(token, plan),
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn obtain(&self) -> anyhow::Result<AuthCredentials> {
        Ok(self.creds.clone())
    }
}

/// Free-tier access without a credential. Data may be limited.
pub struct NoLoginProvider;

#[async_trait::async_trait]
impl CredentialProvider for NoLoginProvider {
    async fn obtain(&self) -> anyhow::Result<AuthCredentials> {
        warn!("no credentials configured; using no-login access, data you fetch may be limited");
        Ok(AuthCredentials::new(UNAUTHORIZED_TOKEN, PlanTier::Free))
    }
}

/// File-backed token cache wrapping an inner provider.
///
/// `obtain` prefers the cached token; on a miss it asks the inner provider
/// and caches the result. `recover` deletes the stale cache first (the
/// server just rejected it) and then delegates to the inner provider, so a
/// fresh token survives for the next process.
pub struct CachedTokenProvider {
    path: PathBuf,
    plan: PlanTier,
    inner: Option<Arc<dyn CredentialProvider>>,
}

impl CachedTokenProvider {
    pub fn new(path: impl Into<PathBuf>, plan: PlanTier) -> Self {
        Self {
            path: path.into(),
            plan,
            inner: None,
        }
    }

    pub fn with_inner(mut self, inner: Arc<dyn CredentialProvider>) -> Self {
        self.inner = Some(inner);
        self
    }

    fn read_cached(&self) -> Option<String> {
        let token = std::fs::read_to_string(&self.path).ok()?;
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(token.to_string())
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, token)
            .with_context(|| format!("saving auth token to {}", self.path.display()))?;
        info!("saved auth token to {}", self.path.display());
        Ok(())
    }

    fn delete(&self) {
        if std::fs::remove_file(&self.path).is_ok() {
            info!("deleted cached auth token at {}", self.path.display());
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for CachedTokenProvider {
    async fn obtain(&self) -> anyhow::Result<AuthCredentials> {
        if let Some(token) = self.read_cached() {
            info!("loaded cached auth token from {}", self.path.display());
            return Ok(AuthCredentials::new(token, self.plan));
        }
        let inner = self
            .inner
            .as_ref()
            .with_context(|| format!("no cached token at {} and no inner provider", self.path.display()))?;
        let creds = inner.obtain().await?;
        if let Err(e) = self.save(&creds.token) {
            warn!("could not cache auth token: {e}");
        }
        Ok(creds)
    }

    async fn recover(&self) -> Option<AuthCredentials> {
        self.delete();
        let creds = self.inner.as_ref()?.recover().await?;
        if let Err(e) = self.save(&creds.token) {
            warn!("could not cache recovered auth token: {e}");
        }
        Some(creds)
    }
}
