//! Per-request read/write authorization (§4.6). Grounded on the teacher's
//! `big_brain_client`-style reqwest client for control-plane calls, paired
//! with a small TTL cache so steady-state traffic doesn't hit the control
//! plane on every request.
use std::{
    collections::HashMap,
    time::{
        Duration,
        Instant,
    },
};

use errors::ErrorMetadata;
use index_protocol::ModelPermission;
use parking_lot::Mutex;

/// Permission cache entries live for at most 60s (§3.3, §4.6).
pub const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Which permission a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Calls the control plane's model-permissions endpoint (§6.3).
pub struct ControlPlaneClient {
    client: reqwest::Client,
    model_bazaar_url: String,
}

impl ControlPlaneClient {
    pub fn new(model_bazaar_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model_bazaar_url: model_bazaar_url.into(),
        }
    }

    pub async fn permissions(&self, token: &str, model_id: &str) -> anyhow::Result<ModelPermission> {
        let url = format!("{}/api/model/{model_id}/permissions", self.model_bazaar_url);
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(format!("control plane unreachable: {e}"))))?;
        if let Err(e) = resp.error_for_status_ref() {
            anyhow::bail!(ErrorMetadata::internal(format!(
                "control plane rejected permission check: {e}"
            )));
        }
        resp.json::<ModelPermission>()
            .await
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(format!("malformed permission response: {e}"))))
    }
}

struct CacheEntry {
    permission: ModelPermission,
    expires_at: Instant,
}

/// Caches `(token, model_id) -> permission` for up to [`PERMISSION_CACHE_TTL`].
pub struct AuthGate {
    control_plane: ControlPlaneClient,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl AuthGate {
    pub fn new(control_plane: ControlPlaneClient) -> Self {
        Self {
            control_plane,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Extracts the bearer token, rejects with 401 if absent, checks
    /// against the required `access`, and fails closed (500) if the
    /// control plane can't be reached (§4.6).
    pub async fn authorize(
        &self,
        bearer_token: Option<&str>,
        model_id: &str,
        access: Access,
    ) -> anyhow::Result<()> {
        let token = bearer_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::unauthorized(
                "MissingToken",
                "request is missing a bearer token",
            ))
        })?;
        let permission = self.permission_for(token, model_id).await?;
        let allowed = match access {
            Access::Read => permission.read,
            Access::Write => permission.write,
        };
        if !allowed {
            anyhow::bail!(ErrorMetadata::unauthorized(
                "InsufficientPermission",
                format!("caller lacks {access:?} access to model {model_id}"),
            ));
        }
        Ok(())
    }

    async fn permission_for(&self, token: &str, model_id: &str) -> anyhow::Result<ModelPermission> {
        let key = (token.to_string(), model_id.to_string());
        if let Some(entry) = self.cache.lock().get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.permission);
            }
        }
        // Fail closed: a control-plane error here must not fall through to
        // an unauthenticated success (§4.6).
        let permission = self.control_plane.permissions(token, model_id).await?;
        self.cache.lock().insert(
            key,
            CacheEntry {
                permission,
                expires_at: Instant::now() + PERMISSION_CACHE_TTL,
            },
        );
        Ok(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let gate = AuthGate::new(ControlPlaneClient::new("http://127.0.0.1:1"));
        let err = gate.authorize(None, "model1", Access::Read).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ErrorMetadata>().unwrap().code,
            errors::ErrorCode::Unauthorized
        );
    }

    #[tokio::test]
    async fn empty_token_is_unauthorized() {
        let gate = AuthGate::new(ControlPlaneClient::new("http://127.0.0.1:1"));
        let err = gate
            .authorize(Some(""), "model1", Access::Read)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ErrorMetadata>().unwrap().code,
            errors::ErrorCode::Unauthorized
        );
    }
}
