//! Token lifecycle management
//!
//! Owns the decision of *when* to refresh; the *how* is delegated to the
//! bound [`OauthHandshake`], and results are persisted through the
//! [`CredentialStore`]. Tokens are refreshed when they expire within
//! [`REFRESH_MARGIN_SECS`] of now. The stored expiry is always an absolute
//! unix timestamp, computed at save time from the server's `expires_in`
//! delta, so it survives process restarts.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::constants::REFRESH_MARGIN_SECS;
use crate::credentials::{ACCESS_TOKEN, CredentialStore, REFRESH_TOKEN, TOKEN_EXPIRES};
use crate::error::{Error, Result};
use crate::handshake::{OauthHandshake, TokenResponse};

/// Manages OAuth tokens with transparent refresh-on-expiry.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    handshake: Option<OauthHandshake>,
}

impl TokenManager {
    pub fn new(store: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            store,
            http,
            handshake: None,
        }
    }

    /// Bind the handshake used for refresh delegation.
    ///
    /// Without a bound handshake, any operation that needs a refresh
    /// surfaces a fatal error rather than returning a stale token.
    pub fn bind_handshake(&mut self, handshake: OauthHandshake) {
        self.handshake = Some(handshake);
    }

    /// Persist a token response.
    ///
    /// `token_expires` is stored as `now + expires_in` (absolute unix
    /// seconds). When a refresh response omits `refresh_token`, the prior
    /// refresh token is retained.
    pub async fn save_tokens(&self, token: &TokenResponse) -> Result<()> {
        let expires_at = now_secs() + token.expires_in;
        self.store.set(ACCESS_TOKEN, &token.access_token).await?;
        if let Some(refresh) = &token.refresh_token {
            self.store.set(REFRESH_TOKEN, refresh).await?;
        }
        self.store
            .set(TOKEN_EXPIRES, &expires_at.to_string())
            .await?;
        info!(expires_at, "saved OAuth tokens");
        Ok(())
    }

    /// Current access token, refreshing first when it is within the
    /// margin of expiry.
    ///
    /// Returns `Ok(None)` if never authenticated. A needed-but-impossible
    /// refresh (no handshake bound, no refresh token) is an error, never a
    /// silent stale token.
    pub async fn access_token(&self) -> Result<Option<String>> {
        if self.needs_refresh().await {
            self.refresh().await?;
        }
        Ok(self.store.get(ACCESS_TOKEN).await)
    }

    /// Absolute expiry of the current access token, if one was ever saved.
    pub async fn expires_at(&self) -> Option<u64> {
        let raw = self.store.get(TOKEN_EXPIRES).await?;
        match raw.parse::<f64>() {
            Ok(secs) if secs > 0.0 => Some(secs as u64),
            _ => {
                warn!(value = raw, "unparseable token expiry, treating as unset");
                None
            }
        }
    }

    /// Whether the token is due for refresh.
    ///
    /// An unset expiry (never authenticated) is never "needs refresh" —
    /// there is nothing to refresh with.
    pub async fn needs_refresh(&self) -> bool {
        needs_refresh_at(self.expires_at().await, now_secs())
    }

    /// Refresh the access token via the bound handshake and persist the
    /// result. Failures propagate — callers must see them, since every
    /// subsequent request depends on the outcome.
    pub async fn refresh(&self) -> Result<()> {
        let handshake = self
            .handshake
            .as_ref()
            .ok_or_else(|| Error::NotAuthenticated("no OAuth handshake bound".into()))?;
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN)
            .await
            .ok_or_else(|| Error::NotAuthenticated("no refresh token available".into()))?;

        let token = handshake.refresh(&self.http, &refresh_token).await?;
        self.save_tokens(&token).await
    }

    /// Whether an access token is stored at all. Says nothing about
    /// whether it is still valid.
    pub async fn is_authenticated(&self) -> bool {
        self.store.get(ACCESS_TOKEN).await.is_some()
    }

    /// Seconds until expiry: negative when already expired, `None` when
    /// never authenticated.
    pub async fn seconds_until_expiry(&self) -> Option<i64> {
        let expires_at = self.expires_at().await?;
        Some(expires_at as i64 - now_secs() as i64)
    }

    /// Delete access/refresh/expiry keys (logout). The API key is not a
    /// token and survives.
    pub async fn clear_tokens(&self) -> Result<()> {
        self.store.delete(ACCESS_TOKEN).await?;
        self.store.delete(REFRESH_TOKEN).await?;
        self.store.delete(TOKEN_EXPIRES).await?;
        info!("cleared OAuth tokens");
        Ok(())
    }
}

/// Pure refresh predicate: due once `now` reaches `expires_at` minus the
/// margin. Unset expiry is never due.
fn needs_refresh_at(expires_at: Option<u64>, now: u64) -> bool {
    match expires_at {
        Some(expires_at) => now >= expires_at.saturating_sub(REFRESH_MARGIN_SECS),
        None => false,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
