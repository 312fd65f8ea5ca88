//! OAuth 2.0 + PKCE handshake for the Etsy API v3
//!
//! Drives one authorization attempt through an explicit state machine:
//! `Idle → AwaitingRedirect → Exchanging → Authenticated`, with `Failed`
//! reachable from any non-terminal state. The PKCE verifier and CSRF state
//! are instance fields, so exactly one attempt can be in flight per
//! handshake; calling [`OauthHandshake::auth_url`] again discards the
//! previous attempt.
//!
//! Token refresh is a separate stateless operation — it never touches the
//! attempt state and can be called at any time with a stored refresh token.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::constants::{DEFAULT_REDIRECT_URI, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::pkce;

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The token
/// lifecycle manager converts it to an absolute unix timestamp at save
/// time. Refresh responses may omit `refresh_token`, in which case the
/// caller retains the prior one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Where one authorization attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingRedirect,
    Exchanging,
    Authenticated,
    Failed,
}

/// PKCE verifier and CSRF state for the in-flight attempt. Single use:
/// cleared on successful exchange. The verifier is wrapped so it never
/// shows up in debug output.
#[derive(Debug)]
struct PendingAttempt {
    verifier: Secret<String>,
    state: String,
}

/// OAuth 2.0 + PKCE handshake driver.
///
/// For Etsy the `client_id` is the seller's API key. The redirect flow is
/// manual: the user authorizes in a browser, gets bounced to
/// `http://localhost`, and pastes the full redirect URL back into the
/// tool, from which the authorization code is extracted.
pub struct OauthHandshake {
    api_key: String,
    redirect_uri: String,
    token_endpoint: String,
    state: HandshakeState,
    pending: Option<PendingAttempt>,
}

impl OauthHandshake {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            state: HandshakeState::Idle,
            pending: None,
        }
    }

    /// Override the redirect URI (must match the app's registered URI).
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// Point the handshake at a different token endpoint. Used by tests.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Begin an authorization attempt and return the URL to open.
    ///
    /// Generates a fresh PKCE pair and CSRF state and stores both. Any
    /// previous attempt's verifier/state is discarded — one in-flight
    /// attempt per handshake.
    pub fn auth_url(&mut self) -> String {
        let pair = pkce::generate();
        let state = pkce::generate_state();
        let url =
            pkce::build_authorization_url(&self.api_key, &self.redirect_uri, &state, &pair.challenge);

        self.pending = Some(PendingAttempt {
            verifier: Secret::new(pair.verifier),
            state,
        });
        self.state = HandshakeState::AwaitingRedirect;
        debug!("generated authorization URL, awaiting redirect");
        url
    }

    /// Extract the authorization code from the pasted redirect URL.
    ///
    /// Validates entirely locally, before any network call: a server
    /// `error` parameter, a missing `code`, or a CSRF state mismatch each
    /// fail the attempt.
    pub fn extract_code(&mut self, redirect_url: &str) -> Result<String> {
        let result = self.parse_redirect(redirect_url);
        self.state = match result {
            Ok(_) => HandshakeState::Exchanging,
            Err(_) => HandshakeState::Failed,
        };
        result
    }

    fn parse_redirect(&self, redirect_url: &str) -> Result<String> {
        let url = Url::parse(redirect_url)
            .map_err(|e| Error::InvalidRedirect(e.to_string()))?;
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        if let Some(code) = param("error") {
            return Err(Error::OauthProtocol {
                code,
                description: param("error_description")
                    .unwrap_or_else(|| "Unknown error".into()),
            });
        }

        let code = param("code").ok_or(Error::MissingCode)?;

        if let (Some(echoed), Some(pending)) = (param("state"), self.pending.as_ref())
            && echoed != pending.state
        {
            return Err(Error::StateMismatch);
        }

        Ok(code)
    }

    /// Exchange the authorization code for tokens.
    ///
    /// Presents the stored PKCE verifier to prove this client initiated
    /// the flow. On success the verifier/state are cleared (single use)
    /// and the handshake is `Authenticated`.
    pub async fn exchange_code(
        &mut self,
        client: &reqwest::Client,
        code: &str,
    ) -> Result<TokenResponse> {
        let verifier = self
            .pending
            .as_ref()
            .map(|p| p.verifier.expose().clone())
            .ok_or(Error::NoPendingAttempt)?;

        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.api_key,
            "redirect_uri": self.redirect_uri,
            "code": code,
            "code_verifier": verifier,
        });

        debug!("exchanging authorization code for tokens");
        let response = client
            .post(&self.token_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.state = HandshakeState::Failed;
                Error::Http(format!("token exchange request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            self.state = HandshakeState::Failed;
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {}",
                oauth_error_detail(&body)
            )));
        }

        let token = response.json::<TokenResponse>().await.map_err(|e| {
            self.state = HandshakeState::Failed;
            Error::TokenExchange(format!("invalid token response: {e}"))
        })?;

        self.pending = None;
        self.state = HandshakeState::Authenticated;
        info!("obtained access token");
        Ok(token)
    }

    /// Refresh an access token using a refresh token.
    ///
    /// Stateless with respect to the authorization attempt: no PKCE state
    /// is consulted or modified. A non-200 response is a hard failure with
    /// no automatic retry; 401/403 specifically mean the refresh token
    /// itself was rejected.
    pub async fn refresh(
        &self,
        client: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.api_key,
            "refresh_token": refresh_token,
        });

        debug!("refreshing access token");
        let response = client
            .post(&self.token_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = oauth_error_detail(&body);
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidGrant(format!("({status}): {detail}")));
            }
            return Err(Error::TokenExchange(format!(
                "token refresh returned {status}: {detail}"
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
        info!("refreshed access token");
        Ok(token)
    }

    /// Revoke tokens. Etsy v3 has no revoke endpoint, so this is a local
    /// no-op that always reports success — tokens expire naturally.
    pub fn revoke(&self) -> bool {
        info!("token revocation requested (tokens will expire naturally)");
        true
    }
}

/// Pull `error`/`error_description` out of an OAuth error body, falling
/// back to the raw text when it isn't the expected JSON shape.
fn oauth_error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(v) => {
            let error = v.get("error").and_then(|e| e.as_str());
            let description = v.get("error_description").and_then(|d| d.as_str());
            match (error, description) {
                (Some(e), Some(d)) => format!("{e} - {d}"),
                (Some(e), None) => e.to_string(),
                _ => body.to_string(),
            }
        }
        Err(_) => {
            if body.is_empty() {
                "<no body>".to_string()
            } else {
                body.to_string()
            }
        }
    }
}
