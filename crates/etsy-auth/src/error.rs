//! Error types for OAuth authentication and credential storage

/// Errors from OAuth authentication and credential storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The authorization server reported an error in the redirect
    /// (`error`/`error_description` query parameters).
    #[error("OAuth error: {code} - {description}")]
    OauthProtocol { code: String, description: String },

    /// Redirect URL carried no authorization code.
    #[error("no authorization code found in redirect URL")]
    MissingCode,

    /// Redirect `state` did not match the value sent with the
    /// authorization URL.
    #[error("state parameter mismatch - possible CSRF attack")]
    StateMismatch,

    /// Token exchange attempted with no in-flight authorization attempt.
    #[error("no PKCE verifier stored; call auth_url() first")]
    NoPendingAttempt,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The token endpoint rejected the refresh token (401/403).
    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),

    /// No usable token and no refresh path.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("malformed redirect URL: {0}")]
    InvalidRedirect(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
