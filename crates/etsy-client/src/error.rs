//! Error types for the authenticated request pipeline
//!
//! API errors carry an HTTP-status-specific prefix via their `Display`
//! impl, with the server-provided `error`/`error_description` detail (or
//! raw body text) as the message.

/// Errors from API requests and bulk operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token lifecycle / credential store failure underneath a request.
    #[error(transparent)]
    Auth(#[from] etsy_auth::Error),

    /// No access token and no refresh path.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Bad Request - {0}")]
    BadRequest(String),

    #[error("Unauthorized - {0}")]
    Unauthorized(String),

    #[error("Forbidden - {0}")]
    Forbidden(String),

    /// 403 where the server flagged a missing OAuth scope. Reconnecting
    /// re-runs the authorization flow with the full scope list.
    #[error("Insufficient permissions - {0}. Please reconnect with required scopes.")]
    InsufficientScope(String),

    #[error("Not Found - {0}")]
    NotFound(String),

    /// Any other non-success status.
    #[error("API Error ({status}) - {message}")]
    Api { status: u16, message: String },

    /// 429 responses kept coming after the retry budget was spent.
    #[error("rate limited: gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Network-level failure, re-raised unchanged after logging.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A required resource (shop, profile) was not resolvable.
    #[error("shop not found: {0}")]
    ShopNotFound(String),
}

/// Result alias for API operations.
pub type Result<T> = std::result::Result<T, Error>;
