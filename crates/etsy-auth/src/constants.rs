//! Etsy OAuth constants
//!
//! Endpoint and scope configuration for the Etsy API v3 OAuth flow. These
//! values are not secrets — the client_id is the seller's own API key and
//! is supplied at runtime. The actual secrets (access/refresh tokens) are
//! managed by the credential store.

/// Authorization endpoint (etsy.com, not the API host)
pub const AUTHORIZE_ENDPOINT: &str = "https://www.etsy.com/oauth/connect";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://api.etsy.com/v3/public/oauth/token";

/// Default OAuth redirect URI for the manual copy-paste flow
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// OAuth scopes requested during authorization.
/// Covers listing read/write/delete, shop read/write, transactions, and
/// email — everything the shop tool's import and bulk-upload paths need.
pub const SCOPES: &str = "listings_r listings_w listings_d shops_r shops_w transactions_r email_r";

/// Refresh the access token when it expires within this many seconds.
pub const REFRESH_MARGIN_SECS: u64 = 300;
