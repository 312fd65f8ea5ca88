//! Typed views of API responses
//!
//! Only the fields the toolkit actually reads are typed; everything else
//! rides along in the raw `serde_json::Value` the pipeline returns. The
//! domain layer is deliberately a thin pass-through.

use serde::{Deserialize, Serialize};

/// Authenticated user, from `GET /users/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub user_id: u64,
    #[serde(default)]
    pub login_name: Option<String>,
    #[serde(default)]
    pub primary_email: Option<String>,
    /// Present when the user owns a shop.
    #[serde(default)]
    pub shop_id: Option<u64>,
}

/// Shop summary, from `GET /shops/{shop_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Shop {
    pub shop_id: u64,
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub listing_active_count: Option<u64>,
}

/// Listing summary, from the listings endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub listing_id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub quantity: Option<u64>,
}

/// Result of the three-step connection test: key validity via the public
/// ping endpoint, then stored-token presence, then an authenticated call.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub message: String,
    pub api_key_valid: bool,
    pub authenticated: bool,
}

/// Last-observed rate-limit headers.
///
/// Advisory only: the pipeline records these from every response but
/// never consults them before issuing a request. The fixed inter-request
/// spacing is the only outbound throttle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RateLimitSnapshot {
    pub per_second_limit: Option<u32>,
    pub per_second_remaining: Option<u32>,
    pub daily_limit: Option<u32>,
    pub daily_remaining: Option<u32>,
}
