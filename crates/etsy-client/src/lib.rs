//! Authenticated Etsy API v3 client
//!
//! Layers on top of `etsy-auth`: a throttled, retrying request pipeline
//! ([`client::ApiClient`]), typed error classification, the Etsy form
//! encoding ([`form::FormData`]), domain endpoints ([`endpoints::EtsyApi`]),
//! and sequential bulk operations ([`bulk`]).

pub mod bulk;
pub mod classify;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod form;
pub mod models;

pub use bulk::{BulkReport, ItemOutcome, ListingUpdate, ProductInput};
pub use client::{ApiClient, API_BASE_URL, RequestBody};
pub use endpoints::EtsyApi;
pub use error::{Error, Result};
pub use form::{FormData, FormValue};
pub use models::{ConnectionStatus, Listing, RateLimitSnapshot, Shop, User};
