//! Shop, listing, inventory, and receipt operations
//!
//! Thin wrappers over [`ApiClient`] that know the Etsy v3 paths and which
//! body encoding each endpoint expects. Listing create/update go through
//! the custom form encoder; inventory updates are the one write that takes
//! a JSON body; image upload is multipart.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use etsy_auth::CredentialStore;

use crate::client::{ApiClient, RequestBody};
use crate::error::{Error, Result};
use crate::form::FormData;
use crate::models::{Shop, User};

/// Page size used when walking a full collection.
const PAGE_LIMIT: u32 = 100;

/// Domain operations against the Etsy v3 application API.
pub struct EtsyApi {
    client: ApiClient,
    store: Arc<CredentialStore>,
}

impl EtsyApi {
    pub fn new(client: ApiClient, store: Arc<CredentialStore>) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The user the current tokens belong to.
    pub async fn current_user(&self) -> Result<User> {
        let value = self.client.get("/users/me", &[]).await?;
        serde_json::from_value(value).map_err(|e| Error::Http(format!("unexpected user shape: {e}")))
    }

    /// Shops owned by the current user.
    pub async fn user_shops(&self) -> Result<Vec<Shop>> {
        let value = self.client.get("/users/me/shops", &[]).await?;
        // The endpoint returns either a bare shop object or a results page
        // depending on account shape.
        if let Some(results) = value.get("results") {
            return serde_json::from_value(results.clone())
                .map_err(|e| Error::Http(format!("unexpected shops shape: {e}")));
        }
        let shop: Shop = serde_json::from_value(value)
            .map_err(|e| Error::Http(format!("unexpected shop shape: {e}")))?;
        Ok(vec![shop])
    }

    /// Resolve the shop to operate on.
    ///
    /// A manually configured shop id wins; otherwise the user's shops are
    /// queried, falling back to the `shop_id` field on the user record.
    pub async fn find_shop_id(&self) -> Result<u64> {
        if let Some(manual) = self.store.shop_id().await
            && let Ok(id) = manual.parse::<u64>()
        {
            debug!(shop_id = id, "using manually configured shop id");
            return Ok(id);
        }

        if let Ok(shops) = self.user_shops().await
            && let Some(shop) = shops.first()
        {
            return Ok(shop.shop_id);
        }

        let user = self.current_user().await?;
        user.shop_id.ok_or_else(|| {
            Error::ShopNotFound("no shop associated with this account".to_string())
        })
    }

    pub async fn shop(&self, shop_id: u64) -> Result<Shop> {
        let value = self.client.get(&format!("/shops/{shop_id}"), &[]).await?;
        serde_json::from_value(value).map_err(|e| Error::Http(format!("unexpected shop shape: {e}")))
    }

    pub async fn update_shop(&self, shop_id: u64, form: FormData) -> Result<Value> {
        self.client
            .put(&format!("/shops/{shop_id}"), RequestBody::Form(form))
            .await
    }

    /// One page of listings in the given state (`active`, `draft`, ...).
    pub async fn shop_listings(
        &self,
        shop_id: u64,
        state: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Value> {
        self.client
            .get(
                &format!("/shops/{shop_id}/listings"),
                &[
                    ("state", state.to_string()),
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                ],
            )
            .await
    }

    /// Every listing in the given state, paged until a short page.
    pub async fn all_shop_listings(&self, shop_id: u64, state: &str) -> Result<Vec<Value>> {
        let mut listings = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.shop_listings(shop_id, state, PAGE_LIMIT, offset).await?;
            let results = page
                .get("results")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            let count = results.len();
            listings.extend(results);
            if count < PAGE_LIMIT as usize {
                break;
            }
            offset += PAGE_LIMIT;
        }
        debug!(shop_id, state, count = listings.len(), "fetched all listings");
        Ok(listings)
    }

    pub async fn create_listing(&self, shop_id: u64, form: FormData) -> Result<Value> {
        self.client
            .post(&format!("/shops/{shop_id}/listings"), RequestBody::Form(form))
            .await
    }

    pub async fn update_listing(
        &self,
        shop_id: u64,
        listing_id: u64,
        form: FormData,
    ) -> Result<Value> {
        self.client
            .patch(
                &format!("/shops/{shop_id}/listings/{listing_id}"),
                RequestBody::Form(form),
            )
            .await
    }

    pub async fn delete_listing(&self, listing_id: u64) -> Result<Value> {
        self.client.delete(&format!("/listings/{listing_id}")).await
    }

    /// Move a draft listing to `active`.
    pub async fn publish_listing(&self, shop_id: u64, listing_id: u64) -> Result<Value> {
        info!(shop_id, listing_id, "publishing listing");
        self.update_listing(shop_id, listing_id, FormData::new().text("state", "active"))
            .await
    }

    /// Attach an image to a listing. `rank` orders images from 1.
    pub async fn upload_listing_image(
        &self,
        shop_id: u64,
        listing_id: u64,
        file_name: &str,
        bytes: Vec<u8>,
        rank: u32,
    ) -> Result<Value> {
        self.client
            .post(
                &format!("/shops/{shop_id}/listings/{listing_id}/images"),
                RequestBody::Multipart {
                    field_name: "image".to_string(),
                    file_name: file_name.to_string(),
                    bytes,
                    fields: vec![("rank".to_string(), rank.to_string())],
                },
            )
            .await
    }

    /// Fetch an image over HTTP and attach it to a listing.
    ///
    /// A fetch failure or a non-image content type is a skip (`Ok(None)`),
    /// not an error — one dead image URL should not sink the listing.
    pub async fn upload_listing_image_from_url(
        &self,
        shop_id: u64,
        listing_id: u64,
        image_url: &str,
        rank: u32,
    ) -> Result<Option<Value>> {
        let response = match self
            .client
            .http()
            .get(image_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(r) => r,
            Err(e) => {
                warn!(image_url, error = %e, "image fetch failed, skipping");
                return Ok(None);
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            warn!(image_url, content_type, "non-image URL, skipping");
            return Ok(None);
        }

        let bytes = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                warn!(image_url, error = %e, "image download failed, skipping");
                return Ok(None);
            }
        };

        let uploaded = self
            .upload_listing_image(shop_id, listing_id, &format!("image_{rank}.jpg"), bytes, rank)
            .await?;
        Ok(Some(uploaded))
    }

    pub async fn get_inventory(&self, listing_id: u64) -> Result<Value> {
        self.client
            .get(&format!("/listings/{listing_id}/inventory"), &[])
            .await
    }

    /// Replace the full inventory document. The API requires the complete
    /// products array back, not a delta.
    pub async fn update_inventory(&self, listing_id: u64, inventory: Value) -> Result<Value> {
        self.client
            .put(
                &format!("/listings/{listing_id}/inventory"),
                RequestBody::Json(inventory),
            )
            .await
    }

    pub async fn shop_receipts(&self, shop_id: u64, limit: u32, offset: u32) -> Result<Value> {
        self.client
            .get(
                &format!("/shops/{shop_id}/receipts"),
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await
    }

    pub async fn all_shop_receipts(&self, shop_id: u64) -> Result<Vec<Value>> {
        let mut receipts = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.shop_receipts(shop_id, PAGE_LIMIT, offset).await?;
            let results = page
                .get("results")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            let count = results.len();
            receipts.extend(results);
            if count < PAGE_LIMIT as usize {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(receipts)
    }

    pub async fn shipping_profiles(&self, shop_id: u64) -> Result<Value> {
        self.client
            .get(&format!("/shops/{shop_id}/shipping-profiles"), &[])
            .await
    }

    pub async fn create_shipping_profile(&self, shop_id: u64, form: FormData) -> Result<Value> {
        self.client
            .post(
                &format!("/shops/{shop_id}/shipping-profiles"),
                RequestBody::Form(form),
            )
            .await
    }

    pub async fn return_policies(&self, shop_id: u64) -> Result<Value> {
        self.client
            .get(&format!("/shops/{shop_id}/policies/return"), &[])
            .await
    }

    pub async fn create_return_policy(&self, shop_id: u64, form: FormData) -> Result<Value> {
        self.client
            .post(
                &format!("/shops/{shop_id}/policies/return"),
                RequestBody::Form(form),
            )
            .await
    }
}
