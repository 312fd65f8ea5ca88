//! Sequential bulk operations over listings
//!
//! Bulk work runs strictly one item at a time with a fixed pause between
//! items, on top of the pipeline's own throttle. Partial failure is the
//! steady state: each item's error is captured in its outcome record and
//! the run continues, so one bad product never aborts a catalog upload.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::endpoints::EtsyApi;
use crate::error::Result;
use crate::form::FormData;

/// Pause between consecutive bulk items.
const ITEM_DELAY: Duration = Duration::from_millis(500);

/// Etsy caps images per listing.
const MAX_IMAGES: usize = 10;

/// Etsy caps tags and materials per listing.
const MAX_TAGS: usize = 13;

/// One product to create as a draft listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub title: String,
    pub description: String,
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub taxonomy_id: u64,
    #[serde(default = "default_who_made")]
    pub who_made: String,
    #[serde(default = "default_when_made")]
    pub when_made: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    /// Image source URLs, uploaded in order as ranks 1..
    #[serde(default)]
    pub image_urls: Vec<String>,
}

fn default_quantity() -> u32 {
    1
}

fn default_who_made() -> String {
    "i_did".to_string()
}

fn default_when_made() -> String {
    "made_to_order".to_string()
}

/// One field change to apply to an existing listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingUpdate {
    pub listing_id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<u32>,
}

/// Outcome of one bulk item: either way, the run went on.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub title: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<u64>,
    pub images_uploaded: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a per-item operation reports on success.
#[derive(Debug, Clone, Default)]
pub struct ItemResult {
    pub listing_id: Option<u64>,
    pub images_uploaded: u32,
    pub status: Option<String>,
}

/// Full bulk run report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Drive items through `op` one at a time, `delay` apart, collecting an
/// outcome per item. An `Err` from `op` is recorded, never propagated.
pub async fn run_sequential<T, F, Fut>(
    items: Vec<T>,
    delay: Duration,
    label: impl Fn(&T) -> String,
    op: F,
) -> BulkReport
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<ItemResult>>,
{
    let total = items.len();
    let mut report = BulkReport::default();
    for (index, item) in items.into_iter().enumerate() {
        let title = label(&item);
        info!(item = index + 1, total, %title, "bulk item start");
        match op(item).await {
            Ok(result) => report.outcomes.push(ItemOutcome {
                title,
                success: true,
                listing_id: result.listing_id,
                images_uploaded: result.images_uploaded,
                status: result.status,
                error: None,
            }),
            Err(e) => {
                warn!(%title, error = %e, "bulk item failed");
                report.outcomes.push(ItemOutcome {
                    title,
                    success: false,
                    listing_id: None,
                    images_uploaded: 0,
                    status: None,
                    error: Some(e.to_string()),
                });
            }
        }
        if index + 1 < total && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    report
}

/// Shipping profile created when the shop has none.
fn default_shipping_profile() -> FormData {
    FormData::new()
        .text("title", "US Standard Shipping")
        .text("origin_country_iso", "US")
        .text("primary_cost", "5.99")
        .text("secondary_cost", "2.99")
        .text("min_processing_time", 1)
        .text("max_processing_time", 3)
}

/// Return policy created when the shop has none.
fn default_return_policy() -> FormData {
    FormData::new()
        .text("accepts_returns", "true")
        .text("accepts_exchanges", "true")
        .text("return_deadline", 30)
}

fn first_result_id(value: &Value, id_field: &str) -> Option<u64> {
    value
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|a| a.first())
        .and_then(|p| p.get(id_field))
        .and_then(|id| id.as_u64())
}

/// Existing shipping profile id, or a freshly created default one.
async fn ensure_shipping_profile(api: &EtsyApi, shop_id: u64) -> Result<u64> {
    let profiles = api.shipping_profiles(shop_id).await?;
    if let Some(id) = first_result_id(&profiles, "shipping_profile_id") {
        return Ok(id);
    }
    info!(shop_id, "no shipping profile found, creating default");
    let created = api
        .create_shipping_profile(shop_id, default_shipping_profile())
        .await?;
    created
        .get("shipping_profile_id")
        .and_then(|id| id.as_u64())
        .ok_or_else(|| crate::error::Error::Http("shipping profile response missing id".into()))
}

/// Existing return policy id, or a freshly created default one.
async fn ensure_return_policy(api: &EtsyApi, shop_id: u64) -> Result<u64> {
    let policies = api.return_policies(shop_id).await?;
    if let Some(id) = first_result_id(&policies, "return_policy_id") {
        return Ok(id);
    }
    info!(shop_id, "no return policy found, creating default");
    let created = api.create_return_policy(shop_id, default_return_policy()).await?;
    created
        .get("return_policy_id")
        .and_then(|id| id.as_u64())
        .ok_or_else(|| crate::error::Error::Http("return policy response missing id".into()))
}

fn listing_form(product: &ProductInput, shipping_profile_id: u64, return_policy_id: u64) -> FormData {
    let tags: Vec<&String> = product.tags.iter().take(MAX_TAGS).collect();
    let materials: Vec<&String> = product.materials.iter().take(MAX_TAGS).collect();
    FormData::new()
        .text("quantity", product.quantity)
        .text("title", &product.title)
        .text("description", &product.description)
        .text("price", product.price)
        .text("who_made", &product.who_made)
        .text("when_made", &product.when_made)
        .text("taxonomy_id", product.taxonomy_id)
        .text("state", "draft")
        .text("shipping_profile_id", shipping_profile_id)
        .text("return_policy_id", return_policy_id)
        .maybe_list("sku", product.sku.as_slice())
        .maybe_list("tags", &tags)
        .maybe_list("materials", &materials)
}

/// Create a draft listing per product, upload its images, and publish
/// listings that got at least one image. Imageless listings stay draft.
pub async fn upload_products(api: &EtsyApi, products: Vec<ProductInput>) -> Result<BulkReport> {
    let shop_id = api.find_shop_id().await?;
    let shipping_profile_id = ensure_shipping_profile(api, shop_id).await?;
    let return_policy_id = ensure_return_policy(api, shop_id).await?;

    let report = run_sequential(
        products,
        ITEM_DELAY,
        |p| p.title.clone(),
        |product| async move {
            let created = api
                .create_listing(
                    shop_id,
                    listing_form(&product, shipping_profile_id, return_policy_id),
                )
                .await?;
            let listing_id = created
                .get("listing_id")
                .and_then(|id| id.as_u64())
                .ok_or_else(|| crate::error::Error::Http("listing response missing id".into()))?;

            let mut images_uploaded = 0u32;
            for (index, url) in product.image_urls.iter().take(MAX_IMAGES).enumerate() {
                let uploaded = api
                    .upload_listing_image_from_url(shop_id, listing_id, url, index as u32 + 1)
                    .await?;
                if uploaded.is_some() {
                    images_uploaded += 1;
                }
            }

            let status = if images_uploaded > 0 {
                api.publish_listing(shop_id, listing_id).await?;
                "active"
            } else {
                "draft"
            };

            Ok(ItemResult {
                listing_id: Some(listing_id),
                images_uploaded,
                status: Some(status.to_string()),
            })
        },
    )
    .await;

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "bulk upload finished"
    );
    Ok(report)
}

/// Apply field updates to existing listings, one PATCH per item.
pub async fn update_listings(api: &EtsyApi, updates: Vec<ListingUpdate>) -> Result<BulkReport> {
    let shop_id = api.find_shop_id().await?;
    let report = run_sequential(
        updates,
        ITEM_DELAY,
        |u| format!("listing {}", u.listing_id),
        |update| async move {
            let form = FormData::new()
                .maybe_text("title", update.title.as_ref())
                .maybe_text("description", update.description.as_ref())
                .maybe_text("price", update.price)
                .maybe_text("quantity", update.quantity);
            api.update_listing(shop_id, update.listing_id, form).await?;
            Ok(ItemResult {
                listing_id: Some(update.listing_id),
                ..ItemResult::default()
            })
        },
    )
    .await;
    Ok(report)
}

/// Delete listings one at a time.
pub async fn delete_listings(api: &EtsyApi, listing_ids: Vec<u64>) -> Result<BulkReport> {
    let report = run_sequential(
        listing_ids,
        ITEM_DELAY,
        |id| format!("listing {id}"),
        |listing_id| async move {
            api.delete_listing(listing_id).await?;
            Ok(ItemResult {
                listing_id: Some(listing_id),
                ..ItemResult::default()
            })
        },
    )
    .await;
    Ok(report)
}
