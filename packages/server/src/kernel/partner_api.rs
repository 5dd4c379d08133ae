//! Partner (affiliate) API client.
//!
//! The partner enforces a hard request quota per account, so every call
//! goes through a shared token-bucket limiter before it touches the wire.
//! Blocking in `acquire` is the intended behavior: a workflow that has to
//! wait for quota is still making progress.

use async_trait::async_trait;
use conveyor::RateLimiter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::AutomationError;

use super::http::{status_error, transport_error};
use super::traits::{BasePartnerApi, DeepLink, Product};

pub struct PartnerHttpClient {
    base_url: String,
    access_key: String,
    client: reqwest::Client,
    limiter: RateLimiter,
}

#[derive(Debug, Deserialize)]
struct ProductSearchResponse {
    products: Vec<ProductRecord>,
}

#[derive(Debug, Deserialize)]
struct ProductRecord {
    product_name: String,
    product_url: String,
    #[serde(default)]
    product_price: Option<String>,
    #[serde(default)]
    product_image: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeepLinkRequest<'a> {
    urls: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DeepLinkResponse {
    links: Vec<DeepLinkRecord>,
}

#[derive(Debug, Deserialize)]
struct DeepLinkRecord {
    original_url: String,
    tracking_url: String,
}

impl PartnerHttpClient {
    pub fn new(
        base_url: String,
        access_key: String,
        limiter: RateLimiter,
    ) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AutomationError::terminal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            access_key,
            client,
            limiter,
        })
    }
}

#[async_trait]
impl BasePartnerApi for PartnerHttpClient {
    async fn search_products(&self, keyword: &str, limit: u32) -> Result<Vec<Product>, AutomationError> {
        self.limiter.acquire().await;
        debug!(keyword, limit, "searching partner products");

        let response = self
            .client
            .get(format!("{}/products", self.base_url))
            .header("Authorization", format!("Bearer {}", self.access_key))
            .query(&[("keyword", keyword), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| transport_error("partner API", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("partner API", status, &body));
        }

        let search: ProductSearchResponse = response
            .json()
            .await
            .map_err(|e| transport_error("partner API", e))?;

        Ok(search
            .products
            .into_iter()
            .map(|p| Product {
                name: p.product_name,
                url: p.product_url,
                price: p.product_price,
                image_url: p.product_image,
            })
            .collect())
    }

    async fn create_deep_links(&self, urls: &[String]) -> Result<Vec<DeepLink>, AutomationError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        self.limiter.acquire().await;
        debug!(count = urls.len(), "creating deep links");

        let response = self
            .client
            .post(format!("{}/deeplinks", self.base_url))
            .header("Authorization", format!("Bearer {}", self.access_key))
            .json(&DeepLinkRequest { urls })
            .send()
            .await
            .map_err(|e| transport_error("partner API", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("partner API", status, &body));
        }

        let created: DeepLinkResponse = response
            .json()
            .await
            .map_err(|e| transport_error("partner API", e))?;

        Ok(created
            .links
            .into_iter()
            .map(|l| DeepLink {
                original_url: l.original_url,
                tracking_url: l.tracking_url,
            })
            .collect())
    }
}
