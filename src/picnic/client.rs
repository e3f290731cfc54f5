//! Upstream storefront client.

use std::time::Duration;

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::PicnicConfig;

/// Header carrying the pre-issued session token.
pub const AUTH_HEADER: &str = "x-picnic-auth";

const USER_AGENT: &str = concat!("picnic-mcp/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The grocery operations the tools, prompts and resources build on.
///
/// Responses are passed through as raw JSON; the gateway does not model the
/// storefront's payloads.
#[async_trait]
pub trait GroceryApi: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Value>;
    async fn suggestions(&self, query: &str) -> anyhow::Result<Value>;
    async fn article(&self, product_id: &str) -> anyhow::Result<Value>;
    async fn cart(&self) -> anyhow::Result<Value>;
    async fn add_to_cart(&self, product_id: &str, count: u32) -> anyhow::Result<Value>;
    async fn remove_from_cart(&self, product_id: &str, count: u32) -> anyhow::Result<Value>;
    async fn clear_cart(&self) -> anyhow::Result<Value>;
    async fn delivery_slots(&self) -> anyhow::Result<Value>;
    async fn set_delivery_slot(&self, slot_id: &str) -> anyhow::Result<Value>;
    async fn deliveries(&self, statuses: &[String]) -> anyhow::Result<Value>;
    async fn delivery(&self, delivery_id: &str) -> anyhow::Result<Value>;
    async fn user(&self) -> anyhow::Result<Value>;
    async fn lists(&self) -> anyhow::Result<Value>;
}

/// Returns the storefront URL for a country and API version.
#[must_use]
pub fn storefront_url(country_code: &str, api_version: &str) -> String {
    format!(
        "https://storefront-prod.{}.picnicinternational.com/api/{api_version}",
        country_code.to_lowercase()
    )
}

/// [`GroceryApi`] over the storefront's HTTP API.
#[derive(Debug, Clone)]
pub struct PicnicClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl PicnicClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &PicnicConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| storefront_url(&config.country_code, &config.api_version));
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    fn token(&self) -> anyhow::Result<&str> {
        self.auth_token.as_deref().context(
            "Not authenticated with Picnic: set PICNIC_AUTH_TOKEN or picnic.auth_token",
        )
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(url)
            .query(query)
            .header("accept", "application/json")
            .header(AUTH_HEADER, self.token()?)
            .send()
            .await
            .with_context(|| format!("send GET {path}"))?;
        parse_json_response(path, resp).await
    }

    async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> anyhow::Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(url)
            .header("accept", "application/json")
            .header(AUTH_HEADER, self.token()?)
            .json(body)
            .send()
            .await
            .with_context(|| format!("send POST {path}"))?;
        parse_json_response(path, resp).await
    }
}

async fn parse_json_response(path: &str, resp: reqwest::Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let bytes = resp.bytes().await.context("read response bytes")?;
    if !status.is_success() {
        if let Ok(err) = serde_json::from_slice::<Value>(&bytes) {
            if let Some(message) = err.pointer("/error/message").and_then(Value::as_str) {
                bail!("Picnic API error {status} on {path}: {message}");
            }
        }
        bail!(
            "Picnic API http error {status} on {path}: {}",
            String::from_utf8_lossy(&bytes)
        );
    }
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).context("decode response json")
}

#[async_trait]
impl GroceryApi for PicnicClient {
    async fn search(&self, query: &str) -> anyhow::Result<Value> {
        self.get_json("/search", &[("search_term", query)]).await
    }

    async fn suggestions(&self, query: &str) -> anyhow::Result<Value> {
        self.get_json("/suggest", &[("search_term", query)]).await
    }

    async fn article(&self, product_id: &str) -> anyhow::Result<Value> {
        self.get_json(&format!("/articles/{product_id}"), &[]).await
    }

    async fn cart(&self) -> anyhow::Result<Value> {
        self.get_json("/cart", &[]).await
    }

    async fn add_to_cart(&self, product_id: &str, count: u32) -> anyhow::Result<Value> {
        self.post_json("/cart/add_product", &json!({ "product_id": product_id, "count": count }))
            .await
    }

    async fn remove_from_cart(&self, product_id: &str, count: u32) -> anyhow::Result<Value> {
        self.post_json("/cart/remove_product", &json!({ "product_id": product_id, "count": count }))
            .await
    }

    async fn clear_cart(&self) -> anyhow::Result<Value> {
        self.post_json("/cart/clear", &json!({})).await
    }

    async fn delivery_slots(&self) -> anyhow::Result<Value> {
        self.get_json("/cart/delivery_slots", &[]).await
    }

    async fn set_delivery_slot(&self, slot_id: &str) -> anyhow::Result<Value> {
        self.post_json("/cart/set_delivery_slot", &json!({ "slot_id": slot_id }))
            .await
    }

    async fn deliveries(&self, statuses: &[String]) -> anyhow::Result<Value> {
        self.post_json("/deliveries/summary", &statuses).await
    }

    async fn delivery(&self, delivery_id: &str) -> anyhow::Result<Value> {
        self.get_json(&format!("/deliveries/{delivery_id}"), &[]).await
    }

    async fn user(&self) -> anyhow::Result<Value> {
        self.get_json("/user", &[]).await
    }

    async fn lists(&self) -> anyhow::Result<Value> {
        self.get_json("/lists", &[]).await
    }
}
