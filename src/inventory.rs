//! Inventory (DEAR) API: sale entities, the [`InventoryApi`] seam and the
//! reqwest-backed [`DearClient`].
//!
//! Sales are fetched one at a time through a shared [`RateLimiter`]; list
//! endpoints are paginated. Entity accessors are pure functions over the
//! decoded JSON record plus the locally owned [`Workflow`] flags.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::api::{self, build_client, read_json, retry_delay, transport_error};
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

const SERVICE: &str = "inventory API";

pub const DEFAULT_BASE_URL: &str = "https://inventory.dearsystems.com/ExternalApi/v2";
const WEB_BASE_URL: &str = "https://inventory.dearsystems.com";

/// Page size used by list endpoints.
pub const DEFAULT_PAGE_LIMIT: u32 = 250;

/// Attempts per request when the API answers HTTP 429.
const MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Treat an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Quantities arrive as decimals (`4.0000`); line items carry whole units.
fn whole_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or_default();
    if !raw.is_finite() || raw <= 0.0 {
        return Ok(0);
    }
    Ok(raw.round().min(u32::MAX as f64) as u32)
}

/// One order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Product {
    #[serde(rename = "ProductID", default, deserialize_with = "nullable")]
    pub product_id: String,
    #[serde(rename = "SKU", default, deserialize_with = "nullable")]
    pub sku: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "whole_quantity")]
    pub quantity: u32,
}

impl Product {
    pub fn url(&self) -> String {
        format!("{WEB_BASE_URL}/product#{}", self.product_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    #[serde(default, deserialize_with = "nullable")]
    pub invoice_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaleOrder {
    #[serde(default, deserialize_with = "nullable")]
    pub lines: Vec<Product>,
}

/// A sale as returned by the inventory API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaleSnapshot {
    #[serde(rename = "ID", alias = "SaleID")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub customer: String,
    #[serde(rename = "CustomerID", default, deserialize_with = "nullable")]
    pub customer_id: String,
    #[serde(default)]
    pub customer_reference: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub order: Option<SaleOrder>,
    #[serde(default, deserialize_with = "nullable")]
    pub note: String,
    #[serde(default, deserialize_with = "nullable")]
    pub sale_order_date: String,
    /// Fulfilment status (`ORDERED`, `PICKED`, `PACKED`, ...).
    #[serde(default, deserialize_with = "nullable")]
    pub status: String,
    #[serde(default)]
    pub shipping_address: Value,
    #[serde(default, deserialize_with = "nullable")]
    pub fulfilments: Vec<Value>,
}

impl SaleSnapshot {
    pub fn is_retail(&self) -> bool {
        self.customer_reference
            .as_deref()
            .is_some_and(|reference| reference.starts_with("RET-"))
    }

    /// Account name as written to the sheets.
    pub fn customer_name(&self) -> String {
        let name = self.customer.trim();
        if self.is_retail() {
            format!("RET {name}")
        } else {
            name.to_string()
        }
    }

    pub fn invoice_number(&self) -> &str {
        self.invoices
            .first()
            .map(|invoice| invoice.invoice_number.as_str())
            .unwrap_or_default()
    }

    pub fn items(&self) -> &[Product] {
        self.order
            .as_ref()
            .map(|order| order.lines.as_slice())
            .unwrap_or_default()
    }

    /// Note text with storefront metadata cut off.
    pub fn notes(&self) -> &str {
        let text = self.note.as_str();
        if let Some(index) = text.find("shopifyCartToken") {
            return &text[..index];
        }
        if let Some(index) = text.find("created_at:") {
            return &text[..index];
        }
        text
    }

    pub fn url(&self) -> String {
        format!("{WEB_BASE_URL}/sale#{}", self.id)
    }

    /// Order date in UTC. Timestamps without an offset are taken as UTC.
    pub fn order_date(&self) -> Option<DateTime<Utc>> {
        let raw = self.sale_order_date.trim();
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|date| date.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// `M/D` label of the order date, empty when the date is unreadable.
    pub fn order_date_label(&self) -> String {
        self.order_date()
            .map(|date| format!("{}/{}", date.month(), date.day()))
            .unwrap_or_default()
    }

    /// The pick recorded on the first fulfilment, if any.
    pub fn recorded_pick(&self) -> Option<&Value> {
        self.fulfilments
            .first()
            .and_then(|fulfilment| fulfilment.get("Pick"))
            .filter(|pick| !pick.is_null())
    }
}

/// Locally owned workflow flags of a cached sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub entry_day: Option<String>,
    pub skipped: Option<Vec<Product>>,
    pub authorized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowState {
    Unentered,
    Entered,
    Authorized,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowState::Unentered => "unentered",
            WorkflowState::Entered => "entered",
            WorkflowState::Authorized => "authorized",
        })
    }
}

impl Workflow {
    pub fn state(&self) -> WorkflowState {
        if self.authorized_at.is_some() {
            WorkflowState::Authorized
        } else if self.entry_day.is_some() {
            WorkflowState::Entered
        } else {
            WorkflowState::Unentered
        }
    }
}

/// A cached sale: remote snapshot plus workflow flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub snapshot: SaleSnapshot,
    #[serde(default)]
    pub workflow: Workflow,
}

impl Sale {
    pub fn new(snapshot: SaleSnapshot) -> Self {
        Self {
            snapshot,
            workflow: Workflow::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.snapshot.id
    }

    pub fn is_entered(&self) -> bool {
        self.workflow.entry_day.is_some()
    }

    pub fn is_authorized(&self) -> bool {
        self.workflow.authorized_at.is_some()
    }

    pub fn workflow_state(&self) -> WorkflowState {
        self.workflow.state()
    }

    /// Line items that could not be placed on the sheet.
    pub fn unentered_items(&self) -> &[Product] {
        self.workflow.skipped.as_deref().unwrap_or_default()
    }

    /// Line items placed on the sheet (everything not skipped, by SKU).
    pub fn entered_items(&self) -> Vec<&Product> {
        let skipped: HashSet<&str> = self
            .unentered_items()
            .iter()
            .map(|product| product.sku.as_str())
            .collect();
        self.snapshot
            .items()
            .iter()
            .filter(|product| !skipped.contains(product.sku.as_str()))
            .collect()
    }
}

/// One row of the sale list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaleSummary {
    #[serde(rename = "SaleID", alias = "ID")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub customer: String,
    #[serde(default, deserialize_with = "nullable")]
    pub order_number: String,
    #[serde(default, deserialize_with = "nullable")]
    pub status: String,
}

/// Query parameters for the sale list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaleFilter {
    params: Vec<(String, String)>,
}

impl SaleFilter {
    /// Authorised sales that have not shipped.
    pub fn awaiting_fulfilment() -> Self {
        Self::default()
            .with("OrderStatus", "AUTHORISED")
            .with("CombinedShippingStatus", "NOT SHIPPED")
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

// ---------------------------------------------------------------------------
// API seam
// ---------------------------------------------------------------------------

/// Remote inventory operations.
#[allow(async_fn_in_trait)]
pub trait InventoryApi {
    async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<SaleSummary>, ApiError>;

    async fn fetch_sale(&self, id: &str) -> Result<SaleSnapshot, ApiError>;

    async fn pick(&self, body: &Value) -> Result<Value, ApiError>;

    async fn pack(&self, body: &Value) -> Result<Value, ApiError>;

    async fn ship(&self, body: &Value) -> Result<Value, ApiError>;

    /// IDs of every sale awaiting fulfilment, in API order.
    async fn list_awaiting_fulfilment_ids(&self) -> Result<Vec<String>, ApiError> {
        let sales = self.list_sales(&SaleFilter::awaiting_fulfilment()).await?;
        Ok(sales.into_iter().map(|sale| sale.id).collect())
    }
}

/// One decoded page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub total: usize,
    pub items: Vec<T>,
}

/// Fetch pages starting at 1 until `total` items are collected.
///
/// Stops early on an empty page so a shrinking list cannot loop forever.
pub async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut results = Vec::new();
    let mut page = 1;
    loop {
        let Page { total, items } = fetch_page(page).await?;
        let received = items.len();
        results.extend(items);
        debug!(page, received, collected = results.len(), total, "fetched page");

        if received == 0 || results.len() >= total {
            return Ok(results);
        }
        page += 1;
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Inventory account credentials, supplied ready-made.
pub struct InventoryCredentials {
    pub account_id: Zeroizing<String>,
    pub application_key: Zeroizing<String>,
}

pub struct DearClient {
    client: Client,
    base_url: String,
    credentials: InventoryCredentials,
    limiter: Arc<RateLimiter>,
    page_limit: u32,
}

impl DearClient {
    pub fn new(
        base_url: &str,
        credentials: InventoryCredentials,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        page_limit: u32,
    ) -> Result<Self, ApiError> {
        if credentials.account_id.trim().is_empty() {
            return Err(ApiError::MissingCredential("inventory account id"));
        }
        if credentials.application_key.trim().is_empty() {
            return Err(ApiError::MissingCredential("inventory application key"));
        }
        Ok(Self {
            client: build_client(SERVICE, timeout)?,
            base_url: api::normalize_base_url(base_url),
            credentials,
            limiter,
            page_limit: page_limit.max(1),
        })
    }

    /// Send one request through the rate limiter, retrying HTTP 429 with
    /// backoff.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.acquire().await?;

            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("api-auth-accountid", self.credentials.account_id.as_str())
                .header(
                    "api-auth-applicationkey",
                    self.credentials.application_key.as_str(),
                )
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &url, &e))?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_ATTEMPTS {
                    let delay = retry_delay(attempt);
                    warn!(
                        %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "inventory API rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            return read_json(SERVICE, resp).await;
        }

        Err(ApiError::RateLimited {
            service: SERVICE,
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn sale_list_page(
        &self,
        filter: &SaleFilter,
        page: u32,
    ) -> Result<Page<SaleSummary>, ApiError> {
        let mut query = filter.params().to_vec();
        query.push(("page".into(), page.to_string()));
        query.push(("limit".into(), self.page_limit.to_string()));

        let json = self.send(Method::GET, "saleList", &query, None).await?;
        decode_sale_list(json)
    }
}

fn decode_sale_list(json: Value) -> Result<Page<SaleSummary>, ApiError> {
    let total = json
        .get("Total")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;
    let items = match json.get("SaleList") {
        Some(list) if !list.is_null() => {
            serde_json::from_value(list.clone()).map_err(|e| ApiError::Decode {
                service: SERVICE,
                message: format!("sale list: {e}"),
            })?
        }
        _ => Vec::new(),
    };
    Ok(Page { total, items })
}

impl InventoryApi for DearClient {
    async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<SaleSummary>, ApiError> {
        let sales = collect_pages(|page| self.sale_list_page(filter, page)).await?;
        info!(count = sales.len(), "listed sales");
        Ok(sales)
    }

    async fn fetch_sale(&self, id: &str) -> Result<SaleSnapshot, ApiError> {
        let query = [("ID".to_string(), id.to_string())];
        let json = self.send(Method::GET, "sale", &query, None).await?;
        serde_json::from_value(json).map_err(|e| ApiError::Decode {
            service: SERVICE,
            message: format!("sale {id}: {e}"),
        })
    }

    async fn pick(&self, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, "sale/fulfilment/pick", &[], Some(body))
            .await
    }

    async fn pack(&self, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PUT, "sale/fulfilment/pack", &[], Some(body))
            .await
    }

    async fn ship(&self, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PUT, "sale/fulfilment/ship", &[], Some(body))
            .await
    }
}
