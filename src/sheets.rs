//! Google Sheets v4 values API: the [`SheetsApi`] seam and its reqwest
//! implementation.
//!
//! Only the two value calls the sync engine needs are exposed: read a range
//! and overwrite one row. Writes use `valueInputOption=RAW` so quantities and
//! invoice codes land as typed.

use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::api::{self, build_client, read_json, retry_delay, transport_error};
use crate::error::ApiError;

const SERVICE: &str = "Google Sheets";

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Attempts per request when the API answers HTTP 429.
const MAX_ATTEMPTS: u32 = 3;

/// Orientation of a values payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MajorDimension {
    Rows,
    Columns,
}

impl MajorDimension {
    pub fn as_str(self) -> &'static str {
        match self {
            MajorDimension::Rows => "ROWS",
            MajorDimension::Columns => "COLUMNS",
        }
    }
}

/// Spreadsheet value operations.
///
/// Reads return the grid as the service does: trailing blank cells and
/// blank rows/columns are omitted, and an empty range yields no vectors.
#[allow(async_fn_in_trait)]
pub trait SheetsApi {
    async fn get_values(
        &self,
        range: &str,
        dimension: MajorDimension,
    ) -> Result<Vec<Vec<String>>, ApiError>;

    /// Overwrite one row starting at the range's first cell.
    async fn update_values(&self, range: &str, row: &[String]) -> Result<(), ApiError>;
}

pub struct GoogleSheetsClient {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: Zeroizing<String>,
}

impl GoogleSheetsClient {
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        access_token: Zeroizing<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        if access_token.trim().is_empty() {
            return Err(ApiError::MissingCredential("sheets access token"));
        }
        Ok(Self {
            client: build_client(SERVICE, timeout)?,
            base_url: api::normalize_base_url(base_url),
            spreadsheet_id: spreadsheet_id.to_string(),
            access_token,
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    async fn send(
        &self,
        method: Method,
        route: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = values_url(&self.base_url, &self.spreadsheet_id, route)?;

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(self.access_token.as_str())
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, url.as_str(), &e))?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_ATTEMPTS {
                    let delay = retry_delay(attempt);
                    warn!(
                        route,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "sheets API rate limited, retrying"
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
}

/// `{base}/{spreadsheet}/values/{route}` with the route as one encoded path
/// segment (ranges contain `!` and `:`).
fn values_url(base_url: &str, spreadsheet_id: &str, route: &str) -> Result<Url, ApiError> {
    let invalid = || ApiError::Request {
        service: SERVICE,
        message: format!("Invalid URL: {base_url}"),
    };
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .push(spreadsheet_id)
        .push("values")
        .push(route);
    Ok(url)
}

/// Stringify a values grid. Non-string cells (numbers, booleans) keep their
/// JSON text form.
fn decode_values(json: &Value) -> Vec<Vec<String>> {
    json.get("values")
        .and_then(Value::as_array)
        .map(|vectors| {
            vectors
                .iter()
                .map(|vector| {
                    vector
                        .as_array()
                        .map(|cells| cells.iter().map(cell_text).collect::<Vec<_>>())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SheetsApi for GoogleSheetsClient {
    async fn get_values(
        &self,
        range: &str,
        dimension: MajorDimension,
    ) -> Result<Vec<Vec<String>>, ApiError> {
        let json = self
            .send(
                Method::GET,
                range,
                &[("majorDimension", dimension.as_str())],
                None,
            )
            .await?;
        let values = decode_values(&json);
        debug!(range, vectors = values.len(), "read sheet values");
        Ok(values)
    }

    async fn update_values(&self, range: &str, row: &[String]) -> Result<(), ApiError> {
        let body = json!({
            "range": range,
            "majorDimension": MajorDimension::Rows,
            "values": [row],
        });
        self.send(
            Method::PUT,
            range,
            &[("valueInputOption", "RAW")],
            Some(&body),
        )
        .await?;
        debug!(range, "updated sheet row");
        Ok(())
    }
}
