// src/rowstore.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::interval::IntervalValue;

pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_MAX_ROWS: usize = 20_000;
pub const DEFAULT_DIRECTORY_TTL_SECS: u64 = 300;

// --- Error type for the row store client ---
#[derive(Error, Debug)]
pub enum RowStoreError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Rate limit exceeded (Status 429)")]
    RateLimitExceeded,

    // Non-429 API errors
    #[error("Row store API error: Status={status}, Message='{message}'")]
    ApiError { status: StatusCode, message: String },
}

// Configuration for the row store client, loaded from STORE_* env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct RowStoreConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_directory_ttl_secs")]
    pub directory_ttl_secs: u64,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

fn default_directory_ttl_secs() -> u64 {
    DEFAULT_DIRECTORY_TTL_SECS
}

impl RowStoreConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("STORE_").from_env()
    }
}

// --- Wire types ---

/// One attendance entry for one employee on one calendar date, as the store
/// returns it. The six interval columns hold duration-shaped strings or bare
/// numbers; `name`/`sector`/`salary` are denormalized copies the store
/// sometimes includes alongside the event itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvertimeEventRow {
    #[serde(default)]
    pub id: Option<String>,
    pub registration: String,
    pub date: String,
    #[serde(default)]
    pub hrs303: Option<IntervalValue>,
    #[serde(default)]
    pub hrs304: Option<IntervalValue>,
    #[serde(default)]
    pub hrs505: Option<IntervalValue>,
    #[serde(default)]
    pub hrs506: Option<IntervalValue>,
    #[serde(default)]
    pub hrs511: Option<IntervalValue>,
    #[serde(default)]
    pub hrs512: Option<IntervalValue>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub salary: Option<f64>,
}

/// One employee directory entry, keyed by registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRow {
    pub registration: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub salary: Option<f64>,
}

// The store wraps every table listing in a `rows` envelope.
#[derive(Debug, Clone, Deserialize)]
struct RowPage<T> {
    rows: Vec<T>,
}

// Error body the store returns for non-success statuses.
#[derive(Debug, Clone, Deserialize)]
struct StoreErrorPayload {
    message: Option<String>,
}

/// Filter for one overtime query: an inclusive date range plus an optional
/// registration restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvertimeFilter {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub registration: Option<String>,
}

/// Seam over the hosted row store so retrieval logic can be exercised
/// against a scripted fake.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn overtime_page(
        &self,
        filter: &OvertimeFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<OvertimeEventRow>, RowStoreError>;

    async fn employee_page(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EmployeeRow>, RowStoreError>;
}

// --- Client implementation ---

#[derive(Clone)]
pub struct RowStoreClient {
    config: RowStoreConfig,
    http_client: Client,
}

impl RowStoreClient {
    pub fn new(config: RowStoreConfig) -> Result<Self, RowStoreError> {
        let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, RowStoreError> {
        let base = self.config.base_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{}/api/tables/{}", base, table))?)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
        context_msg: &str,
    ) -> Result<Vec<T>, RowStoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().extend_pairs(query.iter());
        let request_url = url.to_string();
        debug!("GET {} for '{}'", request_url, context_msg);

        let response = self
            .http_client
            .get(url)
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let page: RowPage<T> = response.json().await.map_err(|e| {
                error!(
                    "Failed to decode response for '{}' (URL: {}): {}",
                    context_msg, request_url, e
                );
                RowStoreError::Request(e)
            })?;
            Ok(page.rows)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(
                "Rate limit exceeded for '{}' (URL: {})",
                context_msg, request_url
            );
            Err(RowStoreError::RateLimitExceeded)
        } else {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            error!(
                "API Error Response: Status={}, Body='{}' for URL: {}",
                status, error_body, request_url
            );
            let message = match serde_json::from_str::<StoreErrorPayload>(&error_body) {
                Ok(parsed) => parsed.message.unwrap_or(error_body),
                Err(_) => error_body,
            };
            Err(RowStoreError::ApiError { status, message })
        }
    }
}

#[async_trait]
impl RowSource for RowStoreClient {
    async fn overtime_page(
        &self,
        filter: &OvertimeFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<OvertimeEventRow>, RowStoreError> {
        let mut query: Vec<(String, String)> = vec![
            ("date_gte".to_string(), filter.from.format("%Y-%m-%d").to_string()),
            ("date_lte".to_string(), filter.to.format("%Y-%m-%d").to_string()),
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), offset.to_string()),
        ];
        if let Some(registration) = &filter.registration {
            query.push(("registration".to_string(), registration.clone()));
        }
        self.get_rows("overtime_events", &query, "Get Overtime Events")
            .await
    }

    async fn employee_page(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EmployeeRow>, RowStoreError> {
        let query = vec![
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), offset.to_string()),
        ];
        self.get_rows("employees", &query, "Get Employees").await
    }
}
