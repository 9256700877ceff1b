// src/server.rs

use axum::http::{header, StatusCode};
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::interval::format_minutes;
use crate::overtime::{
    compute_overtime_view, valuate, BucketedRecord, EmployeeContext, OvertimeView,
    PeriodAggregate, ValuationRates, ViewMode, ViewOptions,
};
use crate::retrieval::{FetchError, OvertimeQueryService};
use crate::rowstore::{OvertimeFilter, RowStoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Fetch failed")]
    Fetch(#[from] FetchError),
    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Error occurred: {:?}", self);
        let (status_code, error_message) = match &self {
            AppError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server file I/O error.".to_string(),
            ),
            AppError::TlsConfig(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server TLS configuration error.".to_string(),
            ),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Csv(e) => {
                error!("CSV encoding failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to encode CSV export.".to_string(),
                )
            }
            AppError::Fetch(fetch_err) => match fetch_err {
                FetchError::Superseded => (
                    StatusCode::CONFLICT,
                    "Request superseded by a newer query.".to_string(),
                ),
                FetchError::Store(RowStoreError::RateLimitExceeded) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Row store rate limit exceeded. Please try again later.".to_string(),
                ),
                FetchError::Store(RowStoreError::ApiError { status, message }) => {
                    error!("Row store API Error: Status={}, Msg={}", status, message);
                    let axum_status = StatusCode::from_u16(status.as_u16())
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    (
                        axum_status,
                        "An error occurred while querying the row store.".to_string(),
                    )
                }
                FetchError::Store(RowStoreError::Request(e)) => {
                    error!("Network request error to row store: {}", e);
                    (
                        StatusCode::BAD_GATEWAY,
                        "Failed to connect to the row store.".to_string(),
                    )
                }
                FetchError::Store(RowStoreError::UrlParse(e)) => {
                    error!("URL parsing error for row store: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error (row store URL config).".to_string(),
                    )
                }
            },
        };
        (
            status_code,
            Json(serde_json::json!({ "error": error_message })),
        )
            .into_response()
    }
}

struct CachedDirectory {
    fetched_at: Instant,
    directory: Arc<HashMap<String, EmployeeContext>>,
}

#[derive(Clone)]
pub struct AppState {
    pub query_service: Arc<OvertimeQueryService>,
    pub rates: ValuationRates,
    directory_cache: Arc<Mutex<Option<CachedDirectory>>>,
    directory_ttl: Duration,
}

impl AppState {
    pub fn new(
        query_service: Arc<OvertimeQueryService>,
        rates: ValuationRates,
        directory_ttl: Duration,
    ) -> Self {
        Self {
            query_service,
            rates,
            directory_cache: Arc::new(Mutex::new(None)),
            directory_ttl,
        }
    }

    /// The employee directory changes slowly, so it is cached in-process
    /// with a TTL. Overtime rows are never cached.
    async fn employee_directory(
        &self,
        epoch: u64,
    ) -> Result<Arc<HashMap<String, EmployeeContext>>, AppError> {
        let mut guard = self.directory_cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.directory_ttl {
                return Ok(cached.directory.clone());
            }
        }
        let directory = Arc::new(self.query_service.fetch_employee_directory(epoch).await?);
        *guard = Some(CachedDirectory {
            fetched_at: Instant::now(),
            directory: directory.clone(),
        });
        Ok(directory)
    }
}

pub fn build_router(state: AppState) -> Router {
    let overtime_routes = Router::new()
        .route("/overtime", get(handle_overtime))
        .route("/overtime/export.csv", get(handle_overtime_csv));
    Router::new()
        .nest("/api", overtime_routes)
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct OvertimeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub registration: Option<String>,
    #[serde(default)]
    pub mode: Option<ViewMode>,
    #[serde(default)]
    pub allow_negative60: Option<bool>,
}

#[derive(Debug, Serialize)]
struct DailyRowBody {
    id: Option<String>,
    registration: String,
    name: Option<String>,
    sector: Option<String>,
    company: Option<String>,
    date: NaiveDate,
    plus60_minutes: i64,
    minus60_minutes: i64,
    plus100_minutes: i64,
    hours60_minutes: i64,
    hours100_minutes: i64,
    hours60: String,
    hours100: String,
    value60: Decimal,
    value100: Decimal,
}

#[derive(Debug, Serialize)]
struct PeriodRowBody {
    registration: String,
    name: Option<String>,
    sector: Option<String>,
    company: Option<String>,
    salary: Decimal,
    range: String,
    min_date: NaiveDate,
    max_date: NaiveDate,
    plus60_minutes: i64,
    minus60_minutes: i64,
    plus100_minutes: i64,
    hours60_minutes: i64,
    hours100_minutes: i64,
    hours60: String,
    hours100: String,
    value60: Decimal,
    value100: Decimal,
}

#[derive(Debug, Serialize)]
struct TotalsBody {
    hours60_minutes: i64,
    hours100_minutes: i64,
    hours60: String,
    hours100: String,
    value60: Decimal,
    value100: Decimal,
}

#[derive(Debug, Serialize)]
struct OvertimeResponse {
    mode: ViewMode,
    daily: Vec<DailyRowBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grouped: Option<Vec<PeriodRowBody>>,
    totals: TotalsBody,
}

async fn handle_overtime(
    State(state): State<AppState>,
    Query(params): Query<OvertimeQuery>,
) -> Result<Json<OvertimeResponse>, AppError> {
    let (view, options) = run_view(&state, &params).await?;
    Ok(Json(build_response(&view, &options, &state.rates)))
}

async fn handle_overtime_csv(
    State(state): State<AppState>,
    Query(params): Query<OvertimeQuery>,
) -> Result<Response, AppError> {
    let (view, options) = run_view(&state, &params).await?;
    let body = render_csv(&view, &options, &state.rates)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"overtime.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

async fn handle_status() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "time": chrono::Local::now().to_rfc3339(),
    }))
}

async fn run_view(
    state: &AppState,
    params: &OvertimeQuery,
) -> Result<(OvertimeView, ViewOptions), AppError> {
    if params.from > params.to {
        return Err(AppError::BadRequest(format!(
            "'from' date {} is after 'to' date {}",
            params.from, params.to
        )));
    }
    let options = ViewOptions {
        mode: params.mode.unwrap_or(ViewMode::Daily),
        allow_negative60: params.allow_negative60.unwrap_or(false),
    };
    let filter = OvertimeFilter {
        from: params.from,
        to: params.to,
        registration: params.registration.clone(),
    };

    let epoch = state.query_service.begin();
    let directory = state.employee_directory(epoch).await?;
    let rows = state.query_service.fetch_overtime_rows(&filter, epoch).await?;
    let view = compute_overtime_view(rows, &directory, &options, &state.rates);
    Ok((view, options))
}

fn daily_body(
    record: &BucketedRecord,
    allow_negative60: bool,
    rates: &ValuationRates,
) -> DailyRowBody {
    let valuation = valuate(
        record.hours60_minutes,
        record.hours100_minutes,
        record.salary,
        allow_negative60,
        rates,
    );
    DailyRowBody {
        id: record.id.clone(),
        registration: record.registration.clone(),
        name: record.name.clone(),
        sector: record.sector.clone(),
        company: record.company.clone(),
        date: record.date,
        plus60_minutes: record.plus60_minutes,
        minus60_minutes: record.minus60_minutes,
        plus100_minutes: record.plus100_minutes,
        hours60_minutes: record.hours60_minutes,
        hours100_minutes: record.hours100_minutes,
        hours60: format_minutes(record.hours60_minutes),
        hours100: format_minutes(record.hours100_minutes),
        value60: valuation.value60,
        value100: valuation.value100,
    }
}

fn period_body(
    aggregate: &PeriodAggregate,
    allow_negative60: bool,
    rates: &ValuationRates,
) -> PeriodRowBody {
    let valuation = valuate(
        aggregate.hours60_minutes,
        aggregate.hours100_minutes,
        aggregate.salary,
        allow_negative60,
        rates,
    );
    PeriodRowBody {
        registration: aggregate.registration.clone(),
        name: aggregate.name.clone(),
        sector: aggregate.sector.clone(),
        company: aggregate.company.clone(),
        salary: aggregate.salary,
        range: aggregate.range_label(),
        min_date: aggregate.min_date,
        max_date: aggregate.max_date,
        plus60_minutes: aggregate.plus60_minutes,
        minus60_minutes: aggregate.minus60_minutes,
        plus100_minutes: aggregate.plus100_minutes,
        hours60_minutes: aggregate.hours60_minutes,
        hours100_minutes: aggregate.hours100_minutes,
        hours60: format_minutes(aggregate.hours60_minutes),
        hours100: format_minutes(aggregate.hours100_minutes),
        value60: valuation.value60,
        value100: valuation.value100,
    }
}

fn build_response(
    view: &OvertimeView,
    options: &ViewOptions,
    rates: &ValuationRates,
) -> OvertimeResponse {
    OvertimeResponse {
        mode: options.mode,
        daily: view
            .daily
            .iter()
            .map(|r| daily_body(r, options.allow_negative60, rates))
            .collect(),
        grouped: view.grouped.as_ref().map(|aggregates| {
            aggregates
                .iter()
                .map(|a| period_body(a, options.allow_negative60, rates))
                .collect()
        }),
        totals: TotalsBody {
            hours60_minutes: view.totals.hours60_minutes,
            hours100_minutes: view.totals.hours100_minutes,
            hours60: format_minutes(view.totals.hours60_minutes),
            hours100: format_minutes(view.totals.hours100_minutes),
            value60: view.totals.value60,
            value100: view.totals.value100,
        },
    }
}

/// One CSV line per visible row for the requested mode: period aggregates
/// when grouped, daily rows otherwise.
fn render_csv(
    view: &OvertimeView,
    options: &ViewOptions,
    rates: &ValuationRates,
) -> Result<String, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    if let Some(aggregates) = &view.grouped {
        writer.write_record([
            "registration",
            "name",
            "sector",
            "range",
            "hours60",
            "hours100",
            "value60",
            "value100",
        ])?;
        for aggregate in aggregates {
            let body = period_body(aggregate, options.allow_negative60, rates);
            writer.write_record([
                body.registration.as_str(),
                body.name.as_deref().unwrap_or(""),
                body.sector.as_deref().unwrap_or(""),
                body.range.as_str(),
                body.hours60.as_str(),
                body.hours100.as_str(),
                &body.value60.to_string(),
                &body.value100.to_string(),
            ])?;
        }
    } else {
        writer.write_record([
            "registration",
            "name",
            "sector",
            "date",
            "hours60",
            "hours100",
            "value60",
            "value100",
        ])?;
        for record in &view.daily {
            let body = daily_body(record, options.allow_negative60, rates);
            writer.write_record([
                body.registration.as_str(),
                body.name.as_deref().unwrap_or(""),
                body.sector.as_deref().unwrap_or(""),
                &body.date.format("%Y-%m-%d").to_string(),
                body.hours60.as_str(),
                body.hours100.as_str(),
                &body.value60.to_string(),
                &body.value100.to_string(),
            ])?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
