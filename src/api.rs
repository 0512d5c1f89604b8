// 🌐 REST API with Axum
//
// JSON envelope `{success, data, error}`. Ledger errors map onto status
// codes: validation 400, not found 404, guard/in-use/suppressed 409,
// storage 500.

use crate::allocation::AllocationRecord;
use crate::entities::{CashAccount, NewAccount};
use crate::error::LedgerError;
use crate::ledger::{DeletedEntry, EntryQuery, Ledger, NewEntry};
use crate::reconciliation::{Outcome, SweepSummary};
use crate::stats::{AccountStats, ChartData};
use crate::db::LedgerEntry;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::error;

const ACTOR_HEADER: &str = "x-actor";
const DEFAULT_ACTOR: &str = "api";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Mutex<Ledger>>,
}

impl AppState {
    pub fn new(ledger: Ledger) -> Self {
        AppState {
            ledger: Arc::new(Mutex::new(ledger)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, ApiError> {
        self.ledger
            .lock()
            .map_err(|_| ApiError::Internal("ledger lock poisoned".to_string()))
    }
}

// ============================================================================
// Envelope & errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub kind: String,
    pub message: String,
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::DuplicateEntry { .. }
        | LedgerError::AccountInUse { .. }
        | LedgerError::SyncSuppressed { .. } => StatusCode::CONFLICT,
        LedgerError::Storage(_) | LedgerError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Ledger(err) => {
                let status = status_for(&err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %err, "request failed");
                }
                (status, err.kind().to_string(), err.to_string())
            }
            ApiError::Internal(message) => {
                error!(%message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error".to_string(), message)
            }
        };

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiErrorBody { kind, message }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

// ============================================================================
// Request shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub account_id: Option<String>,
    pub today: Option<NaiveDate>,
}

impl StatsParams {
    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoSplitRequest {
    /// Defaults to the entry amount
    pub total: Option<i64>,
    pub beneficiaries: Vec<String>,
    pub assistance_type: String,
    pub period: String,
    pub note: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/accounts
async fn list_accounts(State(state): State<AppState>) -> ApiResult<Vec<CashAccount>> {
    let ledger = state.lock()?;
    Ok(Json(ApiResponse::ok(ledger.accounts().list_active()?)))
}

/// POST /api/accounts
async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewAccount>,
) -> Result<(StatusCode, Json<ApiResponse<Outcome<CashAccount>>>), ApiError> {
    let ledger = state.lock()?;
    let outcome = ledger.accounts().create(new, &actor(&headers))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(outcome))))
}

/// POST /api/accounts/refresh - manual "refresh balances"
async fn refresh_balances(State(state): State<AppState>) -> ApiResult<SweepSummary> {
    let ledger = state.lock()?;
    Ok(Json(ApiResponse::ok(ledger.accounts().reconcile_all()?)))
}

/// POST /api/accounts/:id/default
async fn set_default_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<CashAccount> {
    let ledger = state.lock()?;
    Ok(Json(ApiResponse::ok(ledger.accounts().set_default(&id, &actor(&headers))?)))
}

/// POST /api/accounts/:id/close
async fn close_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<CashAccount> {
    let ledger = state.lock()?;
    Ok(Json(ApiResponse::ok(ledger.accounts().close(&id, &actor(&headers))?)))
}

/// GET /api/entries
async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntryQuery>,
) -> ApiResult<Vec<LedgerEntry>> {
    let ledger = state.lock()?;
    Ok(Json(ApiResponse::ok(ledger.store().list(&query)?)))
}

/// POST /api/entries
async fn create_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut new): Json<NewEntry>,
) -> Result<(StatusCode, Json<ApiResponse<Outcome<LedgerEntry>>>), ApiError> {
    if new.actor.is_none() {
        new.actor = headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let ledger = state.lock()?;
    let outcome = ledger.store().insert(new)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(outcome))))
}

/// DELETE /api/entries/:id
async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Outcome<DeletedEntry>> {
    let ledger = state.lock()?;
    Ok(Json(ApiResponse::ok(ledger.store().delete(&id, &actor(&headers))?)))
}

/// GET /api/stats
async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<AccountStats> {
    let ledger = state.lock()?;
    let stats = ledger
        .stats()
        .account_stats(params.account_id.as_deref(), params.today())?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// GET /api/charts
async fn get_charts(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<ChartData> {
    let ledger = state.lock()?;
    let chart = ledger
        .stats()
        .chart_data(params.account_id.as_deref(), params.today())?;
    Ok(Json(ApiResponse::ok(chart)))
}

/// GET /api/entries/:id/allocations
async fn list_allocations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<AllocationRecord>> {
    let ledger = state.lock()?;
    ledger.store().get(&id)?;
    Ok(Json(ApiResponse::ok(ledger.allocations().for_entry(&id)?)))
}

/// POST /api/entries/:id/allocations/auto-split
async fn auto_split(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AutoSplitRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<AllocationRecord>>>), ApiError> {
    let ledger = state.lock()?;
    let total = match request.total {
        Some(total) => total,
        None => ledger.store().get(&id)?.amount,
    };

    let records = ledger.allocations().auto_split(
        &id,
        total,
        &request.beneficiaries,
        &request.assistance_type,
        &request.period,
        request.note.as_deref(),
        &actor(&headers),
    )?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(records))))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts", get(list_accounts).post(create_account))
        .route("/accounts/refresh", post(refresh_balances))
        .route("/accounts/:id/default", post(set_default_account))
        .route("/accounts/:id/close", post(close_account))
        .route("/entries", get(list_entries).post(create_entry))
        .route("/entries/:id", axum::routing::delete(delete_entry))
        .route("/entries/:id/allocations", get(list_allocations))
        .route("/entries/:id/allocations/auto-split", post(auto_split))
        .route("/stats", get(get_stats))
        .route("/charts", get(get_charts))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn create_test_app() -> Router {
        let ledger = Ledger::open_in_memory(LedgerConfig::default()).unwrap();
        router(AppState::new(ledger))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header(ACTOR_HEADER, "tester")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&LedgerError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&LedgerError::not_found("entry", "x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&LedgerError::AccountInUse {
                account_id: "a".into(),
                entry_count: 1
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&LedgerError::Storage(rusqlite::Error::InvalidQuery)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_test_app();
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"], json!("OK"));
    }

    #[tokio::test]
    async fn test_entry_flow_with_duplicate() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/api/accounts",
            Some(json!({ "name": "Kas Utama", "code": "KAS", "account_type": "cash" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let account_id = body["data"]["value"]["id"].as_str().unwrap().to_string();

        let entry = json!({
            "direction": "Income",
            "category": "Donasi",
            "amount": 500000,
            "date": "2025-05-01",
            "account_id": account_id,
            "reference": "donation:abc-123"
        });

        let (status, body) = send(&app, "POST", "/api/entries", Some(entry.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["value"]["auto_posted"], json!(true));
        assert_eq!(body["data"]["value"]["status"], json!("posted"));

        let (status, body) = send(&app, "POST", "/api/entries", Some(entry)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["kind"], json!("duplicate_entry"));

        let (status, body) = send(&app, "GET", "/api/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["current_balance"], json!(500000));

        let (status, _) = send(&app, "POST", &format!("/api/accounts/{}/close", account_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "GET", "/api/entries?status=posted&from=2025-05-01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_and_not_found() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/api/entries",
            Some(json!({ "direction": "Expense", "category": "Listrik", "amount": 0, "date": "2025-05-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], json!("validation_error"));

        let (status, _) = send(&app, "DELETE", "/api/entries/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auto_split_route() {
        let app = create_test_app();

        let (_, body) = send(
            &app,
            "POST",
            "/api/entries",
            Some(json!({ "direction": "Expense", "category": "Konsumsi", "amount": 900000, "date": "2025-05-01" })),
        )
        .await;
        let entry_id = body["data"]["value"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/entries/{}/allocations/auto-split", entry_id),
            Some(json!({ "beneficiaries": ["s1", "s2", "s3"], "assistance_type": "Makan", "period": "2025-05" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
        assert_eq!(body["data"][0]["allocated_amount"], json!(300000));

        let (status, body) = send(&app, "GET", &format!("/api/entries/{}/allocations", entry_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stats_and_charts() {
        let app = create_test_app();
        send(
            &app,
            "POST",
            "/api/entries",
            Some(json!({ "direction": "Income", "category": "SPP", "amount": 100, "date": "2025-05-02" })),
        )
        .await;

        let (status, body) = send(&app, "GET", "/api/stats?today=2025-05-20", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["income_this_month"], json!(100));
        assert_eq!(body["data"]["income_trend"]["kind"], json!("no_baseline"));

        let (status, body) = send(&app, "GET", "/api/charts?today=2025-05-20", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["monthly"].as_array().unwrap().len(), 7);
    }
}
