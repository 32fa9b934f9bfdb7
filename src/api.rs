//! HTTP boundary. JSON in and out, timestamps as unix milliseconds.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{
    FromRequest, FromRequestParts, MatchedPath, OptionalFromRequest, Path, Query, State,
};
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use ulid::Ulid;

use crate::engine::{now_ms, Allocation, EngineError, ResourcePool};
use crate::model::*;
use crate::observability;
use crate::scheduler::{BookingOutcome, BookingRequest, Scheduler};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A calendar query whose year or month is not a number.
    #[error("invalid calendar month: {0}")]
    InvalidMonth(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Engine(e) => match e {
                EngineError::InvalidInterval { .. } => (StatusCode::BAD_REQUEST, "INVALID_INTERVAL"),
                EngineError::InvalidMonth { .. } => (StatusCode::BAD_REQUEST, "INVALID_MONTH"),
                EngineError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, "LIMIT_EXCEEDED"),
                EngineError::CategoryNotFound(_) => (StatusCode::NOT_FOUND, "CATEGORY_NOT_FOUND"),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                EngineError::ProfileNotFound(_) => (StatusCode::NOT_FOUND, "PROFILE_NOT_FOUND"),
                EngineError::AlreadyExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
                EngineError::WriteConflict(_) => (StatusCode::CONFLICT, "WRITE_CONFLICT"),
                EngineError::DependencyUnavailable(msg) => {
                    tracing::error!(error = %msg, "backing store unavailable");
                    (StatusCode::SERVICE_UNAVAILABLE, "DEPENDENCY_UNAVAILABLE")
                }
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::InvalidMonth(_) => (StatusCode::BAD_REQUEST, "INVALID_MONTH"),
        };
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

// ── Extractors ───────────────────────────────────────────

/// `Json<T>` that reports malformed bodies as a JSON `BAD_REQUEST`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = <Json<T> as FromRequest<S>>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// No body (no content type) is `None`; a body that does not parse is still an error.
impl<S, T> OptionalFromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let json = <Json<T> as OptionalFromRequest<S>>::from_request(req, state).await?;
        Ok(json.map(|Json(value)| ApiJson(value)))
    }
}

/// `Query<T>` that reports malformed query strings as a JSON `BAD_REQUEST`.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) =
            <Query<T> as FromRequestParts<S>>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

fn parse_id(raw: &str) -> ApiResult<Ulid> {
    Ulid::from_string(raw).map_err(|_| ApiError::BadRequest(format!("invalid id: {raw:?}")))
}

fn no_availability() -> Response {
    (StatusCode::CONFLICT, Json(json!({ "available": false }))).into_response()
}

// ── Bodies ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AllocationBody {
    pub category: String,
    pub start: Ms,
    pub end: Ms,
    #[serde(default)]
    pub requester_id: Option<String>,
    #[serde(default)]
    pub pickup: bool,
}

#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub unit_id: Ulid,
    pub reservation: Reservation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<Eligibility>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeBody {
    pub category: String,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Deserialize)]
pub struct NewCategory {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewUnit {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Kept as text so a non-numeric month reads as an invalid month.
#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: String,
    pub month: String,
}

impl MonthQuery {
    fn parse(&self) -> ApiResult<(i32, u32)> {
        let year = self.year.trim().parse();
        let month = self.month.trim().parse();
        match (year, month) {
            (Ok(year), Ok(month)) => Ok((year, month)),
            _ => Err(ApiError::InvalidMonth(format!("{}-{}", self.year, self.month))),
        }
    }
}

// ── Router ───────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/allocations", post(create_allocation))
        .route("/allocations/probe", post(probe_allocation))
        .route(
            "/reservations/{id}",
            get(get_reservation).delete(cancel_reservation),
        )
        .route("/categories", get(list_categories).post(register_category))
        .route(
            "/categories/{category}/units",
            get(list_units).post(add_unit),
        )
        .route("/categories/{category}/availability", get(month_availability))
        .route("/units/{id}/retire", post(retire_unit))
        .route("/requesters/{id}/profile", put(record_profile))
        .route("/requesters/{id}/eligibility", get(eligibility))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Request count and latency per matched route.
async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();

    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
    response
}

// ── Handlers ─────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_allocation(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AllocationBody>,
) -> ApiResult<Response> {
    let request = BookingRequest {
        category: Category::new(&body.category)?,
        start: body.start,
        end: body.end,
        requester_id: body.requester_id,
        pickup: body.pickup,
    };
    let outcome = state.scheduler.book(request, now_ms()).await?;
    Ok(match outcome {
        BookingOutcome::Confirmed {
            reservation,
            eligibility,
        } => Json(AllocationResponse {
            unit_id: reservation.unit_id,
            reservation,
            eligibility,
        })
        .into_response(),
        BookingOutcome::NoAvailability => no_availability(),
        BookingOutcome::PickupDenied { eligibility } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "pickup requires a verified requester with a previous booking",
                "code": "PICKUP_DENIED",
                "eligibility": eligibility,
            })),
        )
            .into_response(),
    })
}

async fn probe_allocation(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ProbeBody>,
) -> ApiResult<Response> {
    let category = Category::new(&body.category)?;
    let decision = state
        .scheduler
        .probe(category, body.start, body.end, now_ms())
        .await?;
    Ok(match decision {
        Allocation::Unit(unit_id) => Json(json!({ "unit_id": unit_id })).into_response(),
        Allocation::NoAvailability => no_availability(),
    })
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Reservation>> {
    let id = parse_id(&id)?;
    Ok(Json(state.scheduler.engine().get_reservation(id).await?))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Reservation>> {
    let id = parse_id(&id)?;
    Ok(Json(state.scheduler.engine().cancel_reservation(id).await?))
}

async fn list_categories(State(state): State<AppState>) -> Json<Vec<Category>> {
    Json(state.scheduler.engine().list_categories())
}

async fn register_category(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewCategory>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let category = Category::new(&body.name)?;
    state
        .scheduler
        .engine()
        .register_category(category.clone())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "category": category }))))
}

async fn list_units(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<Json<Vec<Unit>>> {
    let category = Category::new(&category)?;
    Ok(Json(
        state
            .scheduler
            .engine()
            .list_active_units(&category)
            .await?,
    ))
}

async fn add_unit(
    State(state): State<AppState>,
    Path(category): Path<String>,
    body: Option<ApiJson<NewUnit>>,
) -> ApiResult<(StatusCode, Json<Unit>)> {
    let category = Category::new(&category)?;
    let body = body.map(|ApiJson(b)| b).unwrap_or_default();
    let id = match body.id.as_deref() {
        Some(raw) => parse_id(raw)?,
        None => Ulid::new(),
    };
    let unit = state
        .scheduler
        .engine()
        .add_unit(id, category, body.label)
        .await?;
    Ok((StatusCode::CREATED, Json(unit)))
}

async fn retire_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Unit>> {
    let id = parse_id(&id)?;
    Ok(Json(state.scheduler.engine().retire_unit(id).await?))
}

async fn month_availability(
    State(state): State<AppState>,
    Path(category): Path<String>,
    ApiQuery(query): ApiQuery<MonthQuery>,
) -> ApiResult<Json<Vec<DayAvailability>>> {
    let category = Category::new(&category)?;
    let (year, month) = query.parse()?;
    let days = state
        .scheduler
        .month_availability(&category, year, month)
        .await?;
    Ok(Json(days))
}

async fn record_profile(
    State(state): State<AppState>,
    Path(requester_id): Path<String>,
    ApiJson(profile): ApiJson<RequesterProfile>,
) -> ApiResult<StatusCode> {
    state
        .scheduler
        .engine()
        .record_profile(&requester_id, profile)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn eligibility(
    State(state): State<AppState>,
    Path(requester_id): Path<String>,
) -> ApiResult<Json<Eligibility>> {
    Ok(Json(state.scheduler.eligibility(&requester_id).await?))
}
