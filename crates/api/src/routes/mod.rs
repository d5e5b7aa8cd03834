//! JSON HTTP surface over the CRM services.
//!
//! Every response uses the `{ "success": bool, "data" | "error" }` envelope.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::{current_user, decode_token, AuthConfig, CurrentUser};
use crate::error::CrmError;
use crate::mailer::SharedMailer;
use crate::rate_limit::SubscribeRateLimiter;

mod activities;
mod deals;
mod public;
mod subscribers;

#[derive(Clone, Debug)]
pub struct ApiSettings {
    pub contact_inbox: String,
    pub broadcast_pause: Duration,
    /// Key rate limits on `X-Forwarded-For`/`X-Real-IP`. Only safe behind a
    /// proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            contact_inbox: "contacto@localhost".into(),
            broadcast_pause: Duration::from_millis(600),
            trust_proxy_headers: false,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub auth: Arc<AuthConfig>,
    pub mailer: SharedMailer,
    pub settings: Arc<ApiSettings>,
    pub subscribe_limiter: SubscribeRateLimiter,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(deals::routes())
        .merge(activities::routes())
        .merge(subscribers::routes())
        .merge(public::routes());
    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Response {
    let db_ok = state.db.ping().await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    };
    (status, Json(body)).into_response()
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "route not found")
}

#[derive(Serialize)]
pub struct Envelope<T> {
    success: bool,
    data: T,
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

pub(crate) fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "insufficient permissions")
    }

    pub(crate) fn too_many_requests() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, please try again later",
        )
    }
}

impl From<CrmError> for ApiError {
    fn from(err: CrmError) -> Self {
        let status = match &err {
            CrmError::Validation(_) | CrmError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            CrmError::NotFound(_) => StatusCode::NOT_FOUND,
            CrmError::Conflict(_) => StatusCode::CONFLICT,
            CrmError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CrmError::Mail(_) => StatusCode::BAD_GATEWAY,
        };
        if err.is_dependency() {
            error!(code = err.code(), error = %err, "request failed on a dependency");
            let message = match err {
                CrmError::Mail(_) => "email delivery failed",
                _ => "internal server error",
            };
            return Self::new(status, message);
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// `Json` whose rejections use the error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` whose rejections use the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

pub(crate) fn parse_uuid(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("Invalid ID"))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Any authenticated staff member.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let claims = decode_token(token, &state.auth).map_err(|err| {
            warn!(error = %err, "rejected session token");
            ApiError::unauthorized("invalid or expired session")
        })?;
        current_user(&claims).ok_or_else(ApiError::forbidden)
    }
}

/// Staff allowed to modify deals, activities and notes.
pub struct CrmEditor(pub CurrentUser);

impl FromRequestParts<AppState> for CrmEditor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.can_manage_crm() {
            return Err(ApiError::forbidden());
        }
        Ok(Self(user))
    }
}

/// Staff allowed to manage subscribers and send newsletters.
pub struct AudienceManager(pub CurrentUser);

impl FromRequestParts<AppState> for AudienceManager {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.can_manage_subscribers() {
            return Err(ApiError::forbidden());
        }
        Ok(Self(user))
    }
}

/// Caller address: the socket peer, or the first forwarded hop when proxy
/// headers are trusted.
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(parts, state.settings.trust_proxy_headers)))
    }
}

fn client_ip(parts: &Parts, trust_proxy_headers: bool) -> IpAddr {
    let header_ip = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };
    let forwarded = if trust_proxy_headers {
        header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
    } else {
        None
    };
    forwarded
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
