use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use tracing::info;

use super::{ok, parse_uuid, ApiJson, ApiQuery, ApiResult, AppState, AudienceManager};
use crate::subscribers::{self, BroadcastRequest, SubscriberView};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribers", get(list_subscribers))
        .route("/subscribers/{id}", delete(remove_subscriber))
        .route("/newsletter/broadcast", post(broadcast))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubscriberQuery {
    include_inactive: bool,
}

async fn list_subscribers(
    State(state): State<AppState>,
    _manager: AudienceManager,
    ApiQuery(query): ApiQuery<SubscriberQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = subscribers::list(&state.db, query.include_inactive).await?;
    Ok(ok(rows
        .into_iter()
        .map(SubscriberView::from)
        .collect::<Vec<_>>()))
}

async fn remove_subscriber(
    State(state): State<AppState>,
    _manager: AudienceManager,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subscriber = subscribers::unsubscribe(&state.db, parse_uuid(&id)?).await?;
    Ok(ok(SubscriberView::from(subscriber)))
}

async fn broadcast(
    State(state): State<AppState>,
    AudienceManager(user): AudienceManager,
    ApiJson(input): ApiJson<BroadcastRequest>,
) -> ApiResult<impl IntoResponse> {
    info!(user_id = %user.user_id, "newsletter broadcast requested");
    let report = subscribers::broadcast(
        &state.db,
        state.mailer.as_ref(),
        input,
        state.settings.broadcast_pause,
    )
    .await?;
    Ok(ok(report))
}
