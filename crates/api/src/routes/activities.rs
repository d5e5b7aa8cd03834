use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use chrono::Utc;

use super::{ok, parse_uuid, ApiResult, AppState, CrmEditor};
use crate::activities::{self, ActivityView};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/activities/{id}/complete", post(complete_activity))
        .route("/activities/{id}/cancel", post(cancel_activity))
}

async fn complete_activity(
    State(state): State<AppState>,
    _editor: CrmEditor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let activity = activities::complete(&state.db, parse_uuid(&id)?).await?;
    Ok(ok(ActivityView::new(activity, Utc::now().date_naive())))
}

async fn cancel_activity(
    State(state): State<AppState>,
    _editor: CrmEditor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let activity = activities::cancel(&state.db, parse_uuid(&id)?).await?;
    Ok(ok(ActivityView::new(activity, Utc::now().date_naive())))
}
