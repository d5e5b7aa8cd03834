use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{created, ok, parse_uuid, ApiError, ApiJson, ApiQuery, ApiResult, AppState, CrmEditor};
use crate::activities::{self, ActivityView, NewActivity};
use crate::auth::CurrentUser;
use crate::deals::{self, DealFilter, DealPatch, DealStatus, DealView, NewDeal};
use crate::history::{self, DealTimeline};
use crate::lifecycle;
use crate::notes::{self, NewNote, NoteView};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/deals", get(list_deals).post(create_deal))
        .route(
            "/deals/{id}",
            get(get_deal).put(update_deal).delete(delete_deal),
        )
        .route(
            "/deals/{id}/activities",
            get(list_activities).post(create_activity),
        )
        .route("/deals/{id}/notes", get(list_notes).post(add_note))
        .route("/deals/{id}/history", get(deal_history))
        .route("/deals/{id}/status", post(change_status))
        .route("/deals/{id}/reopen", post(reopen_deal))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DealQuery {
    /// Comma-separated status names.
    status: Option<String>,
    q: Option<String>,
    include_archived: bool,
}

impl DealQuery {
    fn into_filter(self) -> ApiResult<DealFilter> {
        let statuses = match self.status.as_deref() {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    DealStatus::parse(part)
                        .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", part)))
                })
                .collect::<ApiResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(DealFilter {
            statuses,
            search: self.q,
            include_archived: self.include_archived,
        })
    }
}

async fn list_deals(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(query): ApiQuery<DealQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.into_filter()?;
    let rows = deals::list(&state.db, &filter).await?;
    Ok(ok(rows.into_iter().map(DealView::from).collect::<Vec<_>>()))
}

async fn create_deal(
    State(state): State<AppState>,
    _editor: CrmEditor,
    ApiJson(input): ApiJson<NewDeal>,
) -> ApiResult<impl IntoResponse> {
    let deal = deals::create(&state.db, input).await?;
    Ok(created(DealView::from(deal)))
}

async fn get_deal(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deal = deals::get(&state.db, parse_uuid(&id)?).await?;
    Ok(ok(DealView::from(deal)))
}

async fn update_deal(
    State(state): State<AppState>,
    _editor: CrmEditor,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<DealPatch>,
) -> ApiResult<impl IntoResponse> {
    let deal = deals::update(&state.db, parse_uuid(&id)?, patch).await?;
    Ok(ok(DealView::from(deal)))
}

async fn delete_deal(
    State(state): State<AppState>,
    _editor: CrmEditor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let removed = deals::delete(&state.db, parse_uuid(&id)?).await?;
    Ok(ok(removed))
}

async fn list_activities(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let rows = activities::list_for_deal(&state.db, parse_uuid(&id)?).await?;
    let today = Utc::now().date_naive();
    Ok(ok(rows
        .into_iter()
        .map(|row| ActivityView::new(row, today))
        .collect::<Vec<_>>()))
}

async fn create_activity(
    State(state): State<AppState>,
    _editor: CrmEditor,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NewActivity>,
) -> ApiResult<impl IntoResponse> {
    let activity = activities::create(&state.db, parse_uuid(&id)?, input).await?;
    Ok(created(ActivityView::new(activity, Utc::now().date_naive())))
}

async fn list_notes(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let rows = notes::list_for_deal(&state.db, parse_uuid(&id)?).await?;
    Ok(ok(rows.into_iter().map(NoteView::from).collect::<Vec<_>>()))
}

async fn add_note(
    State(state): State<AppState>,
    CrmEditor(user): CrmEditor,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NewNote>,
) -> ApiResult<impl IntoResponse> {
    let note = notes::add(&state.db, parse_uuid(&id)?, Some(user.user_id), &input.content).await?;
    Ok(created(NoteView::from(note)))
}

async fn deal_history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id)?;
    let deal = deals::get(&state.db, id).await?;
    let rows = history::list_for_deal(state.db.as_ref(), id).await?;
    Ok(ok(DealTimeline::new(&deal, rows)))
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: DealStatus,
    #[serde(default, alias = "reason")]
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReopenRequest {
    notes: Option<String>,
}

#[derive(Serialize)]
struct TransitionResult {
    deal: DealView,
    timeline: DealTimeline,
}

async fn transition_result(
    state: &AppState,
    deal: entity::deal::Model,
) -> ApiResult<TransitionResult> {
    let rows = history::list_for_deal(state.db.as_ref(), deal.id).await?;
    let timeline = DealTimeline::new(&deal, rows);
    Ok(TransitionResult {
        deal: DealView::from(deal),
        timeline,
    })
}

async fn change_status(
    State(state): State<AppState>,
    CrmEditor(user): CrmEditor,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<StatusChange>,
) -> ApiResult<impl IntoResponse> {
    let deal = lifecycle::change_status(
        &state.db,
        parse_uuid(&id)?,
        input.status,
        input.notes,
        Some(user.user_id),
    )
    .await?;
    Ok(ok(transition_result(&state, deal).await?))
}

async fn reopen_deal(
    State(state): State<AppState>,
    CrmEditor(user): CrmEditor,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let notes = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<ReopenRequest>(&body)
            .map_err(|err| ApiError::bad_request(format!("Invalid JSON body: {}", err)))?
            .notes
    };
    let deal = lifecycle::reopen(&state.db, parse_uuid(&id)?, notes, Some(user.user_id)).await?;
    Ok(ok(transition_result(&state, deal).await?))
}
