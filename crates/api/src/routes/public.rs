//! Unauthenticated capture endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ok, ApiError, ApiJson, ApiResult, AppState, ClientIp};
use crate::contact::{self, ContactRequest};
use crate::mailer::{escape_html, send_in_background, OutgoingEmail};
use crate::subscribers::{self, SubscribeOutcome, SubscribeRequest};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/newsletter/subscribe", post(subscribe))
        .route("/newsletter/unsubscribe", post(unsubscribe))
        .route("/contact", post(submit_contact))
}

#[derive(Serialize)]
struct SubscribeResponse {
    id: uuid::Uuid,
    email: String,
    outcome: SubscribeOutcome,
}

async fn subscribe(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(input): ApiJson<SubscribeRequest>,
) -> ApiResult<impl IntoResponse> {
    if !state.subscribe_limiter.check(ip) {
        warn!(%ip, "subscribe rate limit exceeded");
        return Err(ApiError::too_many_requests());
    }
    let (subscriber, outcome) = subscribers::subscribe(&state.db, input).await?;
    if outcome != SubscribeOutcome::AlreadyActive {
        send_in_background(state.mailer.clone(), welcome_email(&subscriber));
    }
    let status = match outcome {
        SubscribeOutcome::Created => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    let body = SubscribeResponse {
        id: subscriber.id,
        email: subscriber.email,
        outcome,
    };
    Ok((status, ok(body)))
}

fn welcome_email(subscriber: &entity::subscriber::Model) -> OutgoingEmail {
    let greeting = match &subscriber.name {
        Some(name) => format!("Hola {},", escape_html(name)),
        None => "Hola,".to_string(),
    };
    OutgoingEmail {
        to: subscriber.email.clone(),
        subject: "Gracias por suscribirte".into(),
        html: format!(
            "<p>{}</p><p>Te enviaremos novedades sobre inteligencia artificial aplicada a tu negocio.</p>",
            greeting
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UnsubscribeRequest {
    email: String,
}

async fn unsubscribe(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<UnsubscribeRequest>,
) -> ApiResult<impl IntoResponse> {
    let subscriber = subscribers::unsubscribe_email(&state.db, &input.email).await?;
    Ok(ok(subscribers::SubscriberView::from(subscriber)))
}

async fn submit_contact(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<ContactRequest>,
) -> ApiResult<impl IntoResponse> {
    let receipt = contact::submit(
        &state.db,
        state.mailer.as_ref(),
        &state.settings.contact_inbox,
        input,
    )
    .await?;
    Ok(ok(receipt))
}
