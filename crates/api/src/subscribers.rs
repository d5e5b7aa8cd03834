//! Newsletter subscribers and sequential broadcast.

use std::time::Duration;

use chrono::{DateTime, Utc};
use entity::subscriber;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{normalize_email, optional_text, required_text, CrmError, CrmResult};
use crate::mailer::{Mailer, OutgoingEmail};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubscribeRequest {
    pub email: String,
    pub name: Option<String>,
    pub source: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    Created,
    Reactivated,
    AlreadyActive,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubscriberView {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub source: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl From<subscriber::Model> for SubscriberView {
    fn from(model: subscriber::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            name: model.name,
            source: model.source,
            active: model.active,
            created_at: model.created_at.into(),
            unsubscribed_at: model.unsubscribed_at.map(Into::into),
        }
    }
}

#[instrument(name = "crm.subscribers.subscribe", skip_all)]
pub async fn subscribe(
    db: &DatabaseConnection,
    request: SubscribeRequest,
) -> CrmResult<(subscriber::Model, SubscribeOutcome)> {
    let email = normalize_email(&request.email)?;
    let name = optional_text("name", request.name, 256)?;
    let source = optional_text("source", request.source, 64)?;

    if let Some(existing) = find_by_email(db, &email).await? {
        if existing.active {
            return Ok((existing, SubscribeOutcome::AlreadyActive));
        }
        let mut active: subscriber::ActiveModel = existing.into();
        active.active = Set(true);
        active.unsubscribed_at = Set(None);
        if name.is_some() {
            active.name = Set(name);
        }
        let model = active.update(db).await?;
        info!(subscriber_id = %model.id, "subscriber reactivated");
        return Ok((model, SubscribeOutcome::Reactivated));
    }

    let model = subscriber::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        name: Set(name),
        source: Set(source),
        active: Set(true),
        created_at: Set(Utc::now().into()),
        unsubscribed_at: Set(None),
    }
    .insert(db)
    .await?;
    info!(subscriber_id = %model.id, "subscriber created");
    Ok((model, SubscribeOutcome::Created))
}

pub async fn list(
    db: &DatabaseConnection,
    include_inactive: bool,
) -> CrmResult<Vec<subscriber::Model>> {
    let mut query = subscriber::Entity::find();
    if !include_inactive {
        query = query.filter(subscriber::Column::Active.eq(true));
    }
    let rows = query
        .order_by_desc(subscriber::Column::CreatedAt)
        .order_by_asc(subscriber::Column::Email)
        .all(db)
        .await?;
    Ok(rows)
}

pub async fn unsubscribe(db: &DatabaseConnection, id: Uuid) -> CrmResult<subscriber::Model> {
    let existing = subscriber::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("Subscriber"))?;
    deactivate(db, existing).await
}

pub async fn unsubscribe_email(
    db: &DatabaseConnection,
    email: &str,
) -> CrmResult<subscriber::Model> {
    let email = normalize_email(email)?;
    let existing = find_by_email(db, &email)
        .await?
        .ok_or(CrmError::NotFound("Subscriber"))?;
    deactivate(db, existing).await
}

async fn deactivate(
    db: &DatabaseConnection,
    existing: subscriber::Model,
) -> CrmResult<subscriber::Model> {
    if !existing.active {
        return Ok(existing);
    }
    let mut active: subscriber::ActiveModel = existing.into();
    active.active = Set(false);
    active.unsubscribed_at = Set(Some(Utc::now().into()));
    Ok(active.update(db).await?)
}

async fn find_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> CrmResult<Option<subscriber::Model>> {
    Ok(subscriber::Entity::find()
        .filter(subscriber::Column::Email.eq(email))
        .one(db)
        .await?)
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BroadcastRequest {
    pub subject: String,
    pub html: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BroadcastFailure {
    pub email: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub total: usize,
    pub sent: usize,
    pub failed: Vec<BroadcastFailure>,
}

/// Sends one message per active subscriber, in order, pausing between sends
/// to stay under provider rate limits. Failures are collected, not retried.
#[instrument(name = "crm.newsletter.broadcast", skip_all)]
pub async fn broadcast(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    request: BroadcastRequest,
    pause: Duration,
) -> CrmResult<BroadcastReport> {
    let subject = required_text("subject", &request.subject, 256)?;
    let html = required_text("html", &request.html, 500_000)?;
    let recipients = list(db, false).await?;

    let mut report = BroadcastReport {
        total: recipients.len(),
        ..BroadcastReport::default()
    };
    for (index, recipient) in recipients.into_iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        let email = OutgoingEmail {
            to: recipient.email.clone(),
            subject: subject.clone(),
            html: html.clone(),
        };
        match mailer.send(&email).await {
            Ok(()) => report.sent += 1,
            Err(err) => {
                warn!(to = %recipient.email, error = %err, "newsletter delivery failed");
                report.failed.push(BroadcastFailure {
                    email: recipient.email,
                    error: err.to_string(),
                });
            }
        }
    }
    info!(
        total = report.total,
        sent = report.sent,
        failed = report.failed.len(),
        "newsletter broadcast finished"
    );
    Ok(report)
}
