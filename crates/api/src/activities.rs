use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use entity::deal_activity::{self, Kind, Status};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, Order,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::deals::find_deal;
use crate::error::{optional_text, required_text, validation_error, CrmError, CrmResult};

pub use entity::deal_activity::{Kind as ActivityKind, Status as ActivityStatus};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewActivity {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<Kind>,
    pub scheduled_date: Option<NaiveDate>,
    /// `HH:MM` or `HH:MM:SS`.
    pub scheduled_time: Option<String>,
}

/// Derived, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Overdue,
    Today,
    Upcoming,
    Completed,
    Cancelled,
}

pub fn display_status(activity: &deal_activity::Model, today: NaiveDate) -> DisplayStatus {
    match activity.status {
        Status::Completed => DisplayStatus::Completed,
        Status::Cancelled => DisplayStatus::Cancelled,
        Status::Pending if activity.scheduled_date < today => DisplayStatus::Overdue,
        Status::Pending if activity.scheduled_date == today => DisplayStatus::Today,
        Status::Pending => DisplayStatus::Upcoming,
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ActivityView {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Kind,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Option<NaiveTime>,
    pub status: Status,
    pub display_status: DisplayStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActivityView {
    pub fn new(model: deal_activity::Model, today: NaiveDate) -> Self {
        let display_status = display_status(&model, today);
        Self {
            id: model.id,
            deal_id: model.deal_id,
            title: model.title,
            description: model.description,
            kind: model.kind,
            scheduled_date: model.scheduled_date,
            scheduled_time: model.scheduled_time,
            status: model.status,
            display_status,
            created_at: model.created_at.into(),
            completed_at: model.completed_at.map(Into::into),
        }
    }
}

/// Ordered by date, then timed before untimed, then time.
pub async fn list_for_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_activity::Model>> {
    let rows = deal_activity::Entity::find()
        .filter(deal_activity::Column::DealId.eq(deal_id))
        .order_by_asc(deal_activity::Column::ScheduledDate)
        .order_by(untimed_last_expr(), Order::Asc)
        .order_by_asc(deal_activity::Column::ScheduledTime)
        .order_by_asc(deal_activity::Column::CreatedAt)
        .all(db)
        .await?;
    Ok(rows)
}

fn untimed_last_expr() -> SimpleExpr {
    Expr::cust("CASE WHEN scheduled_time IS NULL THEN 1 ELSE 0 END")
}

#[instrument(name = "crm.activities.create", skip_all, fields(deal_id = %deal_id))]
pub async fn create(
    db: &DatabaseConnection,
    deal_id: Uuid,
    input: NewActivity,
) -> CrmResult<deal_activity::Model> {
    find_deal(db, deal_id).await?;
    let title = required_text("title", &input.title, 256)?;
    let scheduled_date = input
        .scheduled_date
        .ok_or_else(|| validation_error("scheduled_date is required"))?;
    let scheduled_time = parse_time(input.scheduled_time.as_deref())?;
    let active = deal_activity::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(deal_id),
        title: Set(title),
        description: Set(optional_text("description", input.description, 65_535)?),
        kind: Set(input.kind.unwrap_or_default()),
        scheduled_date: Set(scheduled_date),
        scheduled_time: Set(scheduled_time),
        status: Set(Status::Pending),
        created_at: Set(Utc::now().into()),
        completed_at: Set(None),
    };
    let model = active.insert(db).await?;
    info!(activity_id = %model.id, "activity scheduled");
    Ok(model)
}

/// Re-completing only re-stamps `completed_at`.
#[instrument(name = "crm.activities.complete", skip_all, fields(activity_id = %id))]
pub async fn complete(db: &DatabaseConnection, id: Uuid) -> CrmResult<deal_activity::Model> {
    let existing = find_activity(db, id).await?;
    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut active: deal_activity::ActiveModel = existing.into();
    active.status = Set(Status::Completed);
    active.completed_at = Set(Some(now));
    Ok(active.update(db).await?)
}

#[instrument(name = "crm.activities.cancel", skip_all, fields(activity_id = %id))]
pub async fn cancel(db: &DatabaseConnection, id: Uuid) -> CrmResult<deal_activity::Model> {
    let existing = find_activity(db, id).await?;
    match existing.status {
        Status::Cancelled => Ok(existing),
        Status::Completed => Err(CrmError::InvalidTransition(
            "Completed activities cannot be cancelled".to_string(),
        )),
        Status::Pending => {
            let mut active: deal_activity::ActiveModel = existing.into();
            active.status = Set(Status::Cancelled);
            Ok(active.update(db).await?)
        }
    }
}

async fn find_activity(db: &DatabaseConnection, id: Uuid) -> CrmResult<deal_activity::Model> {
    deal_activity::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("Activity"))
}

fn parse_time(value: Option<&str>) -> CrmResult<Option<NaiveTime>> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map(Some)
        .map_err(|_| validation_error("scheduled_time must be HH:MM"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(status: Status, scheduled_date: NaiveDate) -> deal_activity::Model {
        deal_activity::Model {
            id: Uuid::new_v4(),
            deal_id: Uuid::new_v4(),
            title: "Follow-up call".into(),
            description: None,
            kind: Kind::Call,
            scheduled_date,
            scheduled_time: None,
            status,
            created_at: Utc::now().into(),
            completed_at: None,
        }
    }

    #[test]
    fn pending_activities_are_bucketed_by_date() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let yesterday = today.pred_opt().unwrap();
        let tomorrow = today.succ_opt().unwrap();
        assert_eq!(
            display_status(&activity(Status::Pending, yesterday), today),
            DisplayStatus::Overdue
        );
        assert_eq!(
            display_status(&activity(Status::Pending, today), today),
            DisplayStatus::Today
        );
        assert_eq!(
            display_status(&activity(Status::Pending, tomorrow), today),
            DisplayStatus::Upcoming
        );
    }

    #[test]
    fn stored_terminal_statuses_win_over_dates() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let past = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(
            display_status(&activity(Status::Completed, past), today),
            DisplayStatus::Completed
        );
        assert_eq!(
            display_status(&activity(Status::Cancelled, today), today),
            DisplayStatus::Cancelled
        );
    }

    #[test]
    fn times_accept_minutes_or_seconds() {
        assert_eq!(
            parse_time(Some("09:30")).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0)
        );
        assert_eq!(
            parse_time(Some("17:05:10")).unwrap(),
            NaiveTime::from_hms_opt(17, 5, 10)
        );
        assert_eq!(parse_time(Some("  ")).unwrap(), None);
        assert!(parse_time(Some("25:00")).is_err());
    }

    #[test]
    fn activity_type_uses_snake_case() {
        let input: NewActivity = serde_json::from_str(
            r#"{"title": "Demo", "type": "follow_up", "scheduled_date": "2026-10-20"}"#,
        )
        .unwrap();
        assert_eq!(input.kind, Some(Kind::FollowUp));
    }
}
