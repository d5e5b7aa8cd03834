//! Deal store: CRUD and filtered listing over the `deals` table.
//!
//! Status, archived flag and terminal reason are owned by
//! [`crate::lifecycle`]; plain updates may not touch them.

use chrono::{DateTime, NaiveDate, Utc};
use entity::{deal, deal_activity, deal_note, deal_status_history};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{optional_text, required_text, validation_error, CrmError, CrmResult};
use crate::history::{stage_timeline, StageStep};

pub use entity::deal::Status as DealStatus;

const MAX_TITLE: usize = 256;
const MAX_SHORT: usize = 256;
const MAX_NOTES: usize = 65_535;

#[derive(Clone, Debug, Default)]
pub struct DealFilter {
    pub statuses: Vec<DealStatus>,
    pub search: Option<String>,
    pub include_archived: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewDeal {
    pub title: String,
    pub organization: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub value: Option<i64>,
    pub margin: Option<f64>,
    pub quality_lead: Option<i16>,
    pub proposal_type: Option<String>,
    pub channel: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: Option<DealStatus>,
}

/// Partial update. Outer `None` leaves a field untouched, `Some(None)` clears it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DealPatch {
    pub title: Option<String>,
    #[serde(deserialize_with = "present")]
    pub organization: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub contact_name: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub contact_email: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub contact_phone: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub value: Option<Option<i64>>,
    #[serde(deserialize_with = "present")]
    pub margin: Option<Option<f64>>,
    #[serde(deserialize_with = "present")]
    pub quality_lead: Option<Option<i16>>,
    #[serde(deserialize_with = "present")]
    pub proposal_type: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub channel: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(deserialize_with = "present")]
    pub delivery_date: Option<Option<NaiveDate>>,
    #[serde(deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    pub status: Option<DealStatus>,
    pub archived: Option<bool>,
    #[serde(deserialize_with = "present")]
    pub reason: Option<Option<String>>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Deal as returned to clients, with the derived stage position.
#[derive(Clone, Debug, Serialize)]
pub struct DealView {
    pub id: Uuid,
    pub title: String,
    pub organization: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub value: Option<i64>,
    pub currency: &'static str,
    pub margin: Option<f64>,
    pub quality_lead: Option<i16>,
    pub proposal_type: Option<String>,
    pub channel: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: DealStatus,
    pub reason: Option<String>,
    pub archived: bool,
    pub is_terminal: bool,
    pub stage_index: usize,
    pub stages: Vec<StageStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<deal::Model> for DealView {
    fn from(model: deal::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            organization: model.organization,
            contact_name: model.contact_name,
            contact_email: model.contact_email,
            contact_phone: model.contact_phone,
            value: model.value,
            currency: "CLP",
            margin: model.margin,
            quality_lead: model.quality_lead,
            proposal_type: model.proposal_type,
            channel: model.channel,
            due_date: model.due_date,
            delivery_date: model.delivery_date,
            notes: model.notes,
            status: model.status,
            reason: model.reason,
            archived: model.archived,
            is_terminal: model.status.is_terminal(),
            stage_index: model.status.stage_index(),
            stages: stage_timeline(model.status),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[instrument(
    name = "crm.deals.list",
    skip_all,
    fields(
        statuses = filter.statuses.len(),
        has_q = filter.search.as_deref().is_some_and(|q| !q.trim().is_empty()),
        include_archived = filter.include_archived
    )
)]
pub async fn list(db: &DatabaseConnection, filter: &DealFilter) -> CrmResult<Vec<deal::Model>> {
    let mut query = deal::Entity::find();
    if !filter.statuses.is_empty() {
        query = query.filter(deal::Column::Status.is_in(filter.statuses.iter().copied()));
    }
    if !filter.include_archived {
        query = query
            .filter(deal::Column::Archived.eq(false))
            .filter(deal::Column::Status.is_not_in(DealStatus::TERMINAL));
    }
    if let Some(pattern) = filter.search.as_deref().and_then(search_pattern) {
        query = query.filter(
            Expr::col((deal::Entity, deal::Column::SearchText))
                .like(LikeExpr::new(pattern).escape('\\')),
        );
    }
    let rows = query
        .order_by_desc(deal::Column::CreatedAt)
        .order_by_asc(deal::Column::Id)
        .all(db)
        .await?;
    Ok(rows)
}

/// Separates fields inside `search_text`.
const SEARCH_SEPARATOR: char = '\u{1f}';

/// Lowercased in Rust so matching does not depend on the backend's `lower()`.
fn search_text(
    title: &str,
    organization: Option<&str>,
    contact_name: Option<&str>,
    contact_email: Option<&str>,
) -> String {
    let mut text = title.to_lowercase();
    for field in [organization, contact_name, contact_email].into_iter().flatten() {
        text.push(SEARCH_SEPARATOR);
        text.push_str(&field.to_lowercase());
    }
    text
}

/// Substring `LIKE` pattern for a user query, with `\`, `%` and `_` escaped.
fn search_pattern(q: &str) -> Option<String> {
    let trimmed = q.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut pattern = String::with_capacity(trimmed.len() + 2);
    pattern.push('%');
    for ch in trimmed.to_lowercase().chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    Some(pattern)
}

pub async fn get(db: &DatabaseConnection, id: Uuid) -> CrmResult<deal::Model> {
    find_deal(db, id).await
}

pub(crate) async fn find_deal<C: ConnectionTrait>(conn: &C, id: Uuid) -> CrmResult<deal::Model> {
    deal::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(CrmError::NotFound("Deal"))
}

#[instrument(name = "crm.deals.create", skip_all)]
pub async fn create(db: &DatabaseConnection, input: NewDeal) -> CrmResult<deal::Model> {
    let status = input.status.unwrap_or_default();
    if status.is_terminal() {
        return Err(validation_error(format!(
            "New deals must start in an open status, not {}",
            status
        )));
    }
    let title = required_text("title", &input.title, MAX_TITLE)?;
    let organization = optional_text("organization", input.organization, MAX_SHORT)?;
    let contact_name = optional_text("contact_name", input.contact_name, MAX_SHORT)?;
    let contact_email = optional_text("contact_email", input.contact_email, 320)?;
    let search = search_text(
        &title,
        organization.as_deref(),
        contact_name.as_deref(),
        contact_email.as_deref(),
    );
    let now: DateTimeWithTimeZone = Utc::now().into();
    let active = deal::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title),
        organization: Set(organization),
        contact_name: Set(contact_name),
        contact_email: Set(contact_email),
        contact_phone: Set(optional_text("contact_phone", input.contact_phone, 64)?),
        value: Set(validate_value(input.value)?),
        margin: Set(validate_margin(input.margin)?),
        quality_lead: Set(validate_quality_lead(input.quality_lead)?),
        proposal_type: Set(optional_text("proposal_type", input.proposal_type, 128)?),
        channel: Set(optional_text("channel", input.channel, 128)?),
        due_date: Set(input.due_date),
        delivery_date: Set(input.delivery_date),
        notes: Set(optional_text("notes", input.notes, MAX_NOTES)?),
        status: Set(status),
        reason: Set(None),
        archived: Set(false),
        search_text: Set(search),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let model = active.insert(db).await?;
    info!(deal_id = %model.id, status = %model.status, "deal created");
    Ok(model)
}

#[instrument(name = "crm.deals.update", skip_all, fields(deal_id = %id))]
pub async fn update(db: &DatabaseConnection, id: Uuid, patch: DealPatch) -> CrmResult<deal::Model> {
    let existing = find_deal(db, id).await?;
    reject_lifecycle_fields(&existing, &patch)?;

    let mut title = existing.title.clone();
    let mut organization = existing.organization.clone();
    let mut contact_name = existing.contact_name.clone();
    let mut contact_email = existing.contact_email.clone();

    let mut active: deal::ActiveModel = existing.into();
    if let Some(value) = &patch.title {
        title = required_text("title", value, MAX_TITLE)?;
        active.title = Set(title.clone());
    }
    if let Some(value) = patch.organization {
        organization = optional_text("organization", value, MAX_SHORT)?;
        active.organization = Set(organization.clone());
    }
    if let Some(value) = patch.contact_name {
        contact_name = optional_text("contact_name", value, MAX_SHORT)?;
        active.contact_name = Set(contact_name.clone());
    }
    if let Some(value) = patch.contact_email {
        contact_email = optional_text("contact_email", value, 320)?;
        active.contact_email = Set(contact_email.clone());
    }
    if let Some(value) = patch.contact_phone {
        active.contact_phone = Set(optional_text("contact_phone", value, 64)?);
    }
    if let Some(value) = patch.value {
        active.value = Set(validate_value(value)?);
    }
    if let Some(value) = patch.margin {
        active.margin = Set(validate_margin(value)?);
    }
    if let Some(value) = patch.quality_lead {
        active.quality_lead = Set(validate_quality_lead(value)?);
    }
    if let Some(value) = patch.proposal_type {
        active.proposal_type = Set(optional_text("proposal_type", value, 128)?);
    }
    if let Some(value) = patch.channel {
        active.channel = Set(optional_text("channel", value, 128)?);
    }
    if let Some(value) = patch.due_date {
        active.due_date = Set(value);
    }
    if let Some(value) = patch.delivery_date {
        active.delivery_date = Set(value);
    }
    if let Some(value) = patch.notes {
        active.notes = Set(optional_text("notes", value, MAX_NOTES)?);
    }
    active.search_text = Set(search_text(
        &title,
        organization.as_deref(),
        contact_name.as_deref(),
        contact_email.as_deref(),
    ));
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(db).await?;
    Ok(updated)
}

fn reject_lifecycle_fields(existing: &deal::Model, patch: &DealPatch) -> CrmResult<()> {
    let status_changed = patch.status.is_some_and(|status| status != existing.status);
    let archived_changed = patch.archived.is_some_and(|flag| flag != existing.archived);
    let reason_changed = patch.reason.as_ref().is_some_and(|reason| {
        let normalized = reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
        normalized != existing.reason.as_deref()
    });
    if status_changed || archived_changed || reason_changed {
        return Err(CrmError::InvalidTransition(
            "status, archived and reason change only through the status and reopen operations"
                .to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeletedDeal {
    pub notes: u64,
    pub activities: u64,
    pub history: u64,
}

/// Irreversible. Children go first so no orphan rows survive the parent.
#[instrument(name = "crm.deals.delete", skip_all, fields(deal_id = %id))]
pub async fn delete(db: &DatabaseConnection, id: Uuid) -> CrmResult<DeletedDeal> {
    let txn = db.begin().await?;
    find_deal(&txn, id).await?;

    let notes = deal_note::Entity::delete_many()
        .filter(deal_note::Column::DealId.eq(id))
        .exec(&txn)
        .await?
        .rows_affected;
    let activities = deal_activity::Entity::delete_many()
        .filter(deal_activity::Column::DealId.eq(id))
        .exec(&txn)
        .await?
        .rows_affected;
    let history = deal_status_history::Entity::delete_many()
        .filter(deal_status_history::Column::DealId.eq(id))
        .exec(&txn)
        .await?
        .rows_affected;
    deal::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    let removed = DeletedDeal {
        notes,
        activities,
        history,
    };
    info!(notes, activities, history, "deal deleted");
    Ok(removed)
}

fn validate_value(value: Option<i64>) -> CrmResult<Option<i64>> {
    match value {
        Some(amount) if amount < 0 => Err(validation_error("value must not be negative")),
        other => Ok(other),
    }
}

fn validate_margin(value: Option<f64>) -> CrmResult<Option<f64>> {
    match value {
        Some(margin) if !margin.is_finite() || !(-100.0..=100.0).contains(&margin) => Err(
            validation_error("margin must be a percentage between -100 and 100"),
        ),
        other => Ok(other),
    }
}

fn validate_quality_lead(value: Option<i16>) -> CrmResult<Option<i16>> {
    match value {
        Some(rating) if !(1..=5).contains(&rating) => {
            Err(validation_error("quality_lead must be between 1 and 5"))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(status: DealStatus) -> deal::Model {
        let now: DateTimeWithTimeZone = Utc::now().into();
        deal::Model {
            id: Uuid::new_v4(),
            title: "Acme Website".into(),
            organization: None,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            value: None,
            margin: None,
            quality_lead: None,
            proposal_type: None,
            channel: None,
            due_date: None,
            delivery_date: None,
            notes: None,
            status,
            reason: status.is_terminal().then(|| "Price accepted".to_string()),
            archived: status.is_terminal(),
            search_text: "acme website".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn search_pattern_escapes_like_metacharacters() {
        assert_eq!(search_pattern("  "), None);
        assert_eq!(search_pattern(" ÁREA ").as_deref(), Some("%área%"));
        assert_eq!(
            search_pattern(r"50%_a\b").as_deref(),
            Some(r"%50\%\_a\\b%")
        );
    }

    #[test]
    fn search_text_lowercases_every_field() {
        let text = search_text("Piloto", Some("ÁREA Ñuble"), None, Some("Ana@Example.CL"));
        assert_eq!(text, "piloto\u{1f}área ñuble\u{1f}ana@example.cl");
    }

    #[test]
    fn patch_may_echo_lifecycle_fields() {
        let existing = model(DealStatus::Ganado);
        let patch = DealPatch {
            status: Some(DealStatus::Ganado),
            archived: Some(true),
            reason: Some(Some(" Price accepted ".into())),
            ..DealPatch::default()
        };
        assert!(reject_lifecycle_fields(&existing, &patch).is_ok());
    }

    #[test]
    fn patch_cannot_change_status_or_flags() {
        let existing = model(DealStatus::Ganado);
        for patch in [
            DealPatch {
                status: Some(DealStatus::Estudio),
                ..DealPatch::default()
            },
            DealPatch {
                archived: Some(false),
                ..DealPatch::default()
            },
            DealPatch {
                reason: Some(None),
                ..DealPatch::default()
            },
        ] {
            let err = reject_lifecycle_fields(&existing, &patch).unwrap_err();
            assert!(matches!(err, CrmError::InvalidTransition(_)));
        }
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let patch: DealPatch =
            serde_json::from_str(r#"{"organization": null, "title": "Renamed"}"#).unwrap();
        assert_eq!(patch.organization, Some(None));
        assert_eq!(patch.contact_name, None);
        assert_eq!(patch.title.as_deref(), Some("Renamed"));
    }

    #[test]
    fn quality_lead_is_bounded() {
        assert!(validate_quality_lead(Some(0)).is_err());
        assert!(validate_quality_lead(Some(6)).is_err());
        assert_eq!(validate_quality_lead(Some(5)).unwrap(), Some(5));
        assert!(validate_margin(Some(f64::NAN)).is_err());
        assert!(validate_value(Some(-1)).is_err());
    }

    #[test]
    fn view_carries_stage_position() {
        let view = DealView::from(model(DealStatus::Estudio));
        assert_eq!(view.stage_index, 2);
        assert!(!view.is_terminal);
        assert_eq!(view.currency, "CLP");
        assert_eq!(view.stages.len(), DealStatus::ORDERED.len());
    }
}
