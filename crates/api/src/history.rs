//! Append-only status history and the canonical stage timeline.

use chrono::{DateTime, Utc};
use entity::{deal, deal_status_history};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::Serialize;
use uuid::Uuid;

use crate::deals::{find_deal, DealStatus};
use crate::error::CrmResult;

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub deal_id: Uuid,
    pub from_status: Option<DealStatus>,
    pub new_status: DealStatus,
    pub notes: Option<String>,
    pub changed_by: Option<Uuid>,
}

pub async fn record<C: ConnectionTrait>(
    conn: &C,
    entry: HistoryEntry,
) -> CrmResult<deal_status_history::Model> {
    find_deal(conn, entry.deal_id).await?;
    let now: DateTimeWithTimeZone = Utc::now().into();
    let row = deal_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(entry.deal_id),
        from_status: Set(entry.from_status),
        new_status: Set(entry.new_status),
        notes: Set(entry.notes),
        changed_by: Set(entry.changed_by),
        changed_at: Set(now),
    };
    Ok(row.insert(conn).await?)
}

/// Chronological, oldest first.
pub async fn list_for_deal<C: ConnectionTrait>(
    conn: &C,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_status_history::Model>> {
    let rows = deal_status_history::Entity::find()
        .filter(deal_status_history::Column::DealId.eq(deal_id))
        .order_by_asc(deal_status_history::Column::ChangedAt)
        .order_by_asc(deal_status_history::Column::Id)
        .all(conn)
        .await?;
    Ok(rows)
}

/// The open status a deal held right before it entered `terminal`.
pub(crate) async fn status_before_terminal<C: ConnectionTrait>(
    conn: &C,
    deal_id: Uuid,
    terminal: DealStatus,
) -> CrmResult<Option<DealStatus>> {
    let row = deal_status_history::Entity::find()
        .filter(deal_status_history::Column::DealId.eq(deal_id))
        .filter(deal_status_history::Column::NewStatus.eq(terminal))
        .order_by_desc(deal_status_history::Column::ChangedAt)
        .one(conn)
        .await?;
    Ok(row
        .and_then(|entry| entry.from_status)
        .filter(|status| status.is_open()))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageStep {
    pub status: DealStatus,
    pub index: usize,
    pub completed: bool,
    pub current: bool,
}

/// Every stage up to and including the live status counts as completed.
pub fn stage_timeline(current: DealStatus) -> Vec<StageStep> {
    let current_index = current.stage_index();
    DealStatus::ORDERED
        .iter()
        .enumerate()
        .map(|(index, status)| StageStep {
            status: *status,
            index,
            completed: index <= current_index,
            current: index == current_index,
        })
        .collect()
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryView {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub from_status: Option<DealStatus>,
    pub new_status: DealStatus,
    pub notes: Option<String>,
    pub changed_by: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

impl From<deal_status_history::Model> for HistoryView {
    fn from(model: deal_status_history::Model) -> Self {
        Self {
            id: model.id,
            deal_id: model.deal_id,
            from_status: model.from_status,
            new_status: model.new_status,
            notes: model.notes,
            changed_by: model.changed_by,
            changed_at: model.changed_at.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DealTimeline {
    pub status: DealStatus,
    pub stage_index: usize,
    pub stages: Vec<StageStep>,
    pub history: Vec<HistoryView>,
}

impl DealTimeline {
    pub fn new(deal: &deal::Model, history: Vec<deal_status_history::Model>) -> Self {
        Self {
            status: deal.status,
            stage_index: deal.status.stage_index(),
            stages: stage_timeline(deal.status),
            history: history.into_iter().map(HistoryView::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_index_follows_declaration_order() {
        assert_eq!(DealStatus::ProspeccionGeneral.stage_index(), 0);
        assert_eq!(DealStatus::Negociacion.stage_index(), 4);
        assert_eq!(DealStatus::Ganado.stage_index(), 5);
        assert_eq!(DealStatus::Perdido.stage_index(), 6);
    }

    #[test]
    fn timeline_marks_stages_up_to_current() {
        let steps = stage_timeline(DealStatus::Entregadas);
        let completed: Vec<bool> = steps.iter().map(|s| s.completed).collect();
        assert_eq!(completed, vec![true, true, true, true, false, false, false]);
        let current: Vec<_> = steps.iter().filter(|s| s.current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].status, DealStatus::Entregadas);
    }

    #[test]
    fn first_stage_is_current_for_new_deals() {
        let steps = stage_timeline(DealStatus::default());
        assert!(steps[0].current && steps[0].completed);
        assert!(steps[1..].iter().all(|s| !s.completed));
    }
}
