//! Deal lifecycle: the only path that moves `status`, `archived` and `reason`.
//!
//! Open statuses are interchangeable. Ganado/Perdido are terminal, require a
//! reason and archive the deal; leaving them goes through [`reopen`]. Each
//! successful transition writes exactly one status history row in the same
//! transaction as the deal update.

use chrono::Utc;
use entity::deal;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::deals::{find_deal, DealStatus};
use crate::error::{optional_text, validation_error, CrmError, CrmResult};
use crate::history::{self, HistoryEntry};

const MAX_REASON: usize = 2_000;

/// Status a reopened deal falls back to when its history has no open predecessor.
pub const REOPEN_FALLBACK: DealStatus = DealStatus::ProspeccionGeneral;

#[instrument(
    name = "crm.deals.change_status",
    skip_all,
    fields(deal_id = %deal_id, target = %target)
)]
pub async fn change_status(
    db: &DatabaseConnection,
    deal_id: Uuid,
    target: DealStatus,
    note: Option<String>,
    actor: Option<Uuid>,
) -> CrmResult<deal::Model> {
    let note = optional_text("reason", note, MAX_REASON)?;
    if target.is_terminal() && note.is_none() {
        return Err(validation_error(format!(
            "A reason is required to mark a deal as {}",
            target
        )));
    }

    let txn = db.begin().await?;
    let existing = find_deal(&txn, deal_id).await?;
    if existing.status.is_terminal() {
        return Err(CrmError::InvalidTransition(format!(
            "Deal is {}; reopen it before changing its status",
            existing.status
        )));
    }
    if existing.status == target {
        return Ok(existing);
    }

    let (reason, archived) = if target.is_terminal() {
        (note.clone(), true)
    } else {
        (existing.reason.clone(), false)
    };
    let from = existing.status;
    let updated = apply_transition(&txn, &existing, target, reason, archived).await?;
    history::record(
        &txn,
        HistoryEntry {
            deal_id,
            from_status: Some(from),
            new_status: target,
            notes: note,
            changed_by: actor,
        },
    )
    .await?;
    txn.commit().await?;

    info!(from = %from, to = %target, "deal status changed");
    Ok(updated)
}

/// Moves a terminal deal back into the pipeline at the status it held before closing.
#[instrument(name = "crm.deals.reopen", skip_all, fields(deal_id = %deal_id))]
pub async fn reopen(
    db: &DatabaseConnection,
    deal_id: Uuid,
    note: Option<String>,
    actor: Option<Uuid>,
) -> CrmResult<deal::Model> {
    let note = optional_text("notes", note, MAX_REASON)?;
    let txn = db.begin().await?;
    let existing = find_deal(&txn, deal_id).await?;
    if !existing.status.is_terminal() {
        return Err(CrmError::InvalidTransition(format!(
            "Only won or lost deals can be reopened; deal is {}",
            existing.status
        )));
    }

    let from = existing.status;
    let destination = history::status_before_terminal(&txn, deal_id, from)
        .await?
        .unwrap_or(REOPEN_FALLBACK);
    let updated = apply_transition(&txn, &existing, destination, None, false).await?;
    history::record(
        &txn,
        HistoryEntry {
            deal_id,
            from_status: Some(from),
            new_status: destination,
            notes: note.or_else(|| Some(format!("Reabierto desde {}", from))),
            changed_by: actor,
        },
    )
    .await?;
    txn.commit().await?;

    info!(from = %from, to = %destination, "deal reopened");
    Ok(updated)
}

/// Compare-and-set on the status read by the caller; a concurrent writer
/// that moved the deal first turns this into [`CrmError::Conflict`].
pub(crate) async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    expected: &deal::Model,
    target: DealStatus,
    reason: Option<String>,
    archived: bool,
) -> CrmResult<deal::Model> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let result = deal::Entity::update_many()
        .col_expr(deal::Column::Status, Expr::value(target))
        .col_expr(deal::Column::Reason, Expr::value(reason.clone()))
        .col_expr(deal::Column::Archived, Expr::value(archived))
        .col_expr(deal::Column::UpdatedAt, Expr::value(now))
        .filter(deal::Column::Id.eq(expected.id))
        .filter(deal::Column::Status.eq(expected.status))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(CrmError::Conflict(
            "Deal status changed concurrently; reload and retry".to_string(),
        ));
    }
    Ok(deal::Model {
        status: target,
        reason,
        archived,
        updated_at: now,
        ..expected.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deals::{self, NewDeal};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn stale_status_is_a_conflict() {
        let db = setup().await;
        let created = deals::create(
            &db,
            NewDeal {
                title: "Acme Website".into(),
                ..NewDeal::default()
            },
        )
        .await
        .unwrap();
        change_status(&db, created.id, DealStatus::Estudio, None, None)
            .await
            .unwrap();

        let err = apply_transition(&db, &created, DealStatus::Negociacion, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Conflict(_)));

        let current = deals::get(&db, created.id).await.unwrap();
        assert_eq!(current.status, DealStatus::Estudio);
        assert_eq!(history::list_for_deal(&db, created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn moving_to_the_same_status_records_nothing() {
        let db = setup().await;
        let created = deals::create(
            &db,
            NewDeal {
                title: "Same stage".into(),
                status: Some(DealStatus::Entregadas),
                ..NewDeal::default()
            },
        )
        .await
        .unwrap();
        let unchanged = change_status(&db, created.id, DealStatus::Entregadas, None, None)
            .await
            .unwrap();
        assert_eq!(unchanged.status, DealStatus::Entregadas);
        assert!(history::list_for_deal(&db, created.id).await.unwrap().is_empty());
    }
}
