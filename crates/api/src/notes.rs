use chrono::{DateTime, Utc};
use entity::deal_note;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::deals::find_deal;
use crate::error::{required_text, CrmResult};

const MAX_NOTE: usize = 10_000;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewNote {
    pub content: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct NoteView {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub author_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<deal_note::Model> for NoteView {
    fn from(model: deal_note::Model) -> Self {
        Self {
            id: model.id,
            deal_id: model.deal_id,
            author_id: model.author_id,
            content: model.content,
            created_at: model.created_at.into(),
        }
    }
}

/// Newest first.
pub async fn list_for_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_note::Model>> {
    let rows = deal_note::Entity::find()
        .filter(deal_note::Column::DealId.eq(deal_id))
        .order_by_desc(deal_note::Column::CreatedAt)
        .order_by_desc(deal_note::Column::Id)
        .all(db)
        .await?;
    Ok(rows)
}

#[instrument(name = "crm.notes.add", skip_all, fields(deal_id = %deal_id))]
pub async fn add(
    db: &DatabaseConnection,
    deal_id: Uuid,
    author_id: Option<Uuid>,
    content: &str,
) -> CrmResult<deal_note::Model> {
    let content = required_text("content", content, MAX_NOTE)?;
    find_deal(db, deal_id).await?;
    let active = deal_note::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(deal_id),
        author_id: Set(author_id),
        content: Set(content),
        created_at: Set(Utc::now().into()),
    };
    Ok(active.insert(db).await?)
}
