use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub organization: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    /// Amount in CLP.
    pub value: Option<i64>,
    pub margin: Option<f64>,
    pub quality_lead: Option<i16>,
    pub proposal_type: Option<String>,
    pub channel: Option<String>,
    pub due_date: Option<Date>,
    pub delivery_date: Option<Date>,
    pub notes: Option<String>,
    #[sea_orm(indexed)]
    pub status: Status,
    pub reason: Option<String>,
    pub archived: bool,
    /// Lowercased title, organization and contact fields, kept in sync by the deal store.
    pub search_text: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::deal_note::Entity")]
    Note,
    #[sea_orm(has_many = "super::deal_activity::Entity")]
    Activity,
    #[sea_orm(has_many = "super::deal_status_history::Entity")]
    StatusHistory,
}

impl Related<super::deal_note::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Note.def()
    }
}

impl Related<super::deal_activity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Activity.def()
    }
}

impl Related<super::deal_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

/// Pipeline status of a deal. Declaration order is the canonical stage order.
#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum Status {
    #[sea_orm(string_value = "Prospección General")]
    #[serde(rename = "Prospección General")]
    ProspeccionGeneral,
    #[sea_orm(string_value = "Prospección Contingente")]
    #[serde(rename = "Prospección Contingente")]
    ProspeccionContingente,
    #[sea_orm(string_value = "Estudio")]
    #[serde(rename = "Estudio")]
    Estudio,
    #[sea_orm(string_value = "Entregadas")]
    #[serde(rename = "Entregadas")]
    Entregadas,
    #[sea_orm(string_value = "Negociación")]
    #[serde(rename = "Negociación")]
    Negociacion,
    #[sea_orm(string_value = "Ganado")]
    #[serde(rename = "Ganado")]
    Ganado,
    #[sea_orm(string_value = "Perdido")]
    #[serde(rename = "Perdido")]
    Perdido,
}

impl Status {
    pub const ORDERED: [Status; 7] = [
        Status::ProspeccionGeneral,
        Status::ProspeccionContingente,
        Status::Estudio,
        Status::Entregadas,
        Status::Negociacion,
        Status::Ganado,
        Status::Perdido,
    ];

    pub const TERMINAL: [Status; 2] = [Status::Ganado, Status::Perdido];

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Ganado | Status::Perdido)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::ProspeccionGeneral => "Prospección General",
            Status::ProspeccionContingente => "Prospección Contingente",
            Status::Estudio => "Estudio",
            Status::Entregadas => "Entregadas",
            Status::Negociacion => "Negociación",
            Status::Ganado => "Ganado",
            Status::Perdido => "Perdido",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        Self::ORDERED
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
    }

    /// Position in the canonical stage order.
    pub fn stage_index(self) -> usize {
        Self::ORDERED
            .iter()
            .position(|status| *status == self)
            .unwrap_or_default()
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::ProspeccionGeneral
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ActiveModelBehavior for ActiveModel {}
