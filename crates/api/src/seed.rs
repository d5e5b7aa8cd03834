//! Demo pipeline for local development.

use chrono::{Duration, Utc};
use entity::deal;
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use tracing::info;

use crate::activities::{self, ActivityKind, NewActivity};
use crate::deals::{self, DealStatus, NewDeal};
use crate::error::CrmResult;
use crate::{lifecycle, notes};

#[derive(Debug, Default)]
pub struct SeedSummary {
    pub deals: usize,
    pub skipped: bool,
}

/// Creates a handful of deals across the pipeline. Does nothing when the
/// deals table already has rows.
pub async fn seed_demo(db: &DatabaseConnection) -> CrmResult<SeedSummary> {
    if deal::Entity::find().count(db).await? > 0 {
        info!("deals already present; skipping demo seed");
        return Ok(SeedSummary {
            deals: 0,
            skipped: true,
        });
    }

    let retail = deals::create(
        db,
        NewDeal {
            title: "Chatbot de atención para Retail Sur".into(),
            organization: Some("Retail Sur".into()),
            contact_name: Some("Ana Pérez".into()),
            contact_email: Some("ana@retailsur.cl".into()),
            value: Some(12_000_000),
            margin: Some(35.0),
            quality_lead: Some(4),
            proposal_type: Some("Chatbot".into()),
            channel: Some("Referido".into()),
            ..NewDeal::default()
        },
    )
    .await?;
    lifecycle::change_status(
        db,
        retail.id,
        DealStatus::Estudio,
        Some("Levantamiento de requerimientos agendado".into()),
        None,
    )
    .await?;
    activities::create(
        db,
        retail.id,
        NewActivity {
            title: "Reunión de levantamiento".into(),
            kind: Some(ActivityKind::Meeting),
            scheduled_date: Some((Utc::now() + Duration::days(3)).date_naive()),
            scheduled_time: Some("10:00".into()),
            ..NewActivity::default()
        },
    )
    .await?;
    notes::add(
        db,
        retail.id,
        None,
        "Interesados en integrar WhatsApp y su CRM actual.",
    )
    .await?;

    let mining = deals::create(
        db,
        NewDeal {
            title: "Analítica predictiva de mantenimiento".into(),
            organization: Some("Minera Norte".into()),
            contact_name: Some("Jorge Díaz".into()),
            value: Some(45_000_000),
            quality_lead: Some(5),
            proposal_type: Some("Analítica".into()),
            channel: Some("LinkedIn".into()),
            status: Some(DealStatus::Negociacion),
            ..NewDeal::default()
        },
    )
    .await?;
    lifecycle::change_status(
        db,
        mining.id,
        DealStatus::Ganado,
        Some("Contrato firmado".into()),
        None,
    )
    .await?;

    deals::create(
        db,
        NewDeal {
            title: "Automatización de agenda clínica".into(),
            organization: Some("Clínica Los Andes".into()),
            channel: Some("Formulario web".into()),
            status: Some(DealStatus::ProspeccionContingente),
            ..NewDeal::default()
        },
    )
    .await?;

    let seeded = deal::Entity::find().count(db).await? as usize;
    info!(deals = seeded, "demo pipeline seeded");
    Ok(SeedSummary {
        deals: seeded,
        skipped: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn seeds_once() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let first = seed_demo(&db).await.unwrap();
        assert_eq!(first.deals, 3);
        assert!(!first.skipped);

        let second = seed_demo(&db).await.unwrap();
        assert_eq!(second.deals, 0);
        assert!(second.skipped);
        assert_eq!(deal::Entity::find().count(&db).await.unwrap(), 3);
    }
}
