//! Public contact form: notify the business inbox, then try to open a lead.

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::deals::{self, DealStatus, NewDeal};
use crate::error::{normalize_email, optional_text, required_text, CrmResult};
use crate::mailer::{escape_html, Mailer, OutgoingEmail};

pub const LEAD_CHANNEL: &str = "Formulario web";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub service: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug)]
struct ContactMessage {
    name: String,
    email: String,
    company: Option<String>,
    phone: Option<String>,
    service: Option<String>,
    message: String,
}

impl ContactMessage {
    fn validate(request: ContactRequest) -> CrmResult<Self> {
        Ok(Self {
            name: required_text("name", &request.name, 256)?,
            email: normalize_email(&request.email)?,
            company: optional_text("company", request.company, 256)?,
            phone: optional_text("phone", request.phone, 64)?,
            service: optional_text("service", request.service, 128)?,
            message: required_text("message", &request.message, 5_000)?,
        })
    }

    fn email_to(&self, inbox: &str) -> OutgoingEmail {
        let mut rows = vec![
            ("Nombre", self.name.as_str()),
            ("Email", self.email.as_str()),
        ];
        for (label, value) in [
            ("Empresa", &self.company),
            ("Teléfono", &self.phone),
            ("Servicio", &self.service),
        ] {
            if let Some(value) = value {
                rows.push((label, value.as_str()));
            }
        }
        let details: String = rows
            .iter()
            .map(|(label, value)| {
                format!("<p><strong>{}:</strong> {}</p>", label, escape_html(value))
            })
            .collect();
        OutgoingEmail {
            to: inbox.to_string(),
            subject: format!("Nuevo contacto: {}", self.name),
            html: format!(
                "{}<p>{}</p>",
                details,
                escape_html(&self.message).replace('\n', "<br>")
            ),
        }
    }

    fn lead(&self) -> NewDeal {
        let title = match &self.company {
            Some(company) => format!("Lead web: {} ({})", self.name, company),
            None => format!("Lead web: {}", self.name),
        };
        NewDeal {
            title,
            organization: self.company.clone(),
            contact_name: Some(self.name.clone()),
            contact_email: Some(self.email.clone()),
            contact_phone: self.phone.clone(),
            proposal_type: self.service.clone(),
            channel: Some(LEAD_CHANNEL.to_string()),
            notes: Some(self.message.clone()),
            status: Some(DealStatus::ProspeccionGeneral),
            ..NewDeal::default()
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ContactReceipt {
    pub lead_id: Option<Uuid>,
}

/// The inbox email is the primary effect and its failure is returned;
/// lead creation is best-effort and only logged when it fails.
#[instrument(name = "crm.contact.submit", skip_all)]
pub async fn submit(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    inbox: &str,
    request: ContactRequest,
) -> CrmResult<ContactReceipt> {
    let message = ContactMessage::validate(request)?;
    mailer.send(&message.email_to(inbox)).await?;

    let lead_id = match deals::create(db, message.lead()).await {
        Ok(deal) => {
            info!(deal_id = %deal.id, "lead created from contact form");
            Some(deal.id)
        }
        Err(err) => {
            warn!(error = %err, "lead auto-creation failed");
            None
        }
    };
    Ok(ContactReceipt { lead_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ContactRequest {
        ContactRequest {
            name: "Ana Pérez".into(),
            email: "Ana@Retail.cl".into(),
            company: Some("Retail Sur".into()),
            phone: None,
            service: Some("Chatbot".into()),
            message: "Necesitamos <ayuda>\ncon IA".into(),
        }
    }

    #[test]
    fn email_escapes_user_content() {
        let message = ContactMessage::validate(request()).unwrap();
        let email = message.email_to("hola@consultora.cl");
        assert_eq!(email.to, "hola@consultora.cl");
        assert_eq!(email.subject, "Nuevo contacto: Ana Pérez");
        assert!(email.html.contains("&lt;ayuda&gt;<br>con IA"));
        assert!(email.html.contains("ana@retail.cl"));
        assert!(!email.html.contains("Teléfono"));
    }

    #[test]
    fn lead_maps_contact_fields() {
        let lead = ContactMessage::validate(request()).unwrap().lead();
        assert_eq!(lead.title, "Lead web: Ana Pérez (Retail Sur)");
        assert_eq!(lead.channel.as_deref(), Some(LEAD_CHANNEL));
        assert_eq!(lead.contact_email.as_deref(), Some("ana@retail.cl"));
        assert_eq!(lead.status, Some(DealStatus::ProspeccionGeneral));
    }

    #[test]
    fn message_is_required() {
        let mut req = request();
        req.message = "  ".into();
        assert!(ContactMessage::validate(req).is_err());
    }
}
