#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use api::auth::{issue_token, AuthConfig, UserRole};
use api::mailer::{MailError, Mailer, OutgoingEmail};
use api::rate_limit::SubscribeRateLimiter;
use api::{ApiSettings, AppState};
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

/// Records every message; addresses listed in `reject` fail with a provider error.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    reject: Vec<String>,
}

impl RecordingMailer {
    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            reject: addresses.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if self.reject.iter().any(|address| address == &email.to) {
            return Err(MailError::Rejected {
                status: 422,
                body: "invalid recipient".into(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "integration-secret".into(),
        session_ttl_minutes: 30,
    }
}

pub fn bearer(role: UserRole) -> String {
    let token = issue_token(Uuid::new_v4(), role, &auth_config()).unwrap();
    format!("Bearer {}", token)
}

pub fn app_state(db: DatabaseConnection, mailer: RecordingMailer) -> AppState {
    AppState {
        db: Arc::new(db),
        auth: Arc::new(auth_config()),
        mailer: Arc::new(mailer),
        settings: Arc::new(ApiSettings {
            contact_inbox: "hola@consultora.test".into(),
            broadcast_pause: Duration::ZERO,
            trust_proxy_headers: false,
        }),
        subscribe_limiter: SubscribeRateLimiter::new(3, Duration::from_secs(3600)),
    }
}
