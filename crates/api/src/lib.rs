//! CRM core services and their JSON HTTP routes.

pub mod activities;
pub mod auth;
pub mod contact;
pub mod deals;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod mailer;
pub mod notes;
pub mod rate_limit;
pub mod routes;
pub mod seed;
pub mod subscribers;

pub use error::{CrmError, CrmResult};
pub use routes::{router, ApiSettings, AppState};
