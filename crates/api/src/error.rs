use sea_orm::DbErr;
use thiserror::Error;

use crate::mailer::MailError;

pub type CrmResult<T> = Result<T, CrmError>;

/// Failure taxonomy shared by the stores and the lifecycle controller.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Dependency(#[from] DbErr),
    #[error("email delivery failed: {0}")]
    Mail(#[from] MailError),
}

impl CrmError {
    pub fn code(&self) -> &'static str {
        match self {
            CrmError::Validation(_) => "VALIDATION",
            CrmError::NotFound(_) => "NOT_FOUND",
            CrmError::InvalidTransition(_) => "INVALID_TRANSITION",
            CrmError::Conflict(_) => "CONFLICT",
            CrmError::Dependency(_) => "INTERNAL",
            CrmError::Mail(_) => "MAIL",
        }
    }

    /// Errors caused by a collaborator rather than by the caller's input.
    pub fn is_dependency(&self) -> bool {
        matches!(self, CrmError::Dependency(_) | CrmError::Mail(_))
    }
}

pub(crate) fn validation_error(message: impl Into<String>) -> CrmError {
    CrmError::Validation(message.into())
}

pub(crate) fn validate_length(field: &str, value: &str, max: usize) -> CrmResult<()> {
    if value.chars().count() > max {
        return Err(validation_error(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

/// Trims and length-checks a mandatory text field.
pub(crate) fn required_text(field: &str, value: &str, max: usize) -> CrmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(validation_error(format!("{} is required", field)));
    }
    validate_length(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

/// Blank optional text collapses to `None`.
pub(crate) fn optional_text(
    field: &str,
    value: Option<String>,
    max: usize,
) -> CrmResult<Option<String>> {
    match value {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            validate_length(field, trimmed, max)?;
            Ok(Some(trimmed.to_string()))
        }
        None => Ok(None),
    }
}

pub(crate) fn normalize_email(value: &str) -> CrmResult<String> {
    let email = value.trim().to_lowercase();
    validate_length("email", &email, 320)?;
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(validation_error("A valid email is required"));
    }
    Ok(email)
}
