use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use api::auth::AuthConfig;
use api::ApiSettings;
use platform_db::DatabaseSettings;

const DEV_SECRET: &str = "dev-secret";

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub resend_api_key: Option<String>,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub auth: AuthConfig,
    pub cors_allowed_origins: Vec<String>,
    pub mail: MailConfig,
    pub api: ApiSettings,
    pub subscribe_rate_limit: u32,
    pub subscribe_rate_window: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let database = DatabaseSettings::from_env().context("database settings")?;

        let jwt_secret = std::env::var("AUTH_SECRET").unwrap_or_else(|_| DEV_SECRET.into());
        if jwt_secret.trim().is_empty() {
            return Err(anyhow!("AUTH_SECRET must not be empty"));
        }
        let auth = AuthConfig {
            jwt_secret,
            session_ttl_minutes: env_parse("SESSION_TTL_MINUTES", 60)?,
        };

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:4321".into())
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        let mail = MailConfig {
            resend_api_key: std::env::var("RESEND_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "noreply@localhost".into()),
        };

        let defaults = ApiSettings::default();
        let api = ApiSettings {
            contact_inbox: std::env::var("CONTACT_INBOX").unwrap_or(defaults.contact_inbox),
            broadcast_pause: Duration::from_millis(env_parse(
                "BROADCAST_PAUSE_MS",
                defaults.broadcast_pause.as_millis() as u64,
            )?),
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?,
        };

        Ok(Self {
            database,
            auth,
            cors_allowed_origins,
            mail,
            api,
            subscribe_rate_limit: env_parse("SUBSCRIBE_RATE_LIMIT", 5)?,
            subscribe_rate_window: Duration::from_secs(env_parse(
                "SUBSCRIBE_RATE_WINDOW_SECS",
                60,
            )?),
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.auth.jwt_secret == DEV_SECRET
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("invalid {}: {}", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_values_use_defaults() {
        let value: u32 = env_parse("CRM_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
