use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_ttl_minutes: i64,
}

impl AuthConfig {
    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.jwt_secret.as_bytes())
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.jwt_secret.as_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

/// Staff roles. Anyone else is a public visitor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UserRole {
    Owner,
    Admin,
    Marketing,
    Analyst,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Owner => "owner",
            UserRole::Admin => "admin",
            UserRole::Marketing => "marketing",
            UserRole::Analyst => "analyst",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(UserRole::Owner),
            "admin" => Some(UserRole::Admin),
            "marketing" => Some(UserRole::Marketing),
            "analyst" => Some(UserRole::Analyst),
            _ => None,
        }
    }

    pub fn can_manage_crm(self) -> bool {
        matches!(self, UserRole::Owner | UserRole::Admin)
    }

    pub fn can_manage_subscribers(self) -> bool {
        matches!(
            self,
            UserRole::Owner | UserRole::Admin | UserRole::Marketing
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

pub fn issue_token(
    user_id: Uuid,
    role: UserRole,
    config: &AuthConfig,
) -> jsonwebtoken::errors::Result<String> {
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::minutes(config.session_ttl_minutes))
        .unwrap_or(now)
        .timestamp() as usize;
    let claims = SessionClaims {
        sub: user_id,
        role: role.as_str().to_string(),
        exp,
        iat: now.timestamp() as usize,
    };
    jsonwebtoken::encode(&Header::default(), &claims, &config.encoding_key())
}

pub fn decode_token(
    token: &str,
    config: &AuthConfig,
) -> jsonwebtoken::errors::Result<SessionClaims> {
    jsonwebtoken::decode::<SessionClaims>(token, &config.decoding_key(), &Validation::default())
        .map(|data| data.claims)
}

/// Claims carrying an unknown role yield `None`.
pub fn current_user(claims: &SessionClaims) -> Option<CurrentUser> {
    UserRole::from_str(&claims.role).map(|role| CurrentUser {
        user_id: claims.sub,
        role,
    })
}
