//! Wire records exchanged with the hosted auth (`/auth/v1`) and row
//! (`/rest/v1`) endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Session, User, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct SignUpPayload {
    pub email: String,
    pub password: String,
    pub data: UserMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordGrant {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshGrant {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUserRecord {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<UserMetadata>,
}

impl From<AuthUserRecord> for User {
    fn from(record: AuthUserRecord) -> Self {
        User {
            id: record.id,
            email: record.email.unwrap_or_default(),
            name: record.user_metadata.and_then(|meta| meta.name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUserRecord,
}

impl TokenResponse {
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

/// Sign-up answers with a bare user when email confirmation is pending and
/// with a full token response when the project auto-confirms accounts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUserRecord),
}

/// Error bodies differ between the auth and row services; the first present
/// field wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or_else(|| match self.error {
                Some(Value::String(text)) => Some(text),
                _ => None,
            })
            .filter(|text| !text.trim().is_empty())
    }
}
