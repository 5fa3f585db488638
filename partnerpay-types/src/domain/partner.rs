//! Partner (merchant) identity consumed by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::DomainError;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

/// Unique identifier for a Partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct PartnerId(Uuid);

impl PartnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for PartnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PartnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PartnerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Input for registering a partner.
#[derive(Debug, Clone)]
pub struct NewPartner {
    pub name: String,
    pub email: String,
    pub webhook_url: Option<String>,
    pub rate_limit_per_minute: u32,
}

impl NewPartner {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name", "cannot be empty"));
        }
        if !self.email.contains('@') {
            return Err(DomainError::validation("email", "must be an email address"));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(DomainError::validation(
                "rate_limit_per_minute",
                "must be positive",
            ));
        }
        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(DomainError::validation(
                    "webhook_url",
                    "must be an http(s) URL",
                ));
            }
        }
        Ok(())
    }
}

/// A partner authorized to create and refund transactions.
///
/// Only the SHA-256 hash of the API key is kept; the raw key is shown once
/// at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: PartnerId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub is_active: bool,
    pub rate_limit_per_minute: u32,
    pub webhook_url: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
