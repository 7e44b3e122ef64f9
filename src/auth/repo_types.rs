use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                     // unique user ID
    pub name: String,                 // display name
    pub email: String,                // user email, lowercased
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, empty for Google-only accounts
    #[serde(skip_serializing)]
    pub google_id: Option<String>,    // Google `sub` when linked
    pub created_at: OffsetDateTime,   // creation timestamp
    pub updated_at: OffsetDateTime,   // last profile change
}

impl User {
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}
