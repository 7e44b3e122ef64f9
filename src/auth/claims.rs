use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,       // user ID
    pub email: String,  // user email at sign time
    pub name: String,   // display name at sign time
    pub iat: usize,     // issued at (unix timestamp)
    pub exp: usize,     // expires at (unix timestamp)
    pub iss: String,    // issuer
}

/// Payload of the `state` parameter round-tripped through Google's consent screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthStateClaims {
    pub nonce: String,
    pub purpose: String,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
}

pub const OAUTH_STATE_PURPOSE: &str = "google_oauth_state";
