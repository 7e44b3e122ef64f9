use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, warn};

use crate::{
    auth::{
        claims::{Claims, OAuthStateClaims, OAUTH_STATE_PURPOSE},
        dto::PublicUser,
        repo_types::User,
    },
    config::JwtConfig,
    error::ApiError,
    state::AppState,
};

const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.validate_aud = false;
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation
    }

    /// Signs a session token carrying `{id, email, name}`.
    pub fn sign(&self, user: &User) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation())?;
        debug!(user_id = %data.claims.id, "jwt verified");
        Ok(data.claims)
    }

    /// Short-lived token used as the OAuth `state` parameter.
    pub fn sign_oauth_state(&self) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(OAUTH_STATE_TTL.as_secs() as i64);
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let claims = OAuthStateClaims {
            nonce,
            purpose: OAUTH_STATE_PURPOSE.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_oauth_state(&self, state: &str) -> anyhow::Result<()> {
        let data = decode::<OAuthStateClaims>(state, &self.decoding, &self.validation())?;
        if data.claims.purpose != OAUTH_STATE_PURPOSE {
            anyhow::bail!("not an oauth state token");
        }
        Ok(())
    }
}

/// Authenticated caller, resolved from the bearer token to a live user row.
pub struct AuthUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Not authorized, no token"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Not authorized, no token"))?;

        let claims = match keys.verify(token) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                return Err(ApiError::unauthorized("Not authorized, token failed"));
            }
        };

        let user = match User::find_by_id(&state.db, claims.id).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!(user_id = %claims.id, "token for unknown user");
                return Err(ApiError::unauthorized("Not authorized, user not found"));
            }
            Err(e) => {
                error!(error = %e, user_id = %claims.id, "user lookup failed");
                return Err(ApiError::Internal(e));
            }
        };

        Ok(AuthUser(user.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn make_keys(secret: &str, issuer: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            ttl_minutes: 60,
        })
    }

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Sari".into(),
            email: "sari@example.com".into(),
            password_hash: String::new(),
            google_id: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn sign_and_verify_session_token() {
        let keys = make_keys("dev-secret", "test-issuer");
        let user = sample_user();
        let token = keys.sign(&user).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.id, user.id);
        assert_eq!(claims.email, "sari@example.com");
        assert_eq!(claims.name, "Sari");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn verify_rejects_other_secret_or_issuer() {
        let token = make_keys("secret-a", "iss").sign(&sample_user()).unwrap();
        assert!(make_keys("secret-b", "iss").verify(&token).is_err());
        assert!(make_keys("secret-a", "other-iss").verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let keys = make_keys("dev-secret", "iss");
        let past = OffsetDateTime::now_utc() - TimeDuration::hours(3);
        let claims = Claims {
            id: Uuid::new_v4(),
            email: "old@example.com".into(),
            name: "Old".into(),
            iat: past.unix_timestamp() as usize,
            exp: (past + TimeDuration::hours(1)).unix_timestamp() as usize,
            iss: "iss".into(),
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn oauth_state_round_trips_and_is_not_a_session() {
        let keys = make_keys("dev-secret", "iss");
        let state = keys.sign_oauth_state().unwrap();
        keys.verify_oauth_state(&state).expect("state verifies");
        assert!(keys.verify(&state).is_err());

        let session = keys.sign(&sample_user()).unwrap();
        assert!(keys.verify_oauth_state(&session).is_err());
    }
}
