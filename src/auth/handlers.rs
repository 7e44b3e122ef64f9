use axum::{
    extract::{rejection::JsonRejection, FromRef, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, GoogleCallbackQuery, LoginRequest, PublicUser, RegisterRequest, RegisterResponse},
        google::GoogleProfile,
        jwt::{AuthUser, JwtKeys},
        password::{hash_password, verify_password},
        repo::is_unique_violation,
        repo_types::User,
    },
    error::{ApiError, ApiResult},
    frontend::{found, Found},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
        .route("/auth/google", get(google_start))
        .route("/auth/google/callback", get(google_callback))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(payload) = payload?;
    let (Some(name), Some(email), Some(password)) = (
        non_blank(payload.name),
        non_blank(payload.email).map(|e| e.to_lowercase()),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::bad_request("Password too short"));
    }

    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let hash = hash_password(&password)?;
    let user = match User::create(&state.db, &name, &email, &hash).await {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => {
            warn!(%email, "email registered concurrently");
            return Err(ApiError::Conflict("User already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(payload) = payload?;
    let (Some(email), Some(password)) = (
        non_blank(payload.email).map(|e| e.to_lowercase()),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Email and password are required"));
    };

    let user = match User::find_by_email(&state.db, &email).await? {
        Some(u) => u,
        None => {
            warn!(%email, "login unknown email");
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    if !user.has_password() {
        warn!(user_id = %user.id, "password login on google-only account");
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    if !verify_password(&password, &user.password_hash)? {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        message: "Login successful".into(),
        token,
        user: user.into(),
    }))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(user)
}

#[instrument(skip(state))]
pub async fn google_start(State(state): State<AppState>) -> ApiResult<Found> {
    let keys = JwtKeys::from_ref(&state);
    let oauth_state = keys.sign_oauth_state()?;
    let url = state.google.authorize_url(&oauth_state)?;
    Ok(found(url))
}

/// Always answers with a redirect: success lands on `/auth-success?token=`,
/// anything else on `/login?error=oauth`.
#[instrument(skip(state, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<GoogleCallbackQuery>,
) -> Found {
    let failure = || found(format!("{}/login?error=oauth", state.config.public_base_url));

    if let Some(err) = query.error.as_deref() {
        warn!(error = %err, "google consent denied");
        return failure();
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        warn!("google callback without code or state");
        return failure();
    };

    let keys = JwtKeys::from_ref(&state);
    if let Err(e) = keys.verify_oauth_state(&oauth_state) {
        warn!(error = %e, "google callback with bad state");
        return failure();
    }

    let profile = match state.google.exchange_code(&code).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = ?e, "google code exchange failed");
            return failure();
        }
    };

    let user = match upsert_google_user(&state, &profile).await {
        Ok(u) => u,
        Err(e) => {
            error!(error = ?e, google_id = %profile.sub, "google user upsert failed");
            return failure();
        }
    };

    match keys.sign(&user) {
        Ok(token) => {
            info!(user_id = %user.id, "user logged in with google");
            found(format!(
                "{}/auth-success?token={}",
                state.config.public_base_url, token
            ))
        }
        Err(e) => {
            error!(error = %e, "jwt sign failed");
            failure()
        }
    }
}

/// Finds the account by Google id, links a verified email to an existing
/// account, or creates a Google-only account.
async fn upsert_google_user(state: &AppState, profile: &GoogleProfile) -> anyhow::Result<User> {
    if let Some(user) = User::find_by_google_id(&state.db, &profile.sub).await? {
        return Ok(user);
    }

    let email = profile
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| anyhow::anyhow!("google profile has no usable email"))?;

    if let Some(existing) = User::find_by_email(&state.db, &email).await? {
        if !profile.email_verified {
            anyhow::bail!("refusing to link unverified google email to existing account");
        }
        info!(user_id = %existing.id, "linking google identity to existing account");
        return User::link_google_id(&state.db, existing.id, &profile.sub).await;
    }

    User::create_from_google(&state.db, &profile.display_name(), &email, &profile.sub).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@bank.example.id"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@x.com"));
        assert!(!is_valid_email("a@nodot"));
    }

    #[test]
    fn public_user_hides_secrets() {
        let user = User {
            id: uuid::Uuid::new_v4(),
            name: "Dewi".into(),
            email: "dewi@example.com".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            google_id: Some("g-1".into()),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(json.contains("dewi@example.com"));
        assert!(json.contains("createdAt"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("g-1"));
    }
}
