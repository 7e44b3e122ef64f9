//! Google OAuth 2.0 authorization-code flow.

use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::config::GoogleConfig;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Profile fields we read from the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
}

impl GoogleProfile {
    /// Falls back to the email's local part when Google sends no name.
    pub fn display_name(&self) -> String {
        match (&self.name, &self.email) {
            (Some(n), _) if !n.trim().is_empty() => n.trim().to_string(),
            (_, Some(e)) => e.split('@').next().unwrap_or(e).to_string(),
            _ => "Google user".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleOAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl GoogleOAuth {
    pub fn new(cfg: &GoogleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build google http client")?;
        Ok(Self {
            http,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_url: cfg.redirect_url.clone(),
        })
    }

    /// Consent screen URL asking for `profile` and `email`.
    pub fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let url = Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .context("build google authorize url")?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> anyhow::Result<GoogleProfile> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("google token request")?
            .error_for_status()
            .context("google token exchange rejected")?
            .json()
            .await
            .context("decode google token response")?;

        let profile: GoogleProfile = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("google userinfo request")?
            .error_for_status()
            .context("google userinfo rejected")?
            .json()
            .await
            .context("decode google userinfo")?;

        debug!(google_id = %profile.sub, "google profile fetched");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GoogleOAuth {
        GoogleOAuth::new(&GoogleConfig {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            redirect_url: "http://localhost:3001/auth/google/callback".into(),
        })
        .unwrap()
    }

    #[test]
    fn authorize_url_carries_client_redirect_and_state() {
        let url = Url::parse(&client().authorize_url("st@te").unwrap()).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "http://localhost:3001/auth/google/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "st@te");
        assert!(params["scope"].contains("email"));
        assert!(!url.as_str().contains("shh"));
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let p = GoogleProfile {
            sub: "1".into(),
            email: Some("budi@example.com".into()),
            email_verified: true,
            name: None,
        };
        assert_eq!(p.display_name(), "budi");

        let named = GoogleProfile { name: Some(" Budi S ".into()), ..p };
        assert_eq!(named.display_name(), "Budi S");
    }
}
