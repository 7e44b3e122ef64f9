use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

use crate::ai::prompts::PromptConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

/// Retry knobs for generative calls.
#[derive(Debug, Clone, Deserialize)]
pub struct AiRetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub frontend_dir: PathBuf,
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub google: GoogleConfig,
    pub gemini: GeminiConfig,
    pub scoring: ScoringConfig,
    pub upload: UploadConfig,
    pub ai_retry: AiRetryConfig,
    pub prompts: PromptConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Required keys that are
    /// absent or blank abort startup with the key name in the error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("missing required environment variable {key}"))
        };
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let trimmed = |key: &str, default: &str| or(key, default).trim().to_string();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let google_client_id = required("GOOGLE_CLIENT_ID")?;
        let google_client_secret = required("GOOGLE_CLIENT_SECRET")?;
        let gemini_api_key = required("GEMINI_API_KEY")?;

        let public_base_url = or("PUBLIC_BASE_URL", "http://localhost:3001")
            .trim_end_matches('/')
            .to_string();

        let jwt = JwtConfig {
            secret: jwt_secret,
            issuer: or("JWT_ISSUER", "fraudlens"),
            ttl_minutes: trimmed("JWT_TTL_MINUTES", "60")
                .parse()
                .context("JWT_TTL_MINUTES must be an integer")?,
        };

        let google = GoogleConfig {
            client_id: google_client_id,
            client_secret: google_client_secret,
            redirect_url: lookup("GOOGLE_REDIRECT_URL")
                .unwrap_or_else(|| format!("{public_base_url}/auth/google/callback")),
        };

        let gemini = GeminiConfig {
            api_key: gemini_api_key,
            model: or("GEMINI_MODEL", "gemini-1.5-flash"),
            base_url: or("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com")
                .trim_end_matches('/')
                .to_string(),
            temperature: trimmed("GEMINI_TEMPERATURE", "0.4")
                .parse()
                .context("GEMINI_TEMPERATURE must be a number")?,
            max_output_tokens: trimmed("GEMINI_MAX_OUTPUT_TOKENS", "1024")
                .parse()
                .context("GEMINI_MAX_OUTPUT_TOKENS must be an integer")?,
        };

        let scoring = ScoringConfig {
            url: or("SCORING_URL", "http://127.0.0.1:5000/predict"),
            timeout_secs: trimmed("SCORING_TIMEOUT_SECS", "120")
                .parse()
                .context("SCORING_TIMEOUT_SECS must be an integer")?,
        };

        let upload = UploadConfig {
            dir: PathBuf::from(or("UPLOAD_DIR", "uploads")),
            max_bytes: trimmed("MAX_UPLOAD_BYTES", "10485760")
                .parse()
                .context("MAX_UPLOAD_BYTES must be an integer")?,
        };

        let ai_retry = AiRetryConfig {
            max_attempts: trimmed("AI_MAX_ATTEMPTS", "3")
                .parse()
                .context("AI_MAX_ATTEMPTS must be an integer")?,
            delay_ms: trimmed("AI_RETRY_DELAY_MS", "2000")
                .parse()
                .context("AI_RETRY_DELAY_MS must be an integer")?,
            timeout_secs: trimmed("AI_TIMEOUT_SECS", "30")
                .parse()
                .context("AI_TIMEOUT_SECS must be an integer")?,
        };

        let mut prompts = PromptConfig::default();
        if let Some(language) = lookup("AI_RESPONSE_LANGUAGE").filter(|v| !v.trim().is_empty()) {
            prompts.language = language;
        }

        Ok(Self {
            database_url,
            host: or("APP_HOST", "0.0.0.0"),
            port: trimmed("APP_PORT", "3001")
                .parse()
                .context("APP_PORT must be a port number")?,
            public_base_url,
            frontend_dir: PathBuf::from(or("FRONTEND_DIR", "frontend")),
            shutdown_timeout_secs: trimmed("SHUTDOWN_TIMEOUT_SECS", "10")
                .parse()
                .context("SHUTDOWN_TIMEOUT_SECS must be an integer")?,
            jwt,
            google,
            gemini,
            scoring,
            upload,
            ai_retry,
            prompts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/fraudlens"),
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "client"),
            ("GOOGLE_CLIENT_SECRET", "client-secret"),
            ("GEMINI_API_KEY", "key"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<AppConfig> {
        AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.jwt.ttl_minutes, 60);
        assert_eq!(cfg.jwt.issuer, "fraudlens");
        assert_eq!(cfg.scoring.url, "http://127.0.0.1:5000/predict");
        assert_eq!(cfg.upload.max_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.ai_retry.max_attempts, 3);
        assert_eq!(
            cfg.google.redirect_url,
            "http://localhost:3001/auth/google/callback"
        );
    }

    #[test]
    fn missing_required_variable_names_the_key() {
        for key in [
            "DATABASE_URL",
            "JWT_SECRET",
            "GOOGLE_CLIENT_ID",
            "GOOGLE_CLIENT_SECRET",
            "GEMINI_API_KEY",
        ] {
            let mut env = base_env();
            env.remove(key);
            let err = load(&env).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
    }

    #[test]
    fn blank_required_variable_counts_as_missing() {
        let mut env = base_env();
        env.insert("JWT_SECRET", "   ");
        assert!(load(&env).is_err());
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut env = base_env();
        env.insert("APP_PORT", "not-a-port");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
    }

    #[test]
    fn public_base_url_trailing_slash_is_trimmed() {
        let mut env = base_env();
        env.insert("PUBLIC_BASE_URL", "https://fraud.example.com/");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.public_base_url, "https://fraud.example.com");
        assert_eq!(
            cfg.google.redirect_url,
            "https://fraud.example.com/auth/google/callback"
        );
    }
}
