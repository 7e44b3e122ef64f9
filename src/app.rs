use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, frontend, transactions};

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();
    Router::new()
        .merge(auth::router())
        .merge(transactions::router(&config.upload))
        .merge(frontend::frontend_routes(&config.frontend_dir))
        .route("/api", get(|| async { "Welcome to the fraud detection API" }))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "connected" })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "database": "disconnected" })),
            )
        }
    }
}

pub async fn serve(app: Router, host: &str, port: u16, shutdown_timeout: Duration) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await
        .context("server error")?;

    tracing::info!("server stopped accepting connections");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Once it fires, in-flight requests get
/// `grace` to finish before the process exits anyway.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::error!(grace_secs = grace.as_secs(), "graceful shutdown timed out, forcing exit");
        std::process::exit(1);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtKeys;
    use crate::auth::repo_types::User;
    use axum::{body::Body, extract::FromRef, http::Request};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn api_banner() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::builder().uri("/api").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn batch_routes_require_a_token() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/transactions/batches")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["message"], "Not authorized, no token");
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let state = AppState::fake();
        let user = User {
            id: uuid::Uuid::new_v4(),
            name: "Rina".into(),
            email: "rina@example.com".into(),
            password_hash: String::new(),
            google_id: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let token = JwtKeys::from_ref(&state).sign(&user).unwrap();
        let tampered = format!("{}x", token);

        let res = build_app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/transactions/analyze/{}", uuid::Uuid::new_v4()))
                    .header("authorization", format!("Bearer {tampered}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_validates_before_touching_the_database() {
        let res = build_app(AppState::fake())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"A","email":"not-an-email","password":"longenough"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["message"], "Invalid email");
    }

    #[tokio::test]
    async fn malformed_json_gets_a_json_error() {
        let res = build_app(AppState::fake())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"A","email":"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let message = json_body(res).await["message"].as_str().unwrap().to_string();
        assert!(message.starts_with("Invalid JSON body"), "{message}");
    }

    #[tokio::test]
    async fn login_without_json_content_type_is_a_bad_request() {
        let res = build_app(AppState::fake())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/login")
                    .body(Body::from(r#"{"email":"a@b.co","password":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(res).await["message"].is_string());
    }

    #[tokio::test]
    async fn google_start_redirects_to_consent_screen() {
        let res = build_app(AppState::fake())
            .oneshot(Request::builder().uri("/auth/google").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        let location = res.headers()["location"].to_str().unwrap();
        assert!(location.starts_with("https://accounts.google.com/"));
        assert!(location.contains("state="));
    }

    #[tokio::test]
    async fn google_denial_lands_on_login() {
        let res = build_app(AppState::fake())
            .oneshot(
                Request::builder()
                    .uri("/auth/google/callback?error=access_denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(
            res.headers()["location"],
            "http://localhost:3001/login?error=oauth"
        );
    }

    #[tokio::test]
    async fn ai_health_reports_model() {
        let res = build_app(AppState::fake())
            .oneshot(
                Request::builder()
                    .uri("/api/transactions/ai-health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let v = json_body(res).await;
        assert_eq!(v["status"], "ok");
        assert_eq!(v["model"], "echo");
    }
}
