//! Static pages and assets for the browser client.

use std::path::Path;

use axum::{
    http::{header, HeaderName, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::AppState;

/// Route path and the file under `pages/` it serves.
const PAGES: [(&str, &str); 5] = [
    ("/login", "login.html"),
    ("/register", "register.html"),
    ("/dashboard", "index.html"),
    ("/auth-success", "auth-success.html"),
    ("/ai-chat", "ai-chat.html"),
];

/// Plain 302 redirect, what browsers and the OAuth flow expect.
pub type Found = (StatusCode, [(HeaderName, String); 1]);

pub fn found(location: impl Into<String>) -> Found {
    (StatusCode::FOUND, [(header::LOCATION, location.into())])
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: &'static str,
}

pub fn frontend_routes(dir: &Path) -> Router<AppState> {
    let pages = dir.join("pages");
    let mut router = Router::new()
        .route("/", get(|| async { found("/login") }))
        .route("/api/logout", post(logout))
        .nest_service("/css", ServeDir::new(dir.join("css")))
        .nest_service("/js", ServeDir::new(dir.join("js")))
        .nest_service("/pages", ServeDir::new(&pages));

    for (route, file) in PAGES {
        router = router.route_service(route, ServeFile::new(pages.join(file)));
    }
    router
}

/// Tokens are stateless; the client drops its copy.
pub async fn logout() -> Json<LogoutResponse> {
    Json(LogoutResponse {
        success: true,
        message: "Logout successful",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    fn app(dir: &Path) -> Router {
        frontend_routes(dir).with_state(AppState::fake())
    }

    #[tokio::test]
    async fn root_redirects_to_login() {
        let dir = tempfile::tempdir().unwrap();
        let res = app(dir.path())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()["location"], "/login");
    }

    #[tokio::test]
    async fn serves_pages_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pages")).unwrap();
        std::fs::write(dir.path().join("pages/index.html"), "<h1>dashboard</h1>").unwrap();

        let res = app(dir.path())
            .oneshot(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<h1>dashboard</h1>");
    }

    #[tokio::test]
    async fn logout_always_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let res = app(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["success"], true);
    }
}
