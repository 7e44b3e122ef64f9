pub mod dto;
pub mod export;
pub mod handlers;
pub mod ingest;
pub mod mapper;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::{config::UploadConfig, state::AppState};
use axum::Router;

pub fn router(upload: &UploadConfig) -> Router<AppState> {
    Router::new().nest("/api/transactions", handlers::transaction_routes(upload))
}
