pub mod dto;
pub mod export;
pub mod form;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod password;
pub mod photo;
pub mod repo;
pub mod repo_types;
pub mod schema;
pub mod services;

use crate::state::AppState;
use axum::Router;

/// Admin user-management routes; the body limit follows the configured photo size.
pub fn router(photo_max_bytes: usize) -> Router<AppState> {
    Router::new().merge(handlers::routes(photo_max_bytes))
}
