use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod media;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::post_routes()
}
