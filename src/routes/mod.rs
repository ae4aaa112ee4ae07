pub mod api;
pub mod dashboard;
pub mod map;

use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.config.static_dir);
    Router::new()
        .merge(dashboard::router())
        .merge(map::router())
        .nest("/api", api::router())
        .nest_service("/static", static_dir)
        .with_state(state)
}
