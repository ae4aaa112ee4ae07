use axum::{extract::State, routing::get, Json, Router};

use crate::{services::store::ShipmentState, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/state", get(store_state))
}

/// Current store snapshot; dispatches nothing.
async fn store_state(State(state): State<AppState>) -> Json<ShipmentState> {
    Json(state.store.snapshot().await)
}
