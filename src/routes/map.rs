use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::form_urlencoded;

use crate::{
    error::AppError,
    models::shipment::{LatLng, Shipment, ShipmentId},
    routes::dashboard::LOCATION_NOT_FOUND,
    services::store::Outcome,
    state::AppState,
};

/// Map centre when a shipment has no route yet.
pub const DEFAULT_CENTER: LatLng = LatLng { lat: 0.0, lng: 0.0 };
pub const ZOOM_LEVEL: u8 = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/shipment/:id/map", get(map_view))
        .route("/shipment/:id/location", post(update_location))
}

pub fn map_path(id: &ShipmentId) -> String {
    format!("/shipment/{}/map", path_segment(id.as_str()))
}

fn location_path(id: &ShipmentId) -> String {
    format!("/shipment/{}/location", path_segment(id.as_str()))
}

/// Percent-encodes an id as a single path segment. The form encoder writes
/// spaces as `+`, which a path would keep literally, and escapes a real `+`
/// as `%2B`, so swapping every `+` back to `%20` is exact.
fn path_segment(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// What the map draws for one shipment.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFrame {
    pub center: LatLng,
    pub marker: Option<LatLng>,
    pub polyline: Vec<LatLng>,
}

impl MapFrame {
    pub fn for_shipment(shipment: &Shipment) -> Self {
        let marker = shipment.current_position();
        Self {
            center: marker.unwrap_or(DEFAULT_CENTER),
            marker,
            polyline: shipment.route.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MapQuery {
    edit: Option<String>,
    missing: Option<String>,
}

impl MapQuery {
    fn flag(value: &Option<String>) -> bool {
        matches!(value.as_deref(), Some("1") | Some("true"))
    }
}

#[derive(Template)]
#[template(path = "map.html")]
struct MapTemplate {
    container_id: String,
    status: String,
    badge_class: String,
    location: String,
    location_label: String,
    eta: String,
    zoom: u8,
    center_json: String,
    marker_json: String,
    route_json: String,
    editing: bool,
    edit_href: String,
    form_action: String,
    show_notice: bool,
    notice: String,
}

impl MapTemplate {
    fn new(shipment: &Shipment, editing: bool) -> Result<Self, AppError> {
        let frame = MapFrame::for_shipment(shipment);
        Ok(Self {
            container_id: shipment.container_id.clone(),
            status: shipment.status.to_string(),
            badge_class: shipment.status.badge_class().to_string(),
            location: shipment.current_location.clone(),
            location_label: shipment.location_display().to_string(),
            eta: shipment.eta_display(),
            zoom: ZOOM_LEVEL,
            center_json: to_json(&frame.center)?,
            marker_json: to_json(&frame.marker)?,
            route_json: to_json(&frame.polyline)?,
            editing,
            edit_href: format!("{}?edit=1", map_path(&shipment.id)),
            form_action: location_path(&shipment.id),
            show_notice: false,
            notice: String::new(),
        })
    }

    fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.editing = true;
        self.show_notice = true;
        self.notice = notice.into();
        self
    }

    fn with_location(mut self, location: String) -> Self {
        self.location = location;
        self
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|err| AppError::Other(err.into()))
}

/// The page renders what the backend answered for this request, even when a
/// newer request kept the store from applying it.
fn settled(outcome: Outcome<Shipment>) -> Result<Shipment, AppError> {
    match outcome.into_result() {
        Ok(shipment) => Ok(shipment),
        Err(failure) if failure.not_found => Err(AppError::NotFound),
        Err(failure) => Err(AppError::Upstream(failure.message)),
    }
}

async fn map_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MapQuery>,
) -> Result<impl IntoResponse, AppError> {
    let id = ShipmentId::from(id);
    let shipment = settled(state.store.fetch_one(&id).await)?;

    let mut page = MapTemplate::new(&shipment, MapQuery::flag(&query.edit))?;
    if MapQuery::flag(&query.missing) {
        page = page.with_notice(LOCATION_NOT_FOUND);
    }
    Ok(AskamaTemplateResponse::into_response(page))
}

#[derive(Deserialize)]
struct LocationForm {
    #[serde(default)]
    location: String,
}

/// Geocodes the submitted name and appends it to the route. A miss sends
/// nothing to the backend and leaves the store as it was.
async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<LocationForm>,
) -> Result<Response, AppError> {
    let id = ShipmentId::from(id);
    let location = form.location.trim().to_string();
    let selected = state.store.selected().await.filter(|s| s.id == id);

    let Some(point) = state.geocoder.geocode(&location).await else {
        info!(%id, %location, "location update abandoned, no geocoding match");
        return match selected {
            Some(shipment) => {
                let page = MapTemplate::new(&shipment, true)?
                    .with_notice(LOCATION_NOT_FOUND)
                    .with_location(form.location);
                Ok((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    AskamaTemplateResponse::into_response(page),
                )
                    .into_response())
            }
            None => {
                let retry = format!("{}?edit=1&missing=1", map_path(&id));
                Ok(Redirect::to(&retry).into_response())
            }
        };
    };

    let shipment = match selected {
        Some(shipment) => shipment,
        None => settled(state.store.fetch_one(&id).await)?,
    };
    let route = shipment.route_with(point);
    let updated = settled(state.store.update_location(&id, location, route).await)?;
    info!(%id, points = updated.route.len(), "location updated");

    Ok(Redirect::to(&map_path(&id)).into_response())
}
