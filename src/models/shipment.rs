use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(String);

impl ShipmentId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Client-side id handed to the backend on create. The backend may
    /// replace it; whatever it returns is the id the store keeps.
    pub fn provisional() -> Self {
        Self(Utc::now().timestamp_millis().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ShipmentId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "In Transit")]
    InTransit,
    #[serde(rename = "Delivered")]
    Delivered,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pending, Status::InTransit, Status::Delivered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::InTransit => "In Transit",
            Status::Delivered => "Delivered",
        }
    }

    pub fn badge_class(&self) -> &'static str {
        match self {
            Status::Delivered => "badge-success",
            Status::InTransit => "badge-info",
            Status::Pending => "badge-default",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == raw.trim())
            .ok_or_else(|| format!("unknown status: {raw}"))
    }
}

/// A geocoded point. The backend has been seen returning string-encoded
/// coordinates, so both forms decode; encoding is always numeric. Values that
/// are not finite are rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireLatLng")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[serde_as]
#[derive(Deserialize)]
struct WireLatLng {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    lat: f64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    lng: f64,
}

impl TryFrom<WireLatLng> for LatLng {
    type Error = String;

    fn try_from(wire: WireLatLng) -> Result<Self, Self::Error> {
        if wire.lat.is_finite() && wire.lng.is_finite() {
            Ok(LatLng::new(wire.lat, wire.lng))
        } else {
            Err(format!("coordinate out of range: {}, {}", wire.lat, wire.lng))
        }
    }
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    #[serde(rename = "_id")]
    pub id: ShipmentId,
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "currentLocation")]
    pub current_location: String,
    pub status: Status,
    pub eta: String,
    #[serde(default)]
    pub route: Vec<LatLng>,
}

impl Shipment {
    /// Last appended route point; stands in for the current position since
    /// `current_location` is only a place name.
    pub fn current_position(&self) -> Option<LatLng> {
        self.route.last().copied()
    }

    /// The existing route with `point` appended as the newest entry.
    pub fn route_with(&self, point: LatLng) -> Vec<LatLng> {
        let mut route = Vec::with_capacity(self.route.len() + 1);
        route.extend_from_slice(&self.route);
        route.push(point);
        route
    }

    pub fn eta_display(&self) -> String {
        format_eta(&self.eta)
    }

    pub fn location_display(&self) -> &str {
        let trimmed = self.current_location.trim();
        if trimmed.is_empty() {
            "Unknown"
        } else {
            trimmed
        }
    }
}

/// Create payload. Field names follow the backend's shipment shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewShipment {
    #[serde(rename = "_id")]
    pub id: ShipmentId,
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "currentLocation")]
    pub current_location: String,
    pub eta: String,
    pub status: Status,
    pub route: Vec<LatLng>,
}

impl NewShipment {
    pub fn new(
        container_id: impl Into<String>,
        current_location: impl Into<String>,
        eta: impl Into<String>,
        status: Status,
        origin: LatLng,
    ) -> Self {
        Self {
            id: ShipmentId::provisional(),
            container_id: container_id.into(),
            current_location: current_location.into(),
            eta: eta.into(),
            status,
            route: vec![origin],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationUpdate {
    pub location: String,
    pub route: Vec<LatLng>,
}

fn format_eta(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc).format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| trimmed.to_string())
}
