use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::models::shipment::LatLng;

/// Place-name lookup. Every failure mode (no match, bad payload, transport
/// error, non-2xx) comes back as `None`; callers treat that as a soft miss.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, name: &str) -> Option<LatLng>;
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl Place {
    fn coordinates(&self) -> Option<LatLng> {
        let lat: f64 = self.lat.trim().parse().ok()?;
        let lng: f64 = self.lon.trim().parse().ok()?;
        (lat.is_finite() && lng.is_finite()).then(|| LatLng::new(lat, lng))
    }
}

#[derive(Clone)]
pub struct NominatimGeocoder {
    client: Client,
    search_url: Arc<Url>,
}

impl NominatimGeocoder {
    pub fn new(client: Client, base: &Url) -> Result<Self, url::ParseError> {
        let search_url = if base.path().ends_with('/') {
            base.join("search")?
        } else {
            Url::parse(&format!("{}/search", base.as_str().trim_end_matches('/')))?
        };
        Ok(Self {
            client,
            search_url: Arc::new(search_url),
        })
    }

    fn lookup_url(&self, name: &str) -> Url {
        let mut url = (*self.search_url).clone();
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("q", name);
        url
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, name: &str) -> Option<LatLng> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let url = self.lookup_url(name);
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(query = %name, "geocoding request failed: {err}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(query = %name, status = %response.status(), "geocoder answered with an error");
            return None;
        }
        let places: Vec<Place> = match response.json().await {
            Ok(places) => places,
            Err(err) => {
                warn!(query = %name, "geocoder payload could not be decoded: {err}");
                return None;
            }
        };

        let found = places.first().and_then(Place::coordinates);
        match found {
            Some(point) => debug!(query = %name, lat = point.lat, lng = point.lng, "geocoded"),
            None => debug!(query = %name, "no geocoding match"),
        }
        found
    }
}
