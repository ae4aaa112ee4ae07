use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::{backend::ShipmentBackend, geocoding::Geocoder, store::ShipmentStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: ShipmentStore,
    pub geocoder: Arc<dyn Geocoder>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn ShipmentBackend>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            config,
            store: ShipmentStore::new(backend),
            geocoder,
        }
    }
}
