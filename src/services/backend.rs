use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::models::shipment::{LocationUpdate, NewShipment, Shipment, ShipmentId};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("invalid backend url: {0}")]
    Url(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Status { status: 404, .. })
    }

    /// Body the backend sent along with a non-2xx answer, if any.
    pub fn rejection_payload(&self) -> Option<&str> {
        match self {
            BackendError::Status { body, .. } if !body.trim().is_empty() => Some(body),
            _ => None,
        }
    }
}

/// The REST surface the store talks to. Implemented over HTTP in
/// production and by in-memory fakes in tests.
#[async_trait]
pub trait ShipmentBackend: Send + Sync {
    async fn list(&self) -> Result<Vec<Shipment>, BackendError>;

    async fn get(&self, id: &ShipmentId) -> Result<Shipment, BackendError>;

    async fn create(&self, shipment: &NewShipment) -> Result<Shipment, BackendError>;

    async fn update_location(
        &self,
        id: &ShipmentId,
        update: &LocationUpdate,
    ) -> Result<Shipment, BackendError>;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Arc<Url>,
}

impl HttpBackend {
    pub fn new(client: Client, base: Url) -> Self {
        Self {
            client,
            base: Arc::new(base),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = (*self.base).clone();
        if segments.is_empty() {
            return Ok(url);
        }
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BackendError::Url(self.base.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn read<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let raw = response
            .bytes()
            .await
            .map_err(|source| BackendError::Transport {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_slice(&raw).map_err(|err| BackendError::Decode(err.to_string()))
    }

    /// Decodes each listed record on its own so one record in an unknown
    /// shape is skipped and logged instead of failing the whole list.
    fn decode_listed(record: serde_json::Value) -> Option<Shipment> {
        let id = record
            .get("_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<missing>")
            .to_string();
        match serde_json::from_value(record) {
            Ok(shipment) => Some(shipment),
            Err(err) => {
                warn!(%id, "skipping undecodable shipment record: {err}");
                None
            }
        }
    }

    fn transport(url: &Url) -> impl FnOnce(reqwest::Error) -> BackendError + '_ {
        move |source| BackendError::Transport {
            url: url.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ShipmentBackend for HttpBackend {
    async fn list(&self) -> Result<Vec<Shipment>, BackendError> {
        let url = self.endpoint(&[])?;
        debug!(%url, "listing shipments");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(Self::transport(&url))?;
        let records: Vec<serde_json::Value> = Self::read(&url, response).await?;
        Ok(records.into_iter().filter_map(Self::decode_listed).collect())
    }

    async fn get(&self, id: &ShipmentId) -> Result<Shipment, BackendError> {
        let url = self.endpoint(&[id.as_str()])?;
        debug!(%url, "fetching shipment");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(Self::transport(&url))?;
        Self::read(&url, response).await
    }

    async fn create(&self, shipment: &NewShipment) -> Result<Shipment, BackendError> {
        let url = self.endpoint(&[])?;
        debug!(%url, container = %shipment.container_id, "creating shipment");
        let response = self
            .client
            .post(url.clone())
            .json(shipment)
            .send()
            .await
            .map_err(Self::transport(&url))?;
        Self::read(&url, response).await
    }

    async fn update_location(
        &self,
        id: &ShipmentId,
        update: &LocationUpdate,
    ) -> Result<Shipment, BackendError> {
        let url = self.endpoint(&[id.as_str(), "update-location"])?;
        debug!(%url, points = update.route.len(), "updating shipment location");
        let response = self
            .client
            .post(url.clone())
            .json(update)
            .send()
            .await
            .map_err(Self::transport(&url))?;
        Self::read(&url, response).await
    }
}
