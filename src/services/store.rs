use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    models::shipment::{LatLng, LocationUpdate, NewShipment, Shipment, ShipmentId},
    services::backend::{BackendError, ShipmentBackend},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    FetchAll,
    FetchOne,
    Add,
    UpdateLocation,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FetchAll => "fetch-all",
            Operation::FetchOne => "fetch-one",
            Operation::Add => "add",
            Operation::UpdateLocation => "update-location",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFailure {
    pub operation: Operation,
    pub message: String,
    /// Body returned by the backend alongside the rejection.
    pub payload: Option<String>,
    #[serde(skip)]
    pub not_found: bool,
}

impl StoreFailure {
    fn from_backend(operation: Operation, err: &BackendError) -> Self {
        Self {
            operation,
            message: err.to_string(),
            payload: err.rejection_payload().map(str::to_string),
            not_found: err.is_not_found(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShipmentState {
    pub shipments: Vec<Shipment>,
    pub shipment: Option<Shipment>,
    pub loading: bool,
    pub error: Option<StoreFailure>,
}

/// Result of a store operation.
#[derive(Debug)]
pub enum Outcome<T> {
    Fulfilled(T),
    Rejected(StoreFailure),
    /// A later request touching the same state was dispatched before this
    /// read settled. The backend's answer is handed back but was not applied.
    Discarded(Result<T, StoreFailure>),
}

impl<T> Outcome<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Outcome::Fulfilled(_))
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Outcome::Discarded(_))
    }

    pub fn fulfilled(self) -> Option<T> {
        match self {
            Outcome::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    /// What the backend answered, whether or not the store applied it.
    pub fn into_result(self) -> Result<T, StoreFailure> {
        match self {
            Outcome::Fulfilled(value) => Ok(value),
            Outcome::Rejected(failure) => Err(failure),
            Outcome::Discarded(answer) => answer,
        }
    }
}

/// Dispatch counter for one slot of [`ShipmentState`].
#[derive(Debug, Default)]
struct Generation(AtomicU64);

impl Generation {
    fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Generations {
    shipments: Generation,
    shipment: Generation,
}

/// Identity of one dispatched read. It goes stale once anything else that
/// writes the same slot is dispatched.
struct Ticket<'a> {
    slot: &'a Generation,
    issued: u64,
}

impl<'a> Ticket<'a> {
    fn issue(slot: &'a Generation) -> Self {
        Self {
            slot,
            issued: slot.advance(),
        }
    }

    fn is_stale(&self) -> bool {
        self.slot.current() != self.issued
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sole owner of the shipment list and the selected shipment. Views read
/// snapshots and dispatch the four operations below.
///
/// Reads are guarded by request identity: a fetch-all or fetch-one that is
/// overtaken by a later dispatch for the same slot settles as
/// [`Outcome::Discarded`] and leaves the state alone. Writes are always
/// applied. A request whose future is dropped never settles at all.
#[derive(Clone)]
pub struct ShipmentStore {
    backend: Arc<dyn ShipmentBackend>,
    state: Arc<RwLock<ShipmentState>>,
    in_flight: Arc<AtomicUsize>,
    generations: Arc<Generations>,
}

impl ShipmentStore {
    pub fn new(backend: Arc<dyn ShipmentBackend>) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(ShipmentState::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            generations: Arc::new(Generations::default()),
        }
    }

    pub async fn snapshot(&self) -> ShipmentState {
        let mut state = self.state.read().await.clone();
        state.loading = self.in_flight.load(Ordering::Acquire) > 0;
        state
    }

    pub async fn shipments(&self) -> Vec<Shipment> {
        self.state.read().await.shipments.clone()
    }

    pub async fn selected(&self) -> Option<Shipment> {
        self.state.read().await.shipment.clone()
    }

    pub async fn fetch_all(&self) -> Outcome<Vec<Shipment>> {
        let ticket = Ticket::issue(&self.generations.shipments);
        self.settle(Operation::FetchAll, Some(ticket), self.backend.list(), |state, list| {
            state.shipments = list.clone();
        })
        .await
    }

    pub async fn fetch_one(&self, id: &ShipmentId) -> Outcome<Shipment> {
        let ticket = Ticket::issue(&self.generations.shipment);
        self.settle(Operation::FetchOne, Some(ticket), self.backend.get(id), |state, shipment| {
            state.shipment = Some(shipment.clone());
        })
        .await
    }

    /// Stores the backend's representation of the new shipment. The backend
    /// id is authoritative; an entry already holding it is replaced.
    pub async fn add(&self, draft: &NewShipment) -> Outcome<Shipment> {
        self.generations.shipments.advance();
        self.settle(Operation::Add, None, self.backend.create(draft), |state, created| {
            match state.shipments.iter_mut().find(|s| s.id == created.id) {
                Some(existing) => *existing = created.clone(),
                None => state.shipments.push(created.clone()),
            }
        })
        .await
    }

    pub async fn update_location(
        &self,
        id: &ShipmentId,
        location: impl Into<String>,
        route: Vec<LatLng>,
    ) -> Outcome<Shipment> {
        let update = LocationUpdate {
            location: location.into(),
            route,
        };
        self.generations.shipments.advance();
        self.generations.shipment.advance();
        self.settle(
            Operation::UpdateLocation,
            None,
            self.backend.update_location(id, &update),
            |state, updated| {
                if let Some(existing) = state.shipments.iter_mut().find(|s| s.id == updated.id) {
                    *existing = updated.clone();
                }
                state.shipment = Some(updated.clone());
            },
        )
        .await
    }

    async fn settle<T, Fut, F>(
        &self,
        operation: Operation,
        ticket: Option<Ticket<'_>>,
        call: Fut,
        apply: F,
    ) -> Outcome<T>
    where
        Fut: Future<Output = Result<T, BackendError>>,
        F: FnOnce(&mut ShipmentState, &T),
    {
        let pending = InFlight::enter(&self.in_flight);
        let result = call.await;

        let mut state = self.state.write().await;
        drop(pending);

        if ticket.as_ref().is_some_and(|ticket| ticket.is_stale()) {
            debug!(%operation, "discarding response overtaken by a later request");
            return Outcome::Discarded(
                result.map_err(|err| StoreFailure::from_backend(operation, &err)),
            );
        }

        match result {
            Ok(value) => {
                apply(&mut *state, &value);
                state.error = None;
                info!(%operation, shipments = state.shipments.len(), "operation fulfilled");
                Outcome::Fulfilled(value)
            }
            Err(err) => {
                warn!(%operation, "operation rejected: {err}");
                let failure = StoreFailure::from_backend(operation, &err);
                state.error = Some(failure.clone());
                Outcome::Rejected(failure)
            }
        }
    }
}
