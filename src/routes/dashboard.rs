use std::{cmp::Ordering, fmt, str::FromStr};

use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tracing::{info, warn};
use url::form_urlencoded;

use crate::{
    error::AppError,
    models::shipment::{NewShipment, Shipment, Status},
    routes::map::map_path,
    services::store::ShipmentState,
    state::AppState,
};

pub const LOCATION_NOT_FOUND: &str = "Location not found!";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/shipments", post(add_shipment))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    ContainerId,
    CurrentLocation,
    Eta,
    Status,
}

impl SortColumn {
    pub const ALL: [SortColumn; 4] = [
        SortColumn::ContainerId,
        SortColumn::CurrentLocation,
        SortColumn::Eta,
        SortColumn::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortColumn::ContainerId => "containerID",
            SortColumn::CurrentLocation => "currentLocation",
            SortColumn::Eta => "eta",
            SortColumn::Status => "status",
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            SortColumn::ContainerId => "Container ID",
            SortColumn::CurrentLocation => "Location",
            SortColumn::Eta => "ETA",
            SortColumn::Status => "Status",
        }
    }

    fn key<'a>(&self, shipment: &'a Shipment) -> &'a str {
        match self {
            SortColumn::ContainerId => &shipment.container_id,
            SortColumn::CurrentLocation => &shipment.current_location,
            SortColumn::Eta => &shipment.eta,
            SortColumn::Status => shipment.status.as_str(),
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        SortColumn::ALL
            .into_iter()
            .find(|column| column.as_str() == raw)
            .ok_or_else(|| format!("unknown sort column: {raw}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortState {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl SortState {
    /// Same column flips direction; a different column starts ascending.
    pub fn toggled(self, column: SortColumn) -> Self {
        if self.column == column {
            Self {
                column,
                direction: self.direction.flipped(),
            }
        } else {
            Self {
                column,
                direction: SortDirection::Asc,
            }
        }
    }

    pub fn compare(&self, a: &Shipment, b: &Shipment) -> Ordering {
        let ordering = self.column.key(a).cmp(self.column.key(b));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Sort and filter selection for the table, carried in the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Listing {
    pub sort: SortState,
    pub filter: Option<Status>,
}

impl Listing {
    /// Sorted, then filtered. The input list is left untouched.
    pub fn apply(&self, shipments: &[Shipment]) -> Vec<Shipment> {
        let mut rows = shipments.to_vec();
        rows.sort_by(|a, b| self.sort.compare(a, b));
        if let Some(status) = self.filter {
            rows.retain(|shipment| shipment.status == status);
        }
        rows
    }

    fn href(&self, sort: SortState, form_open: bool) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("sort", sort.column.as_str())
            .append_pair("dir", sort.direction.as_str());
        if let Some(status) = self.filter {
            query.append_pair("status", status.as_str());
        }
        if form_open {
            query.append_pair("form", "open");
        }
        format!("/?{}", query.finish())
    }

    /// Where to land after a successful add: the same table view, form closed.
    fn location(&self) -> String {
        if *self == Listing::default() {
            "/".to_string()
        } else {
            self.href(self.sort, false)
        }
    }

    /// Unknown or missing values fall back to the defaults.
    fn parse(sort: Option<&str>, dir: Option<&str>, status: Option<&str>) -> Self {
        let column = sort.and_then(|raw| raw.parse().ok()).unwrap_or_default();
        let direction = match dir {
            Some("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        let filter = status
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| raw.parse().ok());
        Listing {
            sort: SortState { column, direction },
            filter,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    sort: Option<String>,
    dir: Option<String>,
    status: Option<String>,
    form: Option<String>,
}

impl DashboardQuery {
    fn listing(&self) -> Listing {
        Listing::parse(
            self.sort.as_deref(),
            self.dir.as_deref(),
            self.status.as_deref(),
        )
    }

    fn form_open(&self) -> bool {
        self.form.as_deref() == Some("open")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddShipmentForm {
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub current_location: String,
    #[serde(default)]
    pub eta: String,
    pub status: Option<String>,
    /// Table view the form was opened from, echoed back in hidden fields.
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

impl AddShipmentForm {
    fn status(&self) -> Status {
        self.status
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }

    fn listing(&self) -> Listing {
        Listing::parse(
            self.sort.as_deref(),
            self.dir.as_deref(),
            self.filter.as_deref(),
        )
    }

    fn is_complete(&self) -> bool {
        [&self.container_id, &self.current_location, &self.eta]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}

#[derive(Clone)]
struct ShipmentRow {
    container_id: String,
    current_location: String,
    eta: String,
    status: String,
    badge_class: String,
    map_href: String,
}

impl ShipmentRow {
    fn from_shipment(shipment: &Shipment) -> Self {
        Self {
            container_id: shipment.container_id.clone(),
            current_location: shipment.current_location.clone(),
            eta: shipment.eta_display(),
            status: shipment.status.to_string(),
            badge_class: shipment.status.badge_class().to_string(),
            map_href: map_path(&shipment.id),
        }
    }
}

#[derive(Clone)]
struct SortLink {
    heading: &'static str,
    href: String,
    active: bool,
    direction: &'static str,
}

#[derive(Clone)]
struct FilterOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    rows: Vec<ShipmentRow>,
    sort_links: Vec<SortLink>,
    filter_options: Vec<FilterOption>,
    sort_column: &'static str,
    sort_direction: &'static str,
    filter_value: &'static str,
    toggle_form_href: String,
    show_form: bool,
    form: AddShipmentForm,
    status_choices: Vec<FilterOption>,
    show_notice: bool,
    notice: String,
    show_store_error: bool,
    store_error: String,
}

impl DashboardTemplate {
    fn new(state: &ShipmentState, listing: Listing, show_form: bool) -> Self {
        let rows = listing
            .apply(&state.shipments)
            .iter()
            .map(ShipmentRow::from_shipment)
            .collect();
        let sort_links = SortColumn::ALL
            .into_iter()
            .map(|column| SortLink {
                heading: column.heading(),
                href: listing.href(listing.sort.toggled(column), show_form),
                active: listing.sort.column == column,
                direction: listing.sort.direction.as_str(),
            })
            .collect();
        let mut filter_options = vec![FilterOption {
            value: "",
            label: "All",
            selected: listing.filter.is_none(),
        }];
        filter_options.extend(Status::ALL.into_iter().map(|status| FilterOption {
            value: status.as_str(),
            label: status.as_str(),
            selected: listing.filter == Some(status),
        }));
        let (show_store_error, store_error) = match &state.error {
            Some(failure) => (
                true,
                format!("{} failed: {}", failure.operation, failure.message),
            ),
            None => (false, String::new()),
        };
        Self {
            rows,
            sort_links,
            filter_options,
            sort_column: listing.sort.column.as_str(),
            sort_direction: listing.sort.direction.as_str(),
            filter_value: listing.filter.map(|status| status.as_str()).unwrap_or(""),
            toggle_form_href: listing.href(listing.sort, !show_form),
            show_form,
            form: AddShipmentForm::default(),
            status_choices: status_choices(Status::default()),
            show_notice: false,
            notice: String::new(),
            show_store_error,
            store_error,
        }
    }

    fn with_form(mut self, form: AddShipmentForm, notice: impl Into<String>) -> Self {
        self.status_choices = status_choices(form.status());
        self.form = form;
        self.show_form = true;
        self.show_notice = true;
        self.notice = notice.into();
        self
    }
}

fn status_choices(current: Status) -> Vec<FilterOption> {
    Status::ALL
        .into_iter()
        .map(|status| FilterOption {
            value: status.as_str(),
            label: status.as_str(),
            selected: status == current,
        })
        .collect()
}

async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.store.fetch_all().await;
    let snapshot = state.store.snapshot().await;
    Ok(AskamaTemplateResponse::into_response(DashboardTemplate::new(
        &snapshot,
        query.listing(),
        query.form_open(),
    )))
}

async fn add_shipment(
    State(state): State<AppState>,
    Form(form): Form<AddShipmentForm>,
) -> Result<Response, AppError> {
    if !form.is_complete() {
        return Ok(render_form_error(
            &state,
            form,
            "Container ID, location and ETA are required.",
        )
        .await);
    }

    let Some(origin) = state.geocoder.geocode(form.current_location.trim()).await else {
        info!(location = %form.current_location, "add aborted, location not found");
        return Ok(render_form_error(&state, form, LOCATION_NOT_FOUND).await);
    };

    let draft = NewShipment::new(
        form.container_id.trim(),
        form.current_location.trim(),
        form.eta.trim(),
        form.status(),
        origin,
    );

    match state.store.add(&draft).await.into_result() {
        Ok(created) => {
            info!(id = %created.id, container = %created.container_id, "shipment added");
        }
        Err(failure) => {
            warn!(container = %draft.container_id, "shipment rejected by backend");
            let reason = failure.payload.unwrap_or(failure.message);
            return Ok(render_form_error(
                &state,
                form,
                format!("Shipment could not be saved: {reason}"),
            )
            .await);
        }
    }
    state.store.fetch_all().await;

    Ok(Redirect::to(&form.listing().location()).into_response())
}

async fn render_form_error(
    state: &AppState,
    form: AddShipmentForm,
    notice: impl Into<String>,
) -> Response {
    let snapshot = state.store.snapshot().await;
    let page = DashboardTemplate::new(&snapshot, form.listing(), true).with_form(form, notice);
    (
        StatusCode::BAD_REQUEST,
        AskamaTemplateResponse::into_response(page),
    )
        .into_response()
}
