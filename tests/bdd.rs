use std::{collections::HashMap, fmt, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use cucumber::{given, then, when, World as _};
use shiptrack::{
    config::AppConfig,
    models::shipment::{LatLng, LocationUpdate, NewShipment, Shipment, ShipmentId, Status},
    routes::create_router,
    services::{
        backend::{BackendError, ShipmentBackend},
        geocoding::Geocoder,
    },
    state::AppState,
};
use tower::ServiceExt;
use url::form_urlencoded;

#[derive(Default)]
struct FakeBackend {
    records: Mutex<Vec<Shipment>>,
    created: Mutex<Vec<NewShipment>>,
    updates: Mutex<Vec<(ShipmentId, LocationUpdate)>>,
    update_failure: Mutex<Option<(u16, String)>>,
}

fn not_found() -> BackendError {
    BackendError::Status {
        status: 404,
        body: "shipment not found".into(),
    }
}

#[async_trait]
impl ShipmentBackend for FakeBackend {
    async fn list(&self) -> Result<Vec<Shipment>, BackendError> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn get(&self, id: &ShipmentId) -> Result<Shipment, BackendError> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn create(&self, shipment: &NewShipment) -> Result<Shipment, BackendError> {
        self.created.lock().unwrap().push(shipment.clone());
        let mut records = self.records.lock().unwrap();
        let created = Shipment {
            id: ShipmentId::new(format!("srv-{}", records.len() + 1)),
            container_id: shipment.container_id.clone(),
            current_location: shipment.current_location.clone(),
            status: shipment.status,
            eta: shipment.eta.clone(),
            route: shipment.route.clone(),
        };
        records.push(created.clone());
        Ok(created)
    }

    async fn update_location(
        &self,
        id: &ShipmentId,
        update: &LocationUpdate,
    ) -> Result<Shipment, BackendError> {
        self.updates
            .lock()
            .unwrap()
            .push((id.clone(), update.clone()));
        if let Some((status, body)) = self.update_failure.lock().unwrap().clone() {
            return Err(BackendError::Status { status, body });
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(not_found)?;
        record.current_location = update.location.clone();
        record.route = update.route.clone();
        Ok(record.clone())
    }
}

#[derive(Default)]
struct FakeGeocoder {
    places: Mutex<HashMap<String, LatLng>>,
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn geocode(&self, name: &str) -> Option<LatLng> {
        self.places.lock().unwrap().get(name.trim()).copied()
    }
}

struct TestState {
    app: AppState,
    backend: Arc<FakeBackend>,
    geocoder: Arc<FakeGeocoder>,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    fn new() -> Self {
        let config = AppConfig::from_lookup(|_| None).expect("default config");
        let backend = Arc::new(FakeBackend::default());
        let geocoder = Arc::new(FakeGeocoder::default());
        let app = AppState::new(config, backend.clone(), geocoder.clone());
        Self {
            app,
            backend,
            geocoder,
        }
    }
}

#[derive(Debug)]
struct LastResponse {
    status: StatusCode,
    location: Option<String>,
    body: String,
}

#[derive(Debug, cucumber::World, Default)]
struct TrackerWorld {
    state: Option<TestState>,
    last: Option<LastResponse>,
    snapshot: Option<serde_json::Value>,
    seeded_routes: HashMap<String, Vec<LatLng>>,
}

impl TrackerWorld {
    fn test_state(&self) -> &TestState {
        self.state.as_ref().expect("tracker must be initialised first")
    }

    fn last(&self) -> &LastResponse {
        self.last.as_ref().expect("a request must have been sent")
    }

    fn backend_record(&self, id: &str) -> Shipment {
        self.test_state()
            .backend
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id.as_str() == id)
            .cloned()
            .expect("shipment exists in backend")
    }

    async fn store_json(&self) -> serde_json::Value {
        let snapshot = self.test_state().app.store.snapshot().await;
        serde_json::to_value(snapshot).expect("snapshot serialises")
    }

    async fn send(&mut self, request: Request<Body>) {
        let app = create_router(self.test_state().app.clone());
        let response = app.oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        self.last = Some(LastResponse {
            status,
            location,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    async fn get(&mut self, uri: &str) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        self.send(request).await;
    }

    async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) {
        let mut form = form_urlencoded::Serializer::new(String::new());
        for (key, value) in fields {
            form.append_pair(key, value);
        }
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.finish()))
            .expect("request");
        self.send(request).await;
    }
}

fn unescape(html: &str) -> String {
    html.replace("&#x2f;", "/")
        .replace("&#x27;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn row_order(body: &str, containers: &[&str]) -> Vec<usize> {
    containers
        .iter()
        .map(|container| {
            body.find(&format!(">{container}</a>"))
                .unwrap_or_else(|| panic!("row for {container} is rendered"))
        })
        .collect()
}

fn script_value<'a>(body: &'a str, name: &str) -> &'a str {
    let marker = format!("var {name} = ");
    let start = body.find(&marker).expect("map script present") + marker.len();
    let end = start + body[start..].find(';').expect("statement terminated");
    &body[start..end]
}

#[given("a fresh tracker")]
async fn given_fresh_tracker(world: &mut TrackerWorld) {
    world.state = Some(TestState::new());
    world.last = None;
    world.snapshot = None;
    world.seeded_routes.clear();
}

#[given(regex = r#"^the geocoder knows "([^"]+)" at (-?[\d.]+), (-?[\d.]+)$"#)]
async fn given_geocoder_knows(world: &mut TrackerWorld, name: String, lat: f64, lng: f64) {
    world
        .test_state()
        .geocoder
        .places
        .lock()
        .unwrap()
        .insert(name, LatLng::new(lat, lng));
}

#[given(
    regex = r#"^the backend holds shipment "([^"]+)" "([^"]+)" at "([^"]+)" due "([^"]+)" with status "([^"]+)"$"#
)]
async fn given_backend_holds(
    world: &mut TrackerWorld,
    id: String,
    container: String,
    location: String,
    eta: String,
    status: String,
) {
    let status: Status = status.parse().expect("known status");
    world
        .test_state()
        .backend
        .records
        .lock()
        .unwrap()
        .push(Shipment {
            id: ShipmentId::new(id),
            container_id: container,
            current_location: location,
            status,
            eta,
            route: Vec::new(),
        });
}

#[given(
    regex = r#"^shipment "([^"]+)" has route points (-?[\d.]+), (-?[\d.]+) and (-?[\d.]+), (-?[\d.]+)$"#
)]
async fn given_route_points(
    world: &mut TrackerWorld,
    id: String,
    lat1: f64,
    lng1: f64,
    lat2: f64,
    lng2: f64,
) {
    let route = vec![LatLng::new(lat1, lng1), LatLng::new(lat2, lng2)];
    {
        let state = world.test_state();
        let mut records = state.backend.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|s| s.id.as_str() == id)
            .expect("shipment exists in backend");
        record.route = route.clone();
    }
    world.seeded_routes.insert(id, route);
}

#[when(regex = r#"^I add a shipment "([^"]*)" at "([^"]*)" due "([^"]*)"$"#)]
async fn when_add_shipment(
    world: &mut TrackerWorld,
    container: String,
    location: String,
    eta: String,
) {
    world
        .post_form(
            "/shipments",
            &[
                ("container_id", container.as_str()),
                ("current_location", location.as_str()),
                ("eta", eta.as_str()),
            ],
        )
        .await;
}

#[when(
    regex = r#"^I add a shipment "([^"]*)" at "([^"]*)" due "([^"]*)" while sorted by "([^"]+)" "([^"]+)"$"#
)]
async fn when_add_shipment_sorted(
    world: &mut TrackerWorld,
    container: String,
    location: String,
    eta: String,
    sort: String,
    dir: String,
) {
    world
        .post_form(
            "/shipments",
            &[
                ("container_id", container.as_str()),
                ("current_location", location.as_str()),
                ("eta", eta.as_str()),
                ("sort", sort.as_str()),
                ("dir", dir.as_str()),
                ("filter", ""),
            ],
        )
        .await;
}

#[when("I open the dashboard")]
async fn when_open_dashboard(world: &mut TrackerWorld) {
    world.get("/").await;
}

#[when(regex = r#"^I open "([^"]+)"$"#)]
async fn when_open(world: &mut TrackerWorld, uri: String) {
    world.get(&uri).await;
    world.snapshot = Some(world.store_json().await);
}

#[given(regex = r"^the backend fails location updates with status (\d+)$")]
async fn given_update_failure(world: &mut TrackerWorld, status: u16) {
    *world.test_state().backend.update_failure.lock().unwrap() =
        Some((status, "storage offline".into()));
}

#[when(regex = r#"^I follow the "([^"]+)" column header$"#)]
async fn when_follow_header(world: &mut TrackerWorld, heading: String) {
    let body = world.last().body.clone();
    let label = format!(">{heading}</a>");
    let end = body.find(&label).expect("column header rendered");
    let href_start = body[..end].rfind("href=\"").expect("header is a link") + "href=\"".len();
    let href_end = href_start + body[href_start..].find('"').expect("closing quote");
    let href = unescape(&body[href_start..href_end]);
    world.get(&href).await;
}

#[when(regex = r#"^I submit the location "([^"]+)" for "([^"]+)"$"#)]
async fn when_submit_location(world: &mut TrackerWorld, location: String, id: String) {
    world
        .post_form(&format!("/shipment/{id}/location"), &[("location", location.as_str())])
        .await;
}

#[then(regex = r#"^I am redirected to "([^"]+)"$"#)]
async fn then_redirected(world: &mut TrackerWorld, target: String) {
    let last = world.last();
    assert!(last.status.is_redirection(), "status was {}", last.status);
    assert_eq!(last.location.as_deref(), Some(target.as_str()));
}

#[then(regex = r"^the response status is (\d+)$")]
async fn then_status(world: &mut TrackerWorld, status: u16) {
    assert_eq!(world.last().status.as_u16(), status);
}

#[then(regex = r#"^the page shows "([^"]+)"$"#)]
async fn then_page_shows(world: &mut TrackerWorld, text: String) {
    assert!(
        unescape(&world.last().body).contains(&text),
        "page does not contain {text:?}"
    );
}

#[then(regex = r#"^the page links to "([^"]+)"$"#)]
async fn then_page_links(world: &mut TrackerWorld, href: String) {
    let body = unescape(&world.last().body);
    assert!(body.contains(&format!("href=\"{href}\"")));
}

#[then(regex = r#"^the form still holds "([^"]+)"$"#)]
async fn then_form_holds(world: &mut TrackerWorld, value: String) {
    assert!(world.last().body.contains(&format!("value=\"{value}\"")));
}

#[then(regex = r#"^the backend received a shipment "([^"]+)" with status "([^"]+)"$"#)]
async fn then_backend_received(world: &mut TrackerWorld, container: String, status: String) {
    let created = world.test_state().backend.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].container_id, container);
    assert_eq!(created[0].status.as_str(), status);
    assert!(!created[0].id.as_str().is_empty());
}

#[then(regex = r"^that shipment's route is the single point (-?[\d.]+), (-?[\d.]+)$")]
async fn then_single_point(world: &mut TrackerWorld, lat: f64, lng: f64) {
    let created = world.test_state().backend.created.lock().unwrap().clone();
    assert_eq!(created[0].route, vec![LatLng::new(lat, lng)]);
}

#[then("the backend received no create request")]
async fn then_no_create(world: &mut TrackerWorld) {
    assert!(world.test_state().backend.created.lock().unwrap().is_empty());
}

#[then("the backend received no location update")]
async fn then_no_update(world: &mut TrackerWorld) {
    assert!(world.test_state().backend.updates.lock().unwrap().is_empty());
}

#[then(regex = r#"^the dashboard lists "([^"]+)"$"#)]
async fn then_dashboard_lists(world: &mut TrackerWorld, container: String) {
    row_order(&world.last().body, &[container.as_str()]);
}

#[then(regex = r"^the store holds (\d+) shipments$")]
async fn then_store_holds(world: &mut TrackerWorld, expected: usize) {
    let shipments = world.test_state().app.store.shipments().await;
    assert_eq!(shipments.len(), expected);
}

#[then(regex = r#"^the rows appear in order "([^"]+)"$"#)]
async fn then_rows_in_order(world: &mut TrackerWorld, order: String) {
    let containers: Vec<&str> = order.split(',').map(str::trim).collect();
    let positions = row_order(&world.last().body, &containers);
    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "rows are not in order {containers:?}"
    );
}

#[then(regex = r"^the table has (\d+) rows$")]
async fn then_table_rows(world: &mut TrackerWorld, expected: usize) {
    let rows = world.last().body.matches("class=\"shipment-row\"").count();
    assert_eq!(rows, expected);
}

#[then(regex = r#"^the backend route for "([^"]+)" has (\d+) points$"#)]
async fn then_route_len(world: &mut TrackerWorld, id: String, expected: usize) {
    assert_eq!(world.backend_record(&id).route.len(), expected);
}

#[then(regex = r#"^the first (\d+) points of "([^"]+)" are unchanged$"#)]
async fn then_prefix_unchanged(world: &mut TrackerWorld, count: usize, id: String) {
    let seeded = world.seeded_routes.get(&id).expect("route was seeded").clone();
    let route = world.backend_record(&id).route;
    assert_eq!(&route[..count], &seeded[..count]);
}

#[then(regex = r#"^the last point of "([^"]+)" is (-?[\d.]+), (-?[\d.]+)$"#)]
async fn then_last_point(world: &mut TrackerWorld, id: String, lat: f64, lng: f64) {
    let route = world.backend_record(&id).route;
    assert_eq!(route.last().copied(), Some(LatLng::new(lat, lng)));
}

#[then(regex = r#"^the store's selected shipment is at "([^"]+)"$"#)]
async fn then_selected_at(world: &mut TrackerWorld, location: String) {
    let selected = world
        .test_state()
        .app
        .store
        .selected()
        .await
        .expect("a shipment is selected");
    assert_eq!(selected.current_location, location);
    assert_eq!(selected.route.len(), 3);
}

#[then("the store is unchanged")]
async fn then_store_unchanged(world: &mut TrackerWorld) {
    let before = world.snapshot.clone().expect("snapshot taken on open");
    assert_eq!(world.store_json().await, before);
}

#[then(regex = r#"^the store still shows "([^"]+)" with (\d+) route points$"#)]
async fn then_store_still_shows(world: &mut TrackerWorld, location: String, points: usize) {
    let state = world.test_state().app.store.snapshot().await;
    let selected = state.shipment.expect("a shipment is selected");
    assert_eq!(selected.current_location, location);
    assert_eq!(selected.route.len(), points);
    let listed = state
        .shipments
        .iter()
        .filter(|s| s.id == selected.id)
        .all(|s| s.current_location == location && s.route.len() == points);
    assert!(listed, "listed entry was modified");
}

#[then(regex = r#"^the store recorded a failed "([^"]+)"$"#)]
async fn then_store_recorded_failure(world: &mut TrackerWorld, operation: String) {
    let state = world.store_json().await;
    assert_eq!(state["error"]["operation"], serde_json::json!(operation));
}

#[then(regex = r"^the map is centred on (-?[\d.]+), (-?[\d.]+)$")]
async fn then_map_centre(world: &mut TrackerWorld, lat: f64, lng: f64) {
    let center: LatLng =
        serde_json::from_str(script_value(&world.last().body, "center")).expect("centre json");
    assert_eq!(center, LatLng::new(lat, lng));
}

#[then(regex = r"^the map draws (\d+) route points$")]
async fn then_map_route(world: &mut TrackerWorld, expected: usize) {
    let route: Vec<LatLng> =
        serde_json::from_str(script_value(&world.last().body, "route")).expect("route json");
    assert_eq!(route.len(), expected);
}

#[tokio::main]
async fn main() {
    TrackerWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
