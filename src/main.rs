use std::sync::Arc;

use shiptrack::config::AppConfig;
use shiptrack::error::AppError;
use shiptrack::routes::create_router;
use shiptrack::services::{backend::HttpBackend, geocoding::NominatimGeocoder};
use shiptrack::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let client = config.http_client()?;

    let backend = HttpBackend::new(client.clone(), config.backend_url.clone());
    let geocoder = NominatimGeocoder::new(client, &config.geocoder_url)
        .map_err(|err| AppError::Config(format!("invalid GEOCODER_URL: {err}")))?;
    info!(backend = %backend.base(), geocoder = %config.geocoder_url, "upstreams configured");

    let state = AppState::new(config.clone(), Arc::new(backend), Arc::new(geocoder));

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,shiptrack=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
