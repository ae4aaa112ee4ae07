use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use url::Url;

use crate::error::AppError;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000/api/shipments/";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub backend_url: Url,
    pub geocoder_url: Url,
    pub geocoder_user_agent: String,
    pub http_timeout: Option<Duration>,
    pub static_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let listen_addr: SocketAddr = lookup("APP_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let backend_url = parse_base_url(
            "BACKEND_URL",
            &lookup("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
        )?;
        let geocoder_url = parse_base_url(
            "GEOCODER_URL",
            &lookup("GEOCODER_URL").unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
        )?;

        let geocoder_user_agent = lookup("GEOCODER_USER_AGENT")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("shiptrack/{}", env!("CARGO_PKG_VERSION")));

        let http_timeout = match lookup("HTTP_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw.trim().parse().map_err(|err| {
                    AppError::Config(format!("invalid HTTP_TIMEOUT_SECS: {err}"))
                })?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        let static_dir = lookup("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("static"));

        Ok(Self {
            listen_addr,
            backend_url,
            geocoder_url,
            geocoder_user_agent,
            http_timeout,
            static_dir,
        })
    }

    pub fn http_client(&self) -> Result<reqwest::Client, AppError> {
        let mut builder = reqwest::Client::builder().user_agent(self.geocoder_user_agent.clone());
        if let Some(timeout) = self.http_timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|err| AppError::Config(format!("could not build http client: {err}")))
    }
}

/// Base URLs get a trailing slash so path segments append under them.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, AppError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|err| AppError::Config(format!("invalid {key}: {err}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Config(format!("invalid {key}: {raw} is not an http(s) base url")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
