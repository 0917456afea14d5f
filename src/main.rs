mod backend;
mod config;
mod context;
mod profile;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use backend::BackendError;
use backend::gotrue::{GoTrueFactory, build_http};
use backend::relay::FormRelay;
use backend::rest::{PostgrestStore, RestClient};
use config::{BackendConfig, PortalConfig};
use state::{AppState, Backend};

fn build_backend(backend: &BackendConfig, relay_url: Option<&str>) -> Result<Backend, BackendError> {
    let relay = match relay_url {
        Some(url) => Some(FormRelay::new(build_http(backend)?, url.to_owned())),
        None => None,
    };
    Ok(Backend {
        auth: Arc::new(GoTrueFactory::new(backend)?),
        store: Arc::new(PostgrestStore::new(RestClient::new(backend)?)),
        relay,
    })
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = PortalConfig::from_env();
    let port = config.port;

    let backend = match &config.backend {
        Ok(cfg) => match build_backend(cfg, config.form_relay_url.as_deref()) {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::error!(error = %e, "backend client init failed; serving setup instructions");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "backend not configured; serving setup instructions");
            None
        }
    };
    let state = AppState::new(config, backend);
    let _sweeper = state::spawn_session_sweeper(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "portal listening");
    axum::serve(listener, app).await.expect("server failed");
}
