//! Host bridge server - main entry point.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostbridge_server::api::{client, websocket};
use hostbridge_server::settings::{BridgeMode, Settings};
use hostbridge_server::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hostbridge_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    tracing::info!(mode = ?settings.mode, "Starting host bridge");

    let app = App::new(settings);
    let shutdown = CancellationToken::new();
    let background = app.spawn_background(shutdown.clone());

    let outcome = match app.settings.mode.clone() {
        BridgeMode::Listen { host, ports } => {
            tokio::select! {
                result = websocket::serve_listeners(app.clone(), &host, &ports) => result,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
        BridgeMode::Connect { endpoint_url } => {
            let connect_shutdown = shutdown.clone();
            tokio::select! {
                result = client::run_connect_loop(app.clone(), &endpoint_url, connect_shutdown) => result,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    };

    tracing::info!("Shutting down");
    shutdown.cancel();
    let aborted = app.coordinator.abort_all("bridge shutting down").await;
    if aborted > 0 {
        tracing::warn!(aborted, "Aborted in-flight operations at shutdown");
    }
    for handle in background {
        let _ = handle.await;
    }
    outcome
}
