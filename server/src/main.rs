use tokio::net::TcpListener;

use drift_server::config::{generate_config_template, Config};
use drift_server::registry::Registry;
use drift_server::routes;
use drift_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "drift_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "drift_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("DRIFT signaling server v{} starting", env!("CARGO_PKG_VERSION"));

    // All state is in-memory; a restart forgets every token, queue entry
    // and room, and clients renegotiate from scratch.
    let registry = Registry::new(config.registry_config());
    registry.spawn_room_age_sweeper(config.sweep_interval());

    let app_state = AppState::new(registry);
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
