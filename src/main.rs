use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pawscan_admin::config::{Cli, Config, ANON_KEY_ENV, BACKEND_URL_ENV};
use pawscan_admin::routes;
use pawscan_admin::state::AppState;
use pawscan_admin::store::{DynStoreConnector, MemoryBackend, SupabaseConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli)?;
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    let connector: DynStoreConnector = if cli.demo {
        tracing::warn!("Demo mode: serving seeded in-memory data");
        Arc::new(MemoryBackend::seeded())
    } else {
        if !config.backend_configured() {
            anyhow::bail!(
                "No backend configured. Set backend.url and backend.anon_key in {}, \
                 export {} and {}, or run with --demo",
                data_dir.join("config.toml").display(),
                BACKEND_URL_ENV,
                ANON_KEY_ENV
            );
        }
        tracing::info!("Backend: {}", config.backend.url);
        Arc::new(SupabaseConnector::new(&config.backend, &config.tables)?)
    };

    let state = AppState::new(config.clone(), connector);
    let app = routes::build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
