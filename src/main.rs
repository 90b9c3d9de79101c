use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use rollcall_server::config::Config;
use rollcall_server::routes::create_routes;
use rollcall_server::state::AppState;
use rollcall_server::store::{PgStore, ReadStore, WriteStore};

const SESSION_PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let config = Config::from_env();

    let primary = Arc::new(PgStore::connect(&config.database_url, config.max_db_connections).await?);
    tracing::info!("Successfully connected to primary database");

    sqlx::migrate!().run(primary.pool()).await?;
    tracing::info!("Migrations run successfully");

    let secondary: Option<Arc<dyn ReadStore>> = match &config.replica_database_url {
        Some(url) => {
            let replica =
                PgStore::connect_lazy(url, config.max_db_connections, config.store_timeout)?;
            tracing::info!("Secondary read replica configured");
            Some(Arc::new(replica))
        }
        None => {
            tracing::info!("No read replica configured, serving reads from primary");
            None
        }
    };

    let addr = config.bind_addr.clone();
    let writer: Arc<dyn WriteStore> = primary.clone();
    let state = AppState::new(config, writer, primary, secondary);

    state.limiter.spawn_sweeper();
    state.sessions.spawn_purger(SESSION_PURGE_INTERVAL);

    let app = create_routes(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Server running at http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
