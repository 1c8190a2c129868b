use axum::http::{HeaderValue, Method, header};
use reelsync_core::crdt::{CrdtStorage, MemoryStorage, SqliteStorage};
use reelsync_server::{
    config::Config,
    router,
    sync::{SessionConfig, SessionRegistry},
};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting ReelSync Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("CORS origins: {:?}", config.cors_origins);

    // Open document storage
    let storage: Arc<dyn CrdtStorage> = match &config.database_path {
        Some(path) => match SqliteStorage::open(path) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                error!("Failed to open database: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("DATABASE_PATH not set, documents are kept in memory only");
            Arc::new(MemoryStorage::new())
        }
    };

    let registry = Arc::new(SessionRegistry::new(
        storage,
        SessionConfig::from(config.as_ref()),
    ));

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = if config.allows_any_origin() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        cors.allow_origin(AllowOrigin::list(origins))
    };

    // Build the router
    let app = router(registry.clone()).layer(cors);

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Start maintenance task
    let maintenance_registry = registry.clone();
    let maintenance_config = config.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(maintenance_config.maintenance_interval);
        loop {
            interval.tick().await;
            let unsaved = maintenance_registry.flush_dirty().await;
            if unsaved > 0 {
                warn!("{} sessions still have unsaved changes", unsaved);
            }
            let evicted = maintenance_registry
                .evict_idle(maintenance_config.session_idle_timeout)
                .await;
            debug!("Maintenance: evicted {} idle sessions", evicted.len());
        }
    });

    // Run server with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    registry.shutdown().await;
    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
