//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, InMemoryGeoCache, IntervalScheduler, IpRangeDatabase},
    config::Config,
    error::ApiError,
    web::{self, state::AppState, ApiDoc},
};
use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    Router,
};
use conversation_analytics_core::{
    ConversationService, GeoCache, GeoResolver, NonceValidator, RetentionSweeper, Scheduler,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, info_span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Geo Adapters and the Scheduler ---
    let ip_db = Arc::new(IpRangeDatabase::load(&config.ip_db_path)?);
    let geo_cache_store = Arc::new(InMemoryGeoCache::new(config.geo_cache_ttl));
    let scheduler = IntervalScheduler::new(config.retention_sweep_interval);

    // --- 4. Wire the Use Cases ---
    let nonces = NonceValidator::new(
        db_adapter.clone(),
        info_span!("nonce", module = "usecase.nonce"),
    );
    let conversations = Arc::new(ConversationService::new(
        db_adapter.clone(),
        nonces,
        GeoResolver::new(ip_db),
        GeoCache::new(
            geo_cache_store.clone(),
            info_span!("geo_cache", module = "usecase.geo_cache"),
        ),
        info_span!("conversation", module = "usecase.conversation"),
    ));
    let sweeper = RetentionSweeper::start(
        db_adapter,
        &scheduler,
        info_span!("stat_cron", module = "usecase.stat"),
    )?;
    scheduler.register("purge_geo_cache", geo_cache_store)?;

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        conversations,
        sweeper,
        config: config.clone(),
    });

    // --- 6. Create the Web Router ---
    let mut api_router = web::router(app_state);
    if let Some(origin) = &config.cors_allowed_origin {
        let origin = origin
            .parse::<HeaderValue>()
            .map_err(|e| ApiError::Internal(format!("Invalid CORS origin '{}': {}", origin, e)))?;
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]);
        api_router = api_router.layer(cors);
    }

    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
    })
    .await?;

    scheduler.shutdown();
    info!("Server stopped.");
    Ok(())
}
