use kogase_api::{
    AppState,
    application::commands::bootstrap_admin,
    config::{Config, StorageBackend},
    create_app,
};
use kogase_core::{
    Cache, MIGRATOR,
    adapters::{InMemoryCache, InMemoryStore, IpApiGeoLocator, PostgresStore, RedisCache},
    domain::auth_token::TokenIssuer,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const PROJECT_KEY_CACHE_CAPACITY: u64 = 10_000;
const CACHE_DEFAULT_TTL_SECONDS: u64 = 60;

async fn connect_store(config: &Config) -> Result<AppStateStore, Box<dyn std::error::Error + Send + Sync>> {
    match config.storage {
        StorageBackend::Memory => {
            warn!("KOGASE_STORAGE=memory: data lives in this process only");
            Ok(AppStateStore::Memory(Arc::new(InMemoryStore::new())))
        }
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            info!("Connected to Postgres");

            info!("Applying database migrations...");
            MIGRATOR.run(&pool).await?;
            info!("Migrations applied successfully.");

            Ok(AppStateStore::Postgres(Arc::new(PostgresStore::new(pool))))
        }
    }
}

enum AppStateStore {
    Memory(Arc<InMemoryStore>),
    Postgres(Arc<PostgresStore>),
}

async fn connect_cache(config: &Config) -> Arc<dyn Cache> {
    if let Some(url) = &config.redis_url {
        match RedisCache::new(url, &config.redis_namespace, CACHE_DEFAULT_TTL_SECONDS).await {
            Ok(cache) => {
                info!("Using Redis for the project key cache");
                return Arc::new(cache);
            }
            Err(e) => warn!("Redis unavailable ({}); falling back to the in-process cache", e),
        }
    }
    Arc::new(InMemoryCache::new(
        PROJECT_KEY_CACHE_CAPACITY,
        CACHE_DEFAULT_TTL_SECONDS,
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting Kogase API v{}...", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = match connect_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Database initialisation failed: {}", e);
            std::process::exit(1);
        }
    };

    let geo = match IpApiGeoLocator::new(&config.geolocation_url) {
        Ok(geo) => Arc::new(geo),
        Err(e) => {
            error!("Failed to build geolocation client: {}", e);
            std::process::exit(1);
        }
    };
    let cache = connect_cache(&config).await;
    let issuer = Arc::new(TokenIssuer::new(
        config.jwt_secret.as_bytes(),
        config.jwt_expires_in,
    ));

    let app_state = match store {
        AppStateStore::Memory(store) => AppState::with_store(store, geo, cache, issuer),
        AppStateStore::Postgres(store) => AppState::with_store(store, geo, cache, issuer),
    }
    .request_timeout(config.request_timeout)
    .cors_origins(config.cors_origins.clone());

    if config.uses_default_admin_credentials() {
        warn!("Using the built-in administrator credentials; set ADMIN_EMAIL and ADMIN_PASSWORD");
    }
    match bootstrap_admin(
        app_state.users.clone(),
        &config.admin_email,
        &config.admin_password,
    )
    .await
    {
        Ok(Some(admin)) => info!("Bootstrapped administrator {}", admin.email),
        Ok(None) => {}
        Err(e) => {
            error!("Failed to bootstrap administrator: {}", e);
            std::process::exit(1);
        }
    }

    let app = create_app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Kogase API listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap_or_else(|e| {
        panic!("Failed to bind to address {}: {}", addr, e);
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap_or_else(|e| {
        panic!("Server failed to run: {}", e);
    });
}
