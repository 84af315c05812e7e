//! SongClash backend entrypoint wiring REST, WebSocket, SSE and the party store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songclash_back::{
    config::AppConfig,
    dao::party_store::memory::MemoryPartyStore,
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let mut builder = AppState::builder(config);
    if let Ok(seed) = env::var("SONGCLASH_SEED") {
        let seed = seed
            .parse::<u64>()
            .with_context(|| format!("SONGCLASH_SEED must be an unsigned integer, got `{seed}`"))?;
        info!(seed, "party randomness is seeded");
        builder = builder.seed(seed);
    }

    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
    let app_state = match backend.as_str() {
        "memory" => {
            info!("using the in-memory party store");
            builder.store(Arc::new(MemoryPartyStore::new())).build()
        }
        "mongo" => {
            let state = builder.build();
            spawn_mongo_supervisor(&state)?;
            state
        }
        other => bail!("unknown STORE_BACKEND `{other}` (expected `memory` or `mongo`)"),
    };

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Keep a MongoDB party store connected in the background; the app stays degraded until it is.
#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: &SharedState) -> anyhow::Result<()> {
    use songclash_back::{
        dao::party_store::{
            PartyStore,
            mongodb::{MongoConfig, MongoPartyStore},
        },
        dao::storage::StorageError,
        services::storage_supervisor,
    };

    info!("using the MongoDB party store");
    tokio::spawn(storage_supervisor::run(state.clone(), || async {
        let config = MongoConfig::from_env().await?;
        let store = MongoPartyStore::connect(config).await?;
        Ok::<_, StorageError>(Arc::new(store) as Arc<dyn PartyStore>)
    }));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: &SharedState) -> anyhow::Result<()> {
    bail!("STORE_BACKEND=mongo requires the `mongo-store` feature")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
