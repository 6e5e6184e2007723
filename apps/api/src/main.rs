use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use schedule_cell::{
    EngineSettings, ExpirySweeper, InMemoryReservationStore, RedisReservationStore,
    ReservationStore, ScheduleState, SlotReservationEngine, SystemClock,
};
use shared_config::{AppConfig, StoreBackend};
use waitlist_cell::{
    InMemoryWaitlistRepository, RedisWaitlistRepository, SupabaseNotifier, TracingNotifier,
    WaitlistCoordinator, WaitlistNotifier, WaitlistRepository, WaitlistSettings, WaitlistState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Amae Clinic scheduling API server");

    let config = Arc::new(AppConfig::from_env());

    // Storage backends
    let (store, repository): (Arc<dyn ReservationStore>, Arc<dyn WaitlistRepository>) =
        match config.store_backend {
            StoreBackend::Redis => {
                info!("Using Redis-backed reservation store");
                (
                    Arc::new(RedisReservationStore::new(&config).await?),
                    Arc::new(RedisWaitlistRepository::new(&config).await?),
                )
            }
            StoreBackend::Memory => {
                info!("Using in-memory reservation store");
                (
                    Arc::new(InMemoryReservationStore::new()),
                    Arc::new(InMemoryWaitlistRepository::new()),
                )
            }
        };

    let notifier: Arc<dyn WaitlistNotifier> = if config.is_notification_sink_configured() {
        Arc::new(SupabaseNotifier::new(&config))
    } else {
        warn!("Supabase is not configured, waitlist offers will only be logged");
        Arc::new(TracingNotifier)
    };

    // Engine and waitlist wiring
    let clock = Arc::new(SystemClock);
    let engine = Arc::new(SlotReservationEngine::with_clock(
        store,
        clock.clone(),
        EngineSettings::from_config(&config),
    ));
    let coordinator = Arc::new(WaitlistCoordinator::new(
        repository,
        notifier,
        clock,
        WaitlistSettings::from_config(&config),
    ));
    engine.set_slot_freed_listener(coordinator.clone());

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::from_config(engine.clone(), &config).spawn(shutdown_rx.clone());
    let waitlist_expiry = tokio::spawn(coordinator.clone().run_expiry_loop(shutdown_rx));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(
        ScheduleState {
            config: config.clone(),
            engine: engine.clone(),
        },
        WaitlistState {
            config: config.clone(),
            engine,
            coordinator,
        },
    )
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
            .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
    )
    .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped, waiting for background tasks");
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("hold sweeper", sweeper), ("waitlist expiry", waitlist_expiry)] {
        if let Err(e) = handle.await {
            warn!("Background task {} ended abnormally: {}", name, e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
