use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method, header};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use church_platform::config::Config;
use church_platform::notify::{broadcast, sms::ArkeselClient};
use church_platform::payments::momo::MomoClient;
use church_platform::{api, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("CHURCH_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();

    // Connect to Postgres and run migrations
    let pool = store::pool::connect(&cfg.database_url).await?;

    let valkey = store::valkey::connect(&cfg.valkey_url).await?;

    // First run: create the administrator
    store::bootstrap::run(&pool, &cfg.admin_email, cfg.admin_password.as_deref()).await?;

    let sms = Arc::new(ArkeselClient::new(&cfg.sms)?);
    let momo = Arc::new(MomoClient::new(&cfg.momo)?);

    let state = store::AppState {
        pool: pool.clone(),
        valkey,
        config: Arc::new(cfg.clone()),
        sms: sms.clone(),
        momo,
    };

    let shutdown = CancellationToken::new();
    let worker = if cfg.broadcast_interval_secs > 0 {
        Some(tokio::spawn(broadcast::run(
            pool,
            sms,
            Duration::from_secs(cfg.broadcast_interval_secs),
            shutdown.clone(),
        )))
    } else {
        tracing::info!("broadcast worker disabled");
        None
    };

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(api::router())
        .with_state(state)
        .layer(cors_layer(&cfg.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, "starting church platform");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    if let Some(worker) = worker {
        shutdown.cancel();
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "broadcast worker panicked");
        }
    }

    tracing::info!("church platform stopped");
    Ok(())
}

/// Credentialed CORS for the configured web origins. No origins means
/// same-origin only.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
