use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engagement_service::config::{Config, StoreBackend};
use engagement_service::metrics;
use engagement_service::services::LogNotifier;
use engagement_service::state::AppState;
use engagement_service::workers::reconciliation;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn ready(state: web::Data<AppState>) -> impl Responder {
    match state.ping().await {
        Ok(()) => HttpResponse::Ok().body("READY"),
        Err(e) => HttpResponse::ServiceUnavailable().body(format!("store unavailable: {}", e)),
    }
}

async fn metrics_endpoint() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_state(config: &Config) -> Result<AppState> {
    match config.database.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(AppState::in_memory(Arc::new(LogNotifier), config))
        }
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL environment variable not set")?;

            // Disable prepared statement caching for PgBouncer transaction mode
            let statement_timeout = config.database.statement_timeout_ms.to_string();
            let connect_options = PgConnectOptions::from_str(url)
                .context("Failed to parse DATABASE_URL")?
                .statement_cache_capacity(0)
                .options([("statement_timeout", statement_timeout.as_str())]);

            let pg_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect_with(connect_options)
                .await
                .context("Failed to connect to database")?;

            sqlx::query("SELECT 1")
                .execute(&pg_pool)
                .await
                .context("Failed to verify database connection")?;
            info!("Database pool created and verified");

            sqlx::migrate!("./migrations")
                .run(&pg_pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database migrations completed");

            Ok(AppState::postgres(pg_pool, config))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.json_logs);

    info!("Starting engagement-service");
    info!(
        "Configuration loaded: env={}, http_port={}, backend={:?}",
        config.app.env, config.app.http_port, config.database.backend
    );

    let state = build_state(&config).await?;
    info!(
        personalization = config.feed.personalization,
        retry = config.retry.enabled,
        "Engagement services initialized"
    );

    let mut join_set = JoinSet::new();

    // Counter reconciliation background job
    let counters = state.counters.clone();
    let reconcile_config = config.reconciliation.clone();
    join_set.spawn(async move {
        reconciliation::start_counter_reconciliation(counters, reconcile_config).await;
        Ok(())
    });

    // HTTP health check and metrics server
    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    let http_state = web::Data::new(state.clone());
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(http_state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(ready))
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .disable_signals()
    .run();

    let server_handle = http_server.handle();
    join_set.spawn(async move {
        http_server
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
    });
    info!("HTTP server listening on http://{}", http_addr);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // Wait for a shutdown signal or for any task to fail
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            next = join_set.join_next() => match next {
                None => break,
                Some(Ok(Ok(()))) => info!("Task completed successfully"),
                Some(Ok(Err(e))) => {
                    tracing::error!("Task failed: {:#}", e);
                    return Err(e);
                }
                Some(Err(e)) => {
                    tracing::error!("Task panicked: {:#}", e);
                    return Err(anyhow::anyhow!("Task panicked: {}", e));
                }
            },
        }
    }

    server_handle.stop(true).await;
    join_set.abort_all();

    info!("engagement-service shutting down");
    Ok(())
}
