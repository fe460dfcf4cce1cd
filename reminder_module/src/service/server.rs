use std::net::{IpAddr, SocketAddr};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::task;
use tracing::info;

use super::config::ServiceConfig;
use super::handlers::{health, scheduler_callback, telegram_webhook};
use super::scheduler::{start_local_scheduler_thread, SchedulerControl};
use super::state::{build_backends, AppState};
use super::BoxError;

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/callback", post(scheduler_callback))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let backends = {
        let config = config.clone();
        task::spawn_blocking(move || build_backends(&config))
            .await
            .map_err(|err| -> BoxError { err.into() })??
    };

    let mut scheduler_control = match backends.local_scheduler {
        Some(scheduler) => start_local_scheduler_thread(
            scheduler,
            backends.state.assistant.clone(),
            config.local_scheduler_poll_interval,
        ),
        None => SchedulerControl::idle(),
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!(
        "reminder service listening on {} (timezone {})",
        addr,
        config.timezone.name()
    );

    let app = build_router(backends.state, config.inbound_body_max_bytes);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    scheduler_control.stop_and_join();
    serve_result?;
    Ok(())
}
