mod config;
mod error;
mod routes;
mod state;
mod terminal;

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use config::Config;
use state::AppState;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let log_level = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let addr = config.listen_addr();
    let state = AppState::new(config, CancellationToken::new());
    log::info!(
        "runtime `{}`, terminals run {} in {}x{}",
        state.docker.command_line(),
        state.config.terminal_shell,
        state.config.terminal_cols,
        state.config.terminal_rows
    );

    let sessions = state.sessions.clone();
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("berth listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        log::info!(
            "shutting down, closing {} terminal session(s)",
            sessions.len()
        );
        sessions.close_all();
    })
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
