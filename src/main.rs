use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use telegram_executor::config::Config;
use telegram_executor::executions::Registry;
use telegram_executor::http::{self, AppState};
use telegram_executor::i18n;
use telegram_executor::telegram::Service;

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg.log_level);
    info!(service = %cfg.service_name, "starting");

    let catalog = match i18n::catalog() {
        Ok(catalog) => catalog,
        Err(err) => {
            error!(error = %err, "failed to load i18n");
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(Registry::new());
    let service = match Service::new(&cfg, catalog, registry) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!(error = %err, "failed to init telegram service");
            return ExitCode::FAILURE;
        }
    };

    let ready = Arc::new(AtomicBool::new(false));
    let state = AppState {
        service: service.clone(),
        ready: ready.clone(),
        default_timeout: cfg.execution_timeout,
        default_lang: cfg.lang.clone(),
    };
    let app = http::router(state, service.webhook_state());

    if let Err(err) = service.start().await {
        error!(error = %err, "failed to start telegram updates");
        return ExitCode::FAILURE;
    }
    ready.store(true, Ordering::SeqCst);

    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn(http::serve(cfg.http_addr(), app, shutdown.clone()));

    let mut exit = ExitCode::SUCCESS;
    tokio::select! {
        _ = shutdown_signal() => info!("shutdown requested"),
        result = &mut server => {
            match result {
                Ok(Err(err)) => error!(error = %err, "http server stopped"),
                Err(err) => error!(error = %err, "http server task failed"),
                Ok(Ok(())) => {}
            }
            exit = ExitCode::FAILURE;
        }
    }

    ready.store(false, Ordering::SeqCst);
    shutdown.cancel();
    let _ = tokio::time::timeout(cfg.shutdown_timeout, &mut server).await;
    service.stop().await;
    exit
}

fn init_tracing(log_level: &str) {
    let fallback = match log_level.trim().to_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
