mod api;
mod chat;
mod config;
mod controller;
mod session;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use config::ChatClientConfig;
use controller::ChatController;
use session::SessionStore;
use ui::app::ChatApp;

fn main() {
    if let Err(error) = run() {
        eprintln!("startup failed: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,innovug_chat=debug")),
        )
        .init();

    tracing::info!("INNOVUG chat client starting...");

    let config = ChatClientConfig::load();
    let api_base = config.resolve_api_base();
    tracing::info!("Backend API: {}", api_base);

    let api_client = ApiClient::new(api_base, config.request_timeout())?;
    let store = SessionStore::new(config.session_file_path());
    match store.path() {
        Some(path) => tracing::info!("Session file: {}", path.display()),
        None => tracing::warn!("No data directory available; session will not persist"),
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let controller = ChatController::new(
        config,
        Arc::new(api_client),
        runtime.handle().clone(),
        store,
    );

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([480.0, 720.0])
            .with_min_inner_size([360.0, 480.0])
            .with_title("INNOVUG"),
        ..Default::default()
    };

    let ui_result = eframe::run_native(
        "INNOVUG",
        native_options,
        Box::new(move |_cc| Ok(Box::new(ChatApp::new(runtime, controller)))),
    );

    if let Err(error) = ui_result {
        anyhow::bail!("UI error: {}", error);
    }

    Ok(())
}
