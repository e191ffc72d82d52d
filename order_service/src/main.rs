// medflow-orders/src/main.rs

use medflow_orders::config::{AppConfig, LogFormat};
use medflow_orders::state::AppState;
use medflow_orders::web;

use actix_web::{web as actix_data, App, HttpServer};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE); // span close events carry durations
  match format {
    LogFormat::Json => builder.json().init(),
    LogFormat::Pretty => builder.init(),
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let app_config = AppConfig::from_env().map_err(|e| {
    eprintln!("Configuration error: {}", e);
    std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
  })?;
  init_tracing(app_config.log_format);
  tracing::info!("Starting medflow order service...");

  let app_state = AppState::from_config(app_config.clone()).await.map_err(|e| {
    tracing::error!(error = %e, "Failed to initialise application state.");
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
  })?;

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let worker = Arc::new(app_state.worker());
  let worker_handles = worker.spawn(app_config.task_workers, shutdown_rx);

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Binding server to {}...", server_address);

  let state_for_server = app_state.clone();
  let served = HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(state_for_server.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await;

  tracing::info!("HTTP server stopped, waiting for task workers.");
  let _ = shutdown_tx.send(true);
  for handle in worker_handles {
    if let Err(e) = handle.await {
      tracing::error!(error = %e, "Task worker ended abnormally.");
    }
  }
  served
}
