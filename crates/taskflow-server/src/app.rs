//! Process wiring shared by the service binaries

use std::sync::Arc;

use axum::Router;
use taskflow_broker::{AmqpTransport, MemoryBroker, Transport};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{BrokerEngine, BrokerSettings, Service, Settings};
use crate::telemetry;

/// Load `.env`, read settings and install logging
pub fn bootstrap(service: Service) -> anyhow::Result<Settings> {
    dotenvy::dotenv().ok();
    let settings = Settings::load(service)?;
    telemetry::init(&settings.log_filter(service));
    Ok(settings)
}

/// Transport selected by `broker.engine`
pub fn transport(settings: &BrokerSettings) -> Arc<dyn Transport> {
    match settings.engine {
        BrokerEngine::Amqp => Arc::new(AmqpTransport::new(settings.url.clone())),
        BrokerEngine::Memory => Arc::new(MemoryBroker::new()),
    }
}

/// Bind `addr` and serve `app` until Ctrl-C
pub async fn serve(service: Service, addr: &str, app: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;

    info!("{} listening on {}", service.name(), addr);
    info!("Swagger UI: http://{}/swagger-ui/", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("{} stopped", service.name());
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler; run until killed
        std::future::pending::<()>().await;
    }
}
