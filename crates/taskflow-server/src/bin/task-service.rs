//! TaskFlow task service
//!
//! Accepts tasks over HTTP and publishes a `TaskCreated` event for each one.
//! The broker connection is established in the background so the listener
//! comes up even while RabbitMQ is still starting.

use taskflow_broker::{ChannelRegistry, Connector};
use taskflow_server::{app, routes::task_router, AppState, BrokerHandle, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = Service::Task;
    let settings = app::bootstrap(service)?;

    let registry = ChannelRegistry::new();
    let supervisor = Connector::new(
        app::transport(&settings.broker),
        registry.clone(),
        settings.broker.connector_config(),
    )
    .spawn();

    let state = AppState::new(service)
        .with_broker(BrokerHandle::new(registry, settings.broker.queue.clone()));

    let result = app::serve(service, &settings.server.addr(), task_router(state)).await;
    supervisor.abort();
    result
}
