//! TaskFlow notification service
//!
//! Consumes `TaskCreated` events and logs a simulated notification for each.

use std::sync::Arc;

use taskflow_broker::{ChannelRegistry, Connector, Consumer};
use taskflow_server::{
    app, notifier::TaskNotifier, routes::notification_router, AppState, BrokerHandle, Service,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = Service::Notification;
    let settings = app::bootstrap(service)?;

    let consumer = Consumer::new(settings.broker.queue.clone(), Arc::new(TaskNotifier::new()))
        .with_ack_policy(settings.broker.ack_policy);

    let registry = ChannelRegistry::new();
    let supervisor = Connector::new(
        app::transport(&settings.broker),
        registry.clone(),
        settings.broker.connector_config(),
    )
    .on_connected(Arc::new(consumer))
    .spawn();

    let state = AppState::new(service)
        .with_broker(BrokerHandle::new(registry, settings.broker.queue.clone()));

    let result = app::serve(service, &settings.server.addr(), notification_router(state)).await;
    supervisor.abort();
    result
}
