//! TaskFlow user service

use taskflow_server::{app, routes::user_router, AppState, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = Service::User;
    let settings = app::bootstrap(service)?;

    let app = user_router(AppState::new(service));
    app::serve(service, &settings.server.addr(), app).await
}
