//! TaskFlow Server - HTTP services for users, tasks and notifications
//!
//! Each binary in `src/bin` wires the pieces below together:
//! - `config`: layered settings per service
//! - `telemetry`: tracing subscriber setup
//! - `routes`: axum routers and handlers
//! - `notifier`: the `TaskCreated` handler used by the notification service

pub mod app;
pub mod config;
pub mod error;
pub mod notifier;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{Service, Settings};
pub use error::AppError;
pub use state::{AppState, BrokerHandle};
