//! HTTP routers for the three services

pub mod health;
pub mod tasks;
pub mod users;

use axum::{
    routing::{get, post},
    Router,
};
use taskflow_types::{NewTask, NewUser, Task, TaskId, User, UserId, UserUpdate};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiErrorBody;
use crate::state::AppState;
use health::{BrokerStatus, HealthResponse};
use users::UserResponse;

// ==================== OpenAPI Documentation ====================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TaskFlow User Service",
        description = "User registry for TaskFlow",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3001", description = "Local development server")
    ),
    paths(
        health::root,
        health::health,
        users::create_user,
        users::list_users,
        users::get_user,
        users::update_user,
        users::delete_user,
    ),
    components(
        schemas(
            HealthResponse,
            BrokerStatus,
            User,
            UserId,
            NewUser,
            UserUpdate,
            UserResponse,
            ApiErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "users", description = "User management endpoints")
    )
)]
struct UserApiDoc;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TaskFlow Task Service",
        description = "Task intake for TaskFlow; publishes TaskCreated events",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3002", description = "Local development server")
    ),
    paths(
        health::root,
        health::health,
        tasks::create_task,
        tasks::list_tasks,
    ),
    components(
        schemas(HealthResponse, BrokerStatus, Task, TaskId, NewTask, ApiErrorBody)
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "tasks", description = "Task endpoints")
    )
)]
struct TaskApiDoc;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TaskFlow Notification Service",
        description = "Consumes TaskCreated events",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3003", description = "Local development server")
    ),
    paths(health::root, health::health),
    components(schemas(HealthResponse, BrokerStatus)),
    tags(
        (name = "health", description = "Health check endpoints")
    )
)]
struct NotificationApiDoc;

// ==================== Routers ====================

/// Routes every service exposes
fn common(openapi: utoipa::openapi::OpenApi) -> Router<AppState> {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .route("/", get(health::root))
        .route("/health", get(health::health))
}

pub fn user_router(state: AppState) -> Router {
    common(UserApiDoc::openapi())
        .route("/users", post(users::create_user).get(users::list_users))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn task_router(state: AppState) -> Router {
    common(TaskApiDoc::openapi())
        .route("/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn notification_router(state: AppState) -> Router {
    common(NotificationApiDoc::openapi())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
