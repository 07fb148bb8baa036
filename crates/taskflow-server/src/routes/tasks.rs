//! Task endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use taskflow_types::{NewTask, PublishError, Task};
use tracing::info;

use crate::error::{ApiErrorBody, AppError};
use crate::state::AppState;

/// Create a task and announce it on the task queue.
///
/// The record is stored before publishing, so a 503 still leaves it
/// persisted.
#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = NewTask,
    responses(
        (status = 201, description = "Task created and event published", body = Task),
        (status = 400, description = "Malformed request body", body = ApiErrorBody),
        (status = 503, description = "Broker not connected", body = ApiErrorBody)
    )
)]
pub async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let Json(new_task) = body?;
    let task = state.tasks.insert_task(Task::new(new_task)).await?;

    let broker = state.broker.as_ref().ok_or(PublishError::Unavailable)?;
    broker.publisher.publish_json(&broker.queue, &task).await?;
    info!(task_id = %task.id, queue = %broker.queue, "Sent TaskCreated message");

    Ok((StatusCode::CREATED, Json(task)))
}

/// List all tasks
#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "All tasks, oldest first", body = Vec<Task>)
    )
)]
pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, AppError> {
    Ok(Json(state.tasks.list_tasks().await?))
}
