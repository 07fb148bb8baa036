//! User endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use taskflow_types::{NewUser, StoreError, User, UserId, UserUpdate};
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ApiErrorBody, AppError};
use crate::state::AppState;

/// Status message plus the affected user
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub message: String,
    pub user: User,
}

impl UserResponse {
    fn new(message: &str, user: User) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            user,
        })
    }
}

fn not_found() -> AppError {
    StoreError::NotFound("User".to_string()).into()
}

/// Ids that do not parse cannot name a stored user
fn parse_id(raw: &str) -> Result<UserId, AppError> {
    raw.parse::<UserId>().map_err(|_| not_found())
}

/// Create a user
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Username or email missing", body = ApiErrorBody),
        (status = 409, description = "Email already registered", body = ApiErrorBody)
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let Json(new_user) = body?;
    let user = state.users.insert_user(new_user.into_user()?).await?;
    info!(user_id = %user.id, "User created");

    Ok((
        StatusCode::CREATED,
        UserResponse::new("User created successfully!", user),
    ))
}

/// List all users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    responses(
        (status = 200, description = "All users", body = Vec<User>)
    )
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.users.list_users().await?))
}

/// Get one user
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User details", body = User),
        (status = 404, description = "User not found", body = ApiErrorBody)
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let id = parse_id(&id)?;
    let user = state.users.get_user(&id).await?.ok_or_else(not_found)?;
    Ok(Json(user))
}

/// Update a user's username and/or email
#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    params(
        ("id" = String, Path, description = "User id")
    ),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 404, description = "User not found", body = ApiErrorBody),
        (status = 409, description = "Email already registered", body = ApiErrorBody)
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UserUpdate>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let Json(update) = body?;
    let user = state
        .users
        .update_user(&id, update)
        .await?
        .ok_or_else(not_found)?;
    info!(user_id = %id, "User updated");

    Ok(UserResponse::new("User updated successfully!", user))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User deleted", body = UserResponse),
        (status = 404, description = "User not found", body = ApiErrorBody)
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let user = state.users.delete_user(&id).await?.ok_or_else(not_found)?;
    info!(user_id = %id, "User deleted");

    Ok(UserResponse::new("User deleted successfully!", user))
}
