use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::Json;
use serde::de::DeserializeOwned;
use todo_core::service::parse_id;
use todo_core::{CreateTodo, Created, Message, TodoList, UpdateTodo};

use crate::error::{ApiError, Operation};
use crate::AppState;

const HOME_PAGE: &str = include_str!("../static/home.html");

pub async fn home() -> Html<&'static str> {
    Html(HOME_PAGE)
}

/// Bodies are read as JSON whatever their `Content-Type`.
fn json_body<T: DeserializeOwned>(op: Operation, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_body(op, e))
}

pub async fn fetch_todos(State(state): State<AppState>) -> Result<Json<TodoList>, ApiError> {
    let data = state
        .service
        .fetch_all()
        .await
        .map_err(|e| ApiError::new(Operation::Fetch, e))?;
    Ok(Json(TodoList { data }))
}

pub async fn create_todo(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let input: CreateTodo = json_body(Operation::Create, &body)?;
    let todo = state
        .service
        .create(input)
        .await
        .map_err(|e| ApiError::new(Operation::Create, e))?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Todo created successfully".to_string(),
            id: todo.id,
        }),
    ))
}

pub async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Message>, ApiError> {
    // The id is checked before the body so a bad id wins over a bad body.
    parse_id(&id).map_err(|e| ApiError::new(Operation::Update, e))?;
    let input: UpdateTodo = json_body(Operation::Update, &body)?;
    state
        .service
        .update(&id, input)
        .await
        .map_err(|e| ApiError::new(Operation::Update, e))?;
    Ok(Json(Message {
        message: "Todo updated successfully".to_string(),
    }))
}

pub async fn delete_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    state
        .service
        .delete(&id)
        .await
        .map_err(|e| ApiError::new(Operation::Delete, e))?;
    Ok(Json(Message {
        message: "Todo deleted successfully".to_string(),
    }))
}
