//! Stateless HTTP request builder and response parser for the todo API.
//!
//! # Design
//! `TodoClient` holds only a `base_url`. Each operation is a `build_*`
//! method producing an `HttpRequest` and a `parse_*` method consuming the
//! matching `HttpResponse`:
//!
//! | operation | request              | success                |
//! |-----------|----------------------|------------------------|
//! | list      | `GET /todo/`         | 200 `{data: [Todo]}`   |
//! | create    | `POST /todo/`        | 201 `{message, id}`    |
//! | update    | `PUT /todo/{id}`     | 200 `{message}`        |
//! | delete    | `DELETE /todo/{id}`  | 200 `{message}`        |
//!
//! A 400 is surfaced as `ApiError::BadRequest` with the server's message;
//! any other unexpected status becomes `ApiError::HttpError`.

use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{CreateTodo, Created, ErrorBody, Message, Todo, TodoList, UpdateTodo};

#[derive(Debug, Clone)]
pub struct TodoClient {
    base_url: String,
}

impl TodoClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn build_list_todos(&self) -> HttpRequest {
        self.request(HttpMethod::Get, "/todo/", None)
    }

    pub fn build_create_todo(&self, input: &CreateTodo) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(input).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(self.request(HttpMethod::Post, "/todo/", Some(body)))
    }

    pub fn build_update_todo(&self, id: u64, input: &UpdateTodo) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(input).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(self.request(HttpMethod::Put, &format!("/todo/{id}"), Some(body)))
    }

    pub fn build_delete_todo(&self, id: u64) -> HttpRequest {
        self.request(HttpMethod::Delete, &format!("/todo/{id}"), None)
    }

    pub fn parse_list_todos(&self, response: HttpResponse) -> Result<Vec<Todo>, ApiError> {
        check_status(&response, 200)?;
        let list: TodoList = parse_body(&response)?;
        Ok(list.data)
    }

    /// Returns the id of the new todo.
    pub fn parse_create_todo(&self, response: HttpResponse) -> Result<u64, ApiError> {
        check_status(&response, 201)?;
        let created: Created = parse_body(&response)?;
        Ok(created.id)
    }

    pub fn parse_update_todo(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 200)?;
        parse_body::<Message>(&response)?;
        Ok(())
    }

    pub fn parse_delete_todo(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 200)?;
        parse_body::<Message>(&response)?;
        Ok(())
    }

    fn request(&self, method: HttpMethod, path: &str, body: Option<String>) -> HttpRequest {
        let headers = match body {
            Some(_) => vec![("content-type".to_string(), "application/json".to_string())],
            None => Vec::new(),
        };
        HttpRequest {
            method,
            path: format!("{}{path}", self.base_url),
            headers,
            body,
        }
    }
}

fn parse_body<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status == expected {
        return Ok(());
    }
    if response.status == 400 {
        let message = serde_json::from_str::<ErrorBody>(&response.body)
            .map(|body| body.message)
            .unwrap_or_else(|_| response.body.clone());
        return Err(ApiError::BadRequest(message));
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TodoClient {
        TodoClient::new("http://localhost:9000")
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn build_list_todos_produces_correct_request() {
        let req = client().build_list_todos();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:9000/todo/");
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn build_create_todo_produces_correct_request() {
        let req = client().build_create_todo(&CreateTodo::new("Buy milk")).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:9000/todo/");
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"title": "Buy milk"}));
    }

    #[test]
    fn build_update_todo_sends_both_fields() {
        let input = UpdateTodo {
            title: "Updated".to_string(),
            completed: true,
        };
        let req = client().build_update_todo(42, &input).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.path, "http://localhost:9000/todo/42");
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["title"], "Updated");
        assert_eq!(body["completed"], true);
    }

    #[test]
    fn build_delete_todo_produces_correct_request() {
        let req = client().build_delete_todo(7);
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.path, "http://localhost:9000/todo/7");
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_list_todos_unwraps_data() {
        let body = r#"{"data":[{"id":1,"title":"Test","completed":false,"created_at":"2023-11-14T22:13:20Z"}]}"#;
        let todos = client().parse_list_todos(response(200, body)).unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].title, "Test");
        assert_eq!(todos[0].created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parse_create_todo_returns_id() {
        let body = r#"{"message":"Todo created successfully","id":99}"#;
        let id = client().parse_create_todo(response(201, body)).unwrap();
        assert_eq!(id, 99);
    }

    #[test]
    fn parse_create_todo_bad_request_carries_message() {
        let body = r#"{"message":"title required"}"#;
        let err = client().parse_create_todo(response(400, body)).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "title required"));
    }

    #[test]
    fn parse_create_todo_wrong_status() {
        let err = client()
            .parse_create_todo(response(500, r#"{"message":"Failed to save todo"}"#))
            .unwrap_err();
        assert!(matches!(err, ApiError::HttpError { status: 500, .. }));
    }

    #[test]
    fn parse_update_and_delete_success() {
        let c = client();
        assert!(c
            .parse_update_todo(response(200, r#"{"message":"Todo updated successfully"}"#))
            .is_ok());
        assert!(c
            .parse_delete_todo(response(200, r#"{"message":"Todo deleted successfully"}"#))
            .is_ok());
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = TodoClient::new("http://localhost:9000/");
        let req = client.build_list_todos();
        assert_eq!(req.path, "http://localhost:9000/todo/");
    }

    #[test]
    fn parse_list_todos_bad_json() {
        let err = client().parse_list_todos(response(200, "not json")).unwrap_err();
        assert!(matches!(err, ApiError::DeserializationError(_)));
    }
}
