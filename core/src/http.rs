//! HTTP transport types for the host-does-IO pattern.
//!
//! `TodoClient` builds `HttpRequest` values and parses `HttpResponse` values;
//! whoever holds the socket runs the round-trip in between. Keeping these as
//! plain owned data lets the same client drive a live server from a blocking
//! test, an async runtime or a recorded fixture.

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// An HTTP request described as plain data. `path` is the absolute URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// An HTTP response described as plain data, handed to `TodoClient::parse_*`.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}
