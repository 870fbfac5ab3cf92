//! Response envelope, routing and body helpers shared by the API Lambdas.

use lambda_http::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

type HandlerResult = Result<Response<Body>, lambda_http::Error>;

/// Envelope returned by every API endpoint: `{success, data?, error?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn respond<T: Serialize>(status: u16, payload: &T) -> HandlerResult {
    let body = serde_json::to_vec(payload)?;
    let response = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))?;
    Ok(response)
}

/// `data` wrapped in a successful envelope.
pub fn success_response<T: Serialize>(status: u16, data: T) -> HandlerResult {
    respond(status, &ApiResponse::ok(data))
}

pub fn error_response(status: u16, message: impl Into<String>) -> HandlerResult {
    respond(status, &ApiResponse::failure(message))
}

/// Map a library error onto its status code. Server-side failures are logged.
pub fn from_error(err: &crate::Error) -> HandlerResult {
    let status = err.status_code();
    if status >= 500 {
        error!(status, error = %err, "Request failed");
    }
    error_response(status, err.to_string())
}

/// Deserialize a JSON body.
///
/// The inner `Err` carries a ready 400 response for malformed or missing bodies.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<Result<T, Response<Body>>, lambda_http::Error> {
    let bytes = body.as_ref();
    if bytes.is_empty() {
        return error_response(400, "Request body is required").map(Err);
    }
    match serde_json::from_slice(bytes) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(e) => error_response(400, format!("Invalid request body: {}", e)).map(Err),
    }
}

/// Path segments below `resource`, or `None` when the path belongs to another resource.
///
/// The `/api` stage prefix is ignored, so `/api/products/abc` and `/products/abc`
/// both yield `["abc"]` for `products`.
pub fn route_segments<'a>(path: &'a str, resource: &str) -> Option<Vec<&'a str>> {
    let path = path.strip_prefix("/api").unwrap_or(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    if segments.next()? != resource {
        return None;
    }
    Some(segments.collect())
}

/// Deserialize the request body or return the 400 response from the handler.
///
/// ```ignore
/// let request: NewOrder = parse_body!(event.body());
/// ```
#[macro_export]
macro_rules! parse_body {
    ($body:expr) => {
        match shared::http::parse_json_body($body)? {
            Ok(parsed) => parsed,
            Err(rejected) => return Ok(rejected),
        }
    };
}

/// Unwrap a `shared::Result` or return the mapped error response from the handler.
#[macro_export]
macro_rules! try_service {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => return shared::http::from_error(&err),
        }
    };
}
