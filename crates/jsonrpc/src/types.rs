use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VERSION: &str = "2.0";

pub const ERR_PARSE: i64 = -32700;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Incoming call. The `jsonrpc` marker is not validated; a request without an
/// `id` is a notification and produces no response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Success response, or `None` when the request was a notification.
pub fn result_response(id: Option<Value>, result: Value) -> Option<Response> {
    let id = id?;
    Some(Response {
        jsonrpc: VERSION.to_string(),
        id: Some(id),
        result: Some(result),
        error: None,
    })
}

/// Error response, or `None` when the request was a notification.
pub fn error_response(id: Option<Value>, code: i64, message: impl Into<String>) -> Option<Response> {
    let id = id?;
    Some(Response {
        jsonrpc: VERSION.to_string(),
        id: Some(id),
        result: None,
        error: Some(ErrorObject {
            code,
            message: message.into(),
            data: None,
        }),
    })
}

pub fn method_not_found(id: Option<Value>) -> Option<Response> {
    error_response(id, ERR_METHOD_NOT_FOUND, "Method not found")
}

pub fn invalid_params(id: Option<Value>) -> Option<Response> {
    error_response(id, ERR_INVALID_PARAMS, "Invalid Params")
}

/// Parse errors are reported even without a request id; the id is the JSON
/// null marker.
pub fn parse_error(detail: impl Into<String>) -> Response {
    Response {
        jsonrpc: VERSION.to_string(),
        id: Some(Value::Null),
        result: None,
        error: Some(ErrorObject {
            code: ERR_PARSE,
            message: "Parse error".to_string(),
            data: Some(Value::String(detail.into())),
        }),
    }
}

pub fn is_batch(data: &[u8]) -> bool {
    data.iter()
        .copied()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| byte == b'[')
}

/// Splits a payload into its requests. A batch yields every element; a single
/// request yields one.
pub fn parse_requests(data: &[u8]) -> Result<(Vec<Request>, bool), serde_json::Error> {
    if is_batch(data) {
        let requests: Vec<Request> = serde_json::from_slice(data)?;
        Ok((requests, true))
    } else {
        let request: Request = serde_json::from_slice(data)?;
        Ok((vec![request], false))
    }
}
