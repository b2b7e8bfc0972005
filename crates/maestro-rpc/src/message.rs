//! JSON-RPC 2.0 message construction and classification.

use serde_json::{json, Value};

/// Build a request object.
#[must_use]
pub fn request_message(id: i64, method: &str, params: Option<Value>) -> Value {
    let mut msg = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if let Some(params) = params {
        msg["params"] = params;
    }
    msg
}

/// Build a notification object (no id, no response expected).
#[must_use]
pub fn notification_message(method: &str, params: Option<Value>) -> Value {
    let mut msg = json!({"jsonrpc": "2.0", "method": method});
    if let Some(params) = params {
        msg["params"] = params;
    }
    msg
}

/// Build a response to a peer-initiated request.
#[must_use]
pub fn response_message(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// Build an error response to a peer-initiated request.
#[must_use]
pub fn error_message(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

/// A decoded inbound message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Has an `id` and no `method`: a reply to one of our requests.
    Response {
        /// The correlating request id.
        id: Value,
        /// The full response object (`result` or `error` inside).
        message: Value,
    },
    /// Has both `id` and `method`: the peer wants an answer from us.
    Request {
        /// The peer-chosen id (echoed back in our response).
        id: Value,
        /// Request method.
        method: String,
        /// Request params (`null` when absent).
        params: Value,
    },
    /// Has only `method`: fire-and-forget.
    Notification {
        /// Notification method.
        method: String,
        /// Notification params (`null` when absent).
        params: Value,
    },
    /// Neither `id` nor `method`: not JSON-RPC; dropped by the reader.
    Malformed(Value),
}

impl Incoming {
    /// Classify a decoded JSON object.
    #[must_use]
    pub fn classify(msg: Value) -> Self {
        let id = msg.get("id").cloned().filter(|v| !v.is_null());
        let method = msg
            .get("method")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), None) => Self::Response { id, message: msg },
            (Some(id), Some(method)) => Self::Request { id, method, params },
            (None, Some(method)) => Self::Notification { method, params },
            (None, None) => Self::Malformed(msg),
        }
    }
}
