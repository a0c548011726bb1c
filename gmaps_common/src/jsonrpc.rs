//! JSON-RPC 2.0 helpers shared by the transport endpoint and the bridge.
//!
//! Payloads travel through the system as `serde_json::Value`; these helpers
//! keep the error-object construction and the handful of structural checks
//! in one place so both binaries emit identical wire shapes.

use serde_json::{Value, json};

/// Invalid JSON was received by the peer.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;
/// Server-defined: request rejected because no valid session was presented.
pub const BAD_SESSION: i32 = -32000;

/// Build a JSON-RPC error object.
///
/// `id` is `Value::Null` when the failing request's id is unknown (parse
/// failures, missing-session rejections).
pub fn error_object(code: i32, message: &str, id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message,
        },
        "id": id,
    })
}

/// Build a JSON-RPC success response for the given request id.
pub fn result_object(result: Value, id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

/// True if the message is an `initialize` request. Only this shape is
/// allowed to create a new session.
pub fn is_initialize_request(message: &Value) -> bool {
    message.get("method").and_then(Value::as_str) == Some("initialize")
        && message.get("id").is_some_and(|id| !id.is_null())
}

/// Extract the request id, treating `null` as absent (notification).
pub fn request_id(message: &Value) -> Option<Value> {
    match message.get("id") {
        Some(Value::Null) | None => None,
        Some(id) => Some(id.clone()),
    }
}

/// True if the message is a notification (no id), which expects no response.
pub fn is_notification(message: &Value) -> bool {
    message.get("method").is_some() && request_id(message).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_object_carries_code_message_and_id() {
        let err = error_object(BAD_SESSION, "Bad Request", json!(7));
        assert_eq!(err["jsonrpc"], "2.0");
        assert_eq!(err["error"]["code"], -32000);
        assert_eq!(err["error"]["message"], "Bad Request");
        assert_eq!(err["id"], 7);
    }

    #[test]
    fn error_object_allows_null_id() {
        let err = error_object(PARSE_ERROR, "Parse error", Value::Null);
        assert!(err["id"].is_null());
    }

    #[test]
    fn initialize_detection_requires_method_and_id() {
        assert!(is_initialize_request(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}
        })));
        // Notification form is not a valid initialize request.
        assert!(!is_initialize_request(&json!({
            "jsonrpc": "2.0", "method": "initialize"
        })));
        assert!(!is_initialize_request(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list"
        })));
    }

    #[test]
    fn request_id_treats_null_as_absent() {
        assert_eq!(request_id(&json!({"id": 3})), Some(json!(3)));
        assert_eq!(request_id(&json!({"id": "abc"})), Some(json!("abc")));
        assert_eq!(request_id(&json!({"id": null})), None);
        assert_eq!(request_id(&json!({})), None);
    }

    #[test]
    fn notification_has_method_but_no_id() {
        assert!(is_notification(
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        ));
        assert!(!is_notification(
            &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})
        ));
        // A bare response object is not a notification.
        assert!(!is_notification(&json!({"jsonrpc": "2.0", "id": 1, "result": {}})));
    }
}
