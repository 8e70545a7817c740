//! JSON wire format carried across the single `pybox_json_rpc` import.
//!
//! Request and response bodies are plain JSON objects rather than a custom
//! binary encoding, since the payload is always small (one call's worth of
//! positional/keyword arguments) and both sides already carry `serde_json`
//! for configuration and test fixtures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The body the guest sends for one `pybox_json_rpc` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, Value>,
}

/// The body the host writes back into guest memory on success (status 0)
/// or on a handled exception (status 2). Exactly one of the two fields is
/// present on the wire, mirroring the original handler's
/// `{"result": ...}` / `{"exception": "..."}` shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RpcResponse {
    Result { result: Value },
    Exception { exception: String },
}

impl RpcResponse {
    pub fn result(value: Value) -> Self {
        Self::Result { result: value }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception {
            exception: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let req = RpcRequest {
            args: vec![json!(1), json!("two")],
            kwargs: serde_json::Map::new(),
        };
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: RpcRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn request_defaults_empty() {
        let req: RpcRequest = serde_json::from_str("{}").unwrap();
        assert!(req.args.is_empty());
        assert!(req.kwargs.is_empty());
    }

    #[test]
    fn response_result_shape() {
        let resp = RpcResponse::result(json!({"ok": true}));
        let s = serde_json::to_string(&resp).unwrap();
        assert!(s.contains("\"result\""));
        assert!(!s.contains("\"exception\""));
    }

    #[test]
    fn response_exception_shape() {
        let resp = RpcResponse::exception("ValueError: boom");
        let s = serde_json::to_string(&resp).unwrap();
        assert!(s.contains("\"exception\""));
        let back: RpcResponse = serde_json::from_str(&s).unwrap();
        assert_eq!(back, resp);
    }
}
