//! Wire protocol of the memory gateway.
//!
//! Newline-delimited JSON over a Unix domain socket, one request per
//! connection. Requests name a method, an optional collection and free
//! params; responses are `{ok, result}` or `{ok: false, error}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Responses above this size are refused.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// The five logical collections the gateway owns.
pub const COLLECTIONS: &[&str] = &[
    "knowledge",
    "fix_outcomes",
    "observations",
    "web_pages",
    "quarantine",
];

pub const DEFAULT_COLLECTION: &str = "knowledge";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            collection: None,
            params: None,
        }
    }

    pub fn with_collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn collection(&self) -> &str {
        self.collection.as_deref().unwrap_or(DEFAULT_COLLECTION)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// One search result returned by `query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    /// Cosine distance (lower is closer) for semantic hits; keyword hits
    /// report a pseudo-distance derived from rank order.
    pub distance: f64,
    #[serde(default)]
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_on_the_wire() {
        let req = Request::new("query")
            .with_collection("observations")
            .with_params(json!({"query": "timeout", "n_results": 5}));
        let line = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(back.method, "query");
        assert_eq!(back.collection(), "observations");
    }

    #[test]
    fn missing_collection_defaults_to_knowledge() {
        let req: Request = serde_json::from_str(r#"{"method":"count"}"#).unwrap();
        assert_eq!(req.collection(), DEFAULT_COLLECTION);
    }

    #[test]
    fn error_response_shape() {
        let resp = Response::failure("unknown method: frobnicate");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["ok"], false);
        assert!(value["error"].as_str().unwrap().contains("frobnicate"));
        assert!(value.get("result").is_none());
    }
}
