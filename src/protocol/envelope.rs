//! Socket wire envelopes.
//!
//! One JSON text frame per request or response:
//!
//! ```text
//! → {"id": 7, "path": "/tags", "method": "GET", "values": {"pattern": "wor"}}
//! ← {"id": 7, "status": 200, "body": [...]}
//! ```
//!
//! `id` is the only correlation key. It is assigned by
//! [`RpcConnection`](crate::rpc::RpcConnection) at transmission time, so
//! envelopes are built with `id = 0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request method of a resource operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read a resource.
    Get,
    /// Create a resource.
    Post,
    /// Update a resource.
    Put,
    /// Delete a resource.
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Query value: a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    /// Single value (`pattern=wor`).
    One(String),
    /// Repeated value (`tag_id=1&tag_id=2`).
    Many(Vec<String>),
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        Self::One(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        Self::One(s)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(v: Vec<String>) -> Self {
        Self::Many(v)
    }
}

/// Outgoing request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique per connection.
    pub id: u64,
    /// Resource path relative to the user root (`/tags`, `/bookmarks/42`).
    pub path: String,
    /// Request method.
    pub method: Method,
    /// Query values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, QueryValue>,
    /// JSON body for POST/PUT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Request {
    /// Create a request without values or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: 0,
            path: path.into(),
            method,
            values: BTreeMap::new(),
            body: None,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Add a query value.
    #[must_use]
    pub fn value(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Incoming response envelope.
///
/// A non-200 `status` is an application-level error carried as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers.
    pub id: u64,
    /// HTTP-like status code.
    pub status: u16,
    /// Response payload.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Response {
    /// Whether the server reported success (status 200).
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_omits_empty_fields() {
        let mut req = Request::get("/tags");
        req.id = 3;
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({"id": 3, "path": "/tags", "method": "GET"}));
    }

    #[test]
    fn test_request_values_single_and_list() {
        let req = Request::get("/bookmarks")
            .value("url", vec!["http://example.com".to_string()])
            .value("shape", "flat");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json["values"],
            json!({"shape": "flat", "url": ["http://example.com"]})
        );
    }

    #[test]
    fn test_response_ignores_echoed_request_fields() {
        let text = r#"{"id": 9, "method": "GET", "path": "/tags", "status": 404, "body": {"message": "nope"}}"#;
        let resp: Response = serde_json::from_str(text).unwrap();
        assert_eq!(resp.id, 9);
        assert!(!resp.is_success());
        assert_eq!(resp.body["message"], "nope");
    }

    #[test]
    fn test_response_missing_body_is_null() {
        let resp: Response = serde_json::from_str(r#"{"id": 1, "status": 200}"#).unwrap();
        assert!(resp.is_success());
        assert!(resp.body.is_null());
    }
}
