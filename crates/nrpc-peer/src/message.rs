use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result code: the call succeeded.
pub const SUCCESS: &str = "SUCCESS";
/// Result code: the service produced no value.
pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
/// Result code: the service failed without supplying its own code.
pub const RPC_ERROR: &str = "RPC_ERROR";
/// Result code: credentials or handshake state were rejected.
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// Message carried by a not-found response.
pub const RESOURCE_NOT_FOUND_MESSAGE: &str = "resource not found";

/// `REQ` frame body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

/// `RESP` frame body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: u32,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
}

impl Response {
    /// A successful response carrying `data`.
    pub fn success(id: u32, data: Value) -> Self {
        Self {
            id,
            code: SUCCESS.to_string(),
            data: Some(data),
            errmsg: None,
        }
    }

    /// A failed response.
    pub fn failure(id: u32, code: impl Into<String>, errmsg: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            data: None,
            errmsg: Some(errmsg.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS
    }
}

/// `AUTH_ACCEPT` frame body: the verdict on the receiver's credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthAccept {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
}

impl AuthAccept {
    pub fn success() -> Self {
        Self {
            code: SUCCESS.to_string(),
            errmsg: None,
        }
    }

    pub fn failed(errmsg: impl Into<String>) -> Self {
        Self {
            code: AUTH_FAILED.to_string(),
            errmsg: Some(errmsg.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS
    }
}
