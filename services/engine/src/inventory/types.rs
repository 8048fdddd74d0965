//! Sources inventory API payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authentication context forwarded with every inventory call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Forwarded `x-rh-identity` header
    pub identity_header: String,
    pub org_id: String,
    pub account_number: String,
}

/// Internal authentication, with the encrypted password exposed.
#[derive(Clone, Default, Deserialize)]
pub struct InternalAuthentication {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub authtype: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub extra: Value,
}

impl InternalAuthentication {
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Look up a string in `extra`, trying each path in turn.
    pub fn extra_str(&self, paths: &[&[&str]]) -> Option<String> {
        paths.iter().find_map(|path| {
            path.iter()
                .try_fold(&self.extra, |value, key| value.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

impl std::fmt::Debug for InternalAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalAuthentication")
            .field("id", &self.id)
            .field("authtype", &self.authtype)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchApplicationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_status_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchSourceRequest {
    pub availability_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticationCreateRequest {
    pub authtype: String,
    pub username: String,
    pub resource_type: String,
    pub resource_id: String,
    pub extra: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationAuthenticationCreateRequest {
    pub application_id: String,
    pub authentication_id: String,
}
