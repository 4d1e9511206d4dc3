//! Request/response envelope shared by the router and the HTTP glue.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Decoded request body plus merged path placeholders.
pub type RequestData = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// Error envelope.
///
/// Serialized as
/// `{"status", "error": true, "message", "code", "details"?, "recovery_suggestions"?, "module_context"?}`.
/// Stack traces never appear here; they stay in the server-side error history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    error: bool,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recovery_suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_context: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: true,
            message: message.into(),
            code: code.into(),
            details: None,
            recovery_suggestions: Vec::new(),
            module_context: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.recovery_suggestions = suggestions;
        self
    }

    pub fn with_module_context(mut self, module: impl Into<String>) -> Self {
        self.module_context = Some(module.into());
        self
    }
}

/// Response envelope returned by every route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApiResponse {
    Data { status: u16, data: Value },
    Message { status: u16, message: String },
    Error(ErrorResponse),
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        ApiResponse::Data { status: 200, data }
    }

    pub fn data(status: u16, data: Value) -> Self {
        ApiResponse::Data { status, data }
    }

    pub fn message(status: u16, message: impl Into<String>) -> Self {
        ApiResponse::Message {
            status,
            message: message.into(),
        }
    }

    /// 202 acknowledgement for work handed to the task queue.
    pub fn queued(data: Value) -> Self {
        ApiResponse::Data { status: 202, data }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiResponse::Data { status, .. } | ApiResponse::Message { status, .. } => *status,
            ApiResponse::Error(err) => err.status,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ApiResponse::Error(_))
    }

    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            ApiResponse::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn data_value(&self) -> Option<&Value> {
        match self {
            ApiResponse::Data { data, .. } => Some(data),
            _ => None,
        }
    }
}

impl From<ErrorResponse> for ApiResponse {
    fn from(err: ErrorResponse) -> Self {
        ApiResponse::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("GET", HttpMethod::Get)]
    #[case("post", HttpMethod::Post)]
    #[case("Delete", HttpMethod::Delete)]
    fn methods_parse_case_insensitively(#[case] raw: &str, #[case] expected: HttpMethod) {
        assert_eq!(raw.parse::<HttpMethod>().unwrap(), expected);
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert_eq!(
            "BREW".parse::<HttpMethod>(),
            Err(UnknownMethod("BREW".to_string()))
        );
    }

    #[test]
    fn error_envelope_shape() {
        let resp: ApiResponse = ErrorResponse::new(404, "NOT_FOUND", "no route")
            .with_suggestions(vec!["check the path".to_string()])
            .into();

        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], 404);
        assert_eq!(v["error"], true);
        assert_eq!(v["code"], "NOT_FOUND");
        assert_eq!(v["recovery_suggestions"][0], "check the path");
        assert!(v.get("details").is_none());
        assert!(v.get("module_context").is_none());
    }

    #[test]
    fn success_envelopes_have_no_error_flag() {
        let v = serde_json::to_value(ApiResponse::ok(json!({"id": 1}))).unwrap();
        assert_eq!(v, json!({"status": 200, "data": {"id": 1}}));

        let v = serde_json::to_value(ApiResponse::message(200, "pong")).unwrap();
        assert_eq!(v, json!({"status": 200, "message": "pong"}));
    }
}
