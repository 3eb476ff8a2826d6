use crate::error::{MqError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Request method understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Method::Get),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-local identifier attached to every request for log and event correlation.
///
/// The wire protocol has no request identifiers, so this never leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A request bound for the broker.
///
/// Built through the operation constructors, which enforce a non-empty method and
/// a well-formed target.
///
/// # Examples
///
/// ```
/// use mq_client::{Method, Request};
///
/// let request = Request::publish("news", "hello").unwrap();
/// assert_eq!(request.method, Method::Put);
/// assert_eq!(request.target, "/topic/news");
/// assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    pub target: String,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>, body: Option<Vec<u8>>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            target: target.into(),
            body,
        }
    }

    /// `PUT /topic/<topic>` carrying `body`.
    pub fn publish(topic: &str, body: impl Into<Vec<u8>>) -> Result<Self> {
        validate_segment("topic", topic)?;
        Ok(Self::new(
            Method::Put,
            format!("/topic/{}", topic),
            Some(body.into()),
        ))
    }

    /// `GET /queue/<name>`.
    pub fn retrieve(name: &str) -> Result<Self> {
        validate_segment("client name", name)?;
        Ok(Self::new(Method::Get, format!("/queue/{}", name), None))
    }

    /// `PUT /subscription/<name>/<topic>`.
    pub fn subscribe(name: &str, topic: &str) -> Result<Self> {
        Ok(Self::new(Method::Put, subscription_target(name, topic)?, None))
    }

    /// `DELETE /subscription/<name>/<topic>`.
    pub fn unsubscribe(name: &str, topic: &str) -> Result<Self> {
        Ok(Self::new(
            Method::Delete,
            subscription_target(name, topic)?,
            None,
        ))
    }
}

fn subscription_target(name: &str, topic: &str) -> Result<String> {
    validate_segment("client name", name)?;
    validate_segment("topic", topic)?;
    Ok(format!("/subscription/{}/{}", name, topic))
}

/// Checks that `value` can be used as a single path segment of a target.
pub(crate) fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(MqError::Validation(format!("{} must not be empty", kind)));
    }
    if value
        .chars()
        .any(|c| c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(MqError::Validation(format!(
            "{} {:?} must not contain '/', whitespace or control characters",
            kind, value
        )));
    }
    Ok(())
}

/// A decoded broker response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: reason.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body of a 2xx response, or `RequestFailed` carrying the status line.
    pub fn into_result(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(MqError::RequestFailed {
                status: self.status,
                message: self.reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_targets() {
        let publish = Request::publish("news", "hi").unwrap();
        assert_eq!(publish.method, Method::Put);
        assert_eq!(publish.target, "/topic/news");
        assert_eq!(publish.body, Some(b"hi".to_vec()));

        let retrieve = Request::retrieve("alice").unwrap();
        assert_eq!(retrieve.method, Method::Get);
        assert_eq!(retrieve.target, "/queue/alice");
        assert!(retrieve.body.is_none());

        let subscribe = Request::subscribe("alice", "news").unwrap();
        assert_eq!(subscribe.method, Method::Put);
        assert_eq!(subscribe.target, "/subscription/alice/news");

        let unsubscribe = Request::unsubscribe("alice", "news").unwrap();
        assert_eq!(unsubscribe.method, Method::Delete);
        assert_eq!(unsubscribe.target, "/subscription/alice/news");
    }

    #[test]
    fn test_publish_with_empty_body_still_has_body() {
        let request = Request::publish("news", "").unwrap();
        assert_eq!(request.body, Some(Vec::new()));
    }

    #[test]
    fn test_invalid_segments_rejected() {
        for topic in ["", "a/b", "has space", "tab\there", "nl\n"] {
            let result = Request::publish(topic, "x");
            assert!(
                matches!(result, Err(MqError::Validation(_))),
                "topic {:?} should be rejected",
                topic
            );
        }

        assert!(matches!(
            Request::subscribe("", "news"),
            Err(MqError::Validation(_))
        ));
        assert!(matches!(
            Request::retrieve("bad/name"),
            Err(MqError::Validation(_))
        ));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = Request::retrieve("alice").unwrap();
        let b = Request::retrieve("alice").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_method_round_trip_names() {
        for method in [Method::Get, Method::Put, Method::Delete] {
            assert_eq!(Method::parse(method.as_str()), Some(method));
        }
        assert_eq!(Method::parse("POST"), None);
        assert_eq!(Method::parse("get"), None);
        assert_eq!(serde_json::to_string(&Method::Delete).unwrap(), "\"DELETE\"");
    }

    #[test]
    fn test_response_success_range() {
        assert!(Response::new(200, "OK", "").is_success());
        assert!(Response::new(204, "No Content", "").is_success());
        assert!(!Response::new(199, "Custom", "").is_success());
        assert!(!Response::new(300, "Multiple Choices", "").is_success());
        assert!(!Response::new(404, "Not Found", "").is_success());
    }

    #[test]
    fn test_response_into_result() {
        let body = Response::new(200, "OK", "hi").into_result().unwrap();
        assert_eq!(body, b"hi");

        match Response::new(404, "Not Found", "").into_result() {
            Err(MqError::RequestFailed { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "Not Found");
            }
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }
}
