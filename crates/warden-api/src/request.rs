//! Untyped request descriptions for the generic and raw code paths.

use crate::models::JoinDecision;
use reqwest::Method;
use serde_json::{json, Value};
use warden_types::GroupId;

/// A platform call described as data: method, path segments, JSON body.
///
/// Segments are percent-encoded individually when the URL is built, so ids
/// taken from remote payloads cannot alter the path structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Display form of the path, for logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// `GET /auth`, the pipeline token endpoint.
    pub fn auth_token() -> Self {
        Self::new(Method::GET, &["auth"])
    }

    /// `PUT /groups/{groupId}/requests/{userId}`.
    pub fn respond_join_request(group: &GroupId, user_id: &str, decision: JoinDecision) -> Self {
        Self::new(Method::PUT, &["groups", group.as_str(), "requests", user_id])
            .with_body(json!({ "action": decision.as_str() }))
    }

    /// `POST /groups/{groupId}/bans`.
    pub fn ban_member(group: &GroupId, user_id: &str) -> Self {
        Self::new(Method::POST, &["groups", group.as_str(), "bans"])
            .with_body(json!({ "userId": user_id }))
    }

    /// `DELETE /groups/{groupId}/members/{userId}`.
    pub fn kick_member(group: &GroupId, user_id: &str) -> Self {
        Self::new(Method::DELETE, &["groups", group.as_str(), "members", user_id])
    }
}
