//! Platform API access for the Warden engine.
//!
//! Provides the [`PlatformClient`] with its typed, generic and raw code
//! paths, the [`SessionProvider`] collaborator contract, and the two seams
//! the rest of the engine programs against:
//!
//! - [`TokenSource`]: derives the push-connection token (used by
//!   `warden-bridge`).
//! - [`ModerationApi`]: group moderation calls (used by `warden-rules`).
//!
//! Both seams are traits so the bridge and rule engine can be exercised
//! without a network.

mod client;
mod models;
mod request;
mod session;

pub use client::{token_from_value, ApiConfig, PlatformClient};
pub use models::{JoinDecision, JoinRequest, MODERATION_PERMISSIONS};
pub use request::ApiRequest;
pub use session::{SessionProvider, StaticSession, AUTH_COOKIE_NAME};

use async_trait::async_trait;
use serde_json::Value;
use warden_exec::{ExecError, Strategy};
use warden_types::{GroupId, Subject};

/// Correlation key used for token derivation in logs.
pub const TOKEN_CORRELATION_KEY: &str = "pipeline-token";

/// Source of the push-connection credential.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn pipeline_token(&self) -> Result<String, ExecError>;
}

/// Group moderation calls, exposed per code path so callers can build
/// fallback chains.
#[async_trait]
pub trait ModerationApi: Send + Sync {
    /// Typed join-request response.
    async fn respond_join_request(
        &self,
        group: &GroupId,
        user_id: &str,
        decision: JoinDecision,
    ) -> Result<(), ExecError>;

    /// Typed ban.
    async fn ban_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError>;

    /// Typed removal of a member.
    async fn kick_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError>;

    /// Generic low-level request.
    async fn request(&self, req: &ApiRequest) -> Result<Value, ExecError>;

    /// Raw HTTP with the session cookie attached manually.
    async fn raw_request(&self, req: &ApiRequest) -> Result<Value, ExecError>;

    async fn pending_join_requests(&self, group: &GroupId) -> Result<Vec<JoinRequest>, ExecError>;

    async fn fetch_subject(&self, group: &GroupId, user_id: &str) -> Result<Subject, ExecError>;

    /// Groups the operator may moderate, straight from the platform.
    async fn moderated_groups(&self) -> Result<Vec<String>, ExecError>;
}

#[async_trait]
impl TokenSource for PlatformClient {
    /// Tries, in order: the dedicated token endpoint, a generic request to
    /// the same endpoint, the session cookie from the jar, and finally a raw
    /// credential-bearing HTTP call.
    async fn pipeline_token(&self) -> Result<String, ExecError> {
        let req = ApiRequest::auth_token();
        let strategies = vec![
            Strategy::new("token-endpoint", || self.auth_token()),
            Strategy::new("generic-request", || async {
                token_from_value(&self.request(&req).await?)
            }),
            Strategy::new("cookie-jar", || async {
                self.jar_auth_cookie().ok_or(ExecError::NoSession)
            }),
            Strategy::new("raw-http", || async {
                token_from_value(&self.raw_request(&req).await?)
            }),
        ];
        self.executor()
            .execute_with_fallback(strategies, TOKEN_CORRELATION_KEY)
            .await
    }
}

#[async_trait]
impl ModerationApi for PlatformClient {
    async fn respond_join_request(
        &self,
        group: &GroupId,
        user_id: &str,
        decision: JoinDecision,
    ) -> Result<(), ExecError> {
        PlatformClient::respond_join_request(self, group, user_id, decision).await
    }

    async fn ban_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError> {
        PlatformClient::ban_member(self, group, user_id).await
    }

    async fn kick_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError> {
        PlatformClient::kick_member(self, group, user_id).await
    }

    async fn request(&self, req: &ApiRequest) -> Result<Value, ExecError> {
        PlatformClient::request(self, req).await
    }

    async fn raw_request(&self, req: &ApiRequest) -> Result<Value, ExecError> {
        PlatformClient::raw_request(self, req).await
    }

    async fn pending_join_requests(&self, group: &GroupId) -> Result<Vec<JoinRequest>, ExecError> {
        PlatformClient::pending_join_requests(self, group).await
    }

    async fn fetch_subject(&self, group: &GroupId, user_id: &str) -> Result<Subject, ExecError> {
        PlatformClient::fetch_subject(self, group, user_id).await
    }

    async fn moderated_groups(&self) -> Result<Vec<String>, ExecError> {
        PlatformClient::moderated_groups(self).await
    }
}
