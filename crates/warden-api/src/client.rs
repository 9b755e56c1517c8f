//! HTTP client for the platform API.
//!
//! Three code paths reach the same endpoints:
//!
//! - **typed** methods with request/response structs,
//! - the **generic** [`PlatformClient::request`] taking an [`ApiRequest`] and
//!   returning raw JSON through the shared cookie-jar client,
//! - the **raw** [`PlatformClient::raw_request`], a one-off client with the
//!   session cookie attached by hand.
//!
//! Callers combine them into fallback chains with `warden_exec::Strategy`.

use crate::models::{
    AuthTokenResponse, JoinDecision, JoinRequest, WireGroup, WireGroupMember, WireUser,
    WireUserGroup,
};
use crate::request::ApiRequest;
use crate::session::{SessionProvider, AUTH_COOKIE_NAME};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{COOKIE, RETRY_AFTER};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use warden_exec::{ExecError, Executor};
use warden_types::{GroupId, Subject};

/// Page size for paginated list endpoints.
const PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched for one list call.
const MAX_PAGES: usize = 20;

fn default_base_url() -> String {
    "https://api.vrchat.cloud/api/1".to_string()
}

fn default_user_agent() -> String {
    format!("warden/{} (group moderation)", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    15
}

/// Connection settings for the platform API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Serialize)]
struct RespondBody {
    action: JoinDecision,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BanBody<'a> {
    user_id: &'a str,
}

/// Platform API client. Cheap to share behind an `Arc`.
pub struct PlatformClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    config: ApiConfig,
    session: Arc<dyn SessionProvider>,
    executor: Executor,
}

impl std::fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformClient")
            .field("base", &self.base.as_str())
            .finish()
    }
}

impl PlatformClient {
    /// Builds a client and seeds its cookie jar from the session.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::Failed` if the base URL is invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(
        config: ApiConfig,
        session: Arc<dyn SessionProvider>,
        executor: Executor,
    ) -> Result<Self, ExecError> {
        // Segments are appended explicitly in `url_for`.
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| ExecError::Failed(format!("invalid api base url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ExecError::Failed(format!(
                "api base url cannot carry paths: {}",
                config.base_url
            )));
        }

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| ExecError::Failed(format!("failed to build http client: {e}")))?;

        let client = Self {
            http,
            jar,
            base,
            config,
            session,
            executor,
        };
        client.refresh_session_cookie();
        Ok(client)
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn session(&self) -> &Arc<dyn SessionProvider> {
        &self.session
    }

    /// Copies the session collaborator's cookie into the jar.
    pub fn refresh_session_cookie(&self) {
        if let Some(cookie) = self.session.auth_cookie() {
            self.jar.add_cookie_str(
                &format!("{AUTH_COOKIE_NAME}={cookie}; Path=/"),
                &self.base,
            );
        }
    }

    /// Reads the session cookie back out of the jar, including any value
    /// the platform rotated via `Set-Cookie`.
    pub fn jar_auth_cookie(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == AUTH_COOKIE_NAME && !value.is_empty()).then(|| value.to_string())
        })
    }

    fn url_for(&self, segments: &[String]) -> Result<Url, ExecError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ExecError::Failed("api base url cannot carry paths".to_string()))?
            .extend(segments);
        Ok(url)
    }

    fn url_for_parts(&self, segments: &[&str]) -> Result<Url, ExecError> {
        let owned: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
        self.url_for(&owned)
    }

    // ── typed path ──────────────────────────────────────────────────────

    /// `GET /auth`, decoded as the token response.
    pub async fn auth_token(&self) -> Result<String, ExecError> {
        let url = self.url_for_parts(&["auth"])?;
        let response: AuthTokenResponse = decode(send(self.http.get(url)).await?).await?;
        if response.token.is_empty() {
            return Err(ExecError::Decode("token endpoint returned an empty token".to_string()));
        }
        Ok(response.token)
    }

    pub async fn respond_join_request(
        &self,
        group: &GroupId,
        user_id: &str,
        decision: JoinDecision,
    ) -> Result<(), ExecError> {
        let url = self.url_for_parts(&["groups", group.as_str(), "requests", user_id])?;
        send(self.http.put(url).json(&RespondBody { action: decision })).await?;
        Ok(())
    }

    pub async fn ban_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError> {
        let url = self.url_for_parts(&["groups", group.as_str(), "bans"])?;
        send(self.http.post(url).json(&BanBody { user_id })).await?;
        Ok(())
    }

    pub async fn kick_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError> {
        let url = self.url_for_parts(&["groups", group.as_str(), "members", user_id])?;
        send(self.http.delete(url)).await?;
        Ok(())
    }

    /// Lists every pending join request of a group, following pagination.
    pub async fn pending_join_requests(&self, group: &GroupId) -> Result<Vec<JoinRequest>, ExecError> {
        let url = self.url_for_parts(&["groups", group.as_str(), "requests"])?;
        let mut requests = Vec::new();

        for page in 0..MAX_PAGES {
            let offset = page * PAGE_SIZE;
            let builder = self
                .http
                .get(url.clone())
                .query(&[("n", PAGE_SIZE), ("offset", offset)]);
            let batch: Vec<WireGroupMember> = decode(send(builder).await?).await?;
            let fetched = batch.len();
            requests.extend(batch.into_iter().filter_map(WireGroupMember::into_join_request));
            if fetched < PAGE_SIZE {
                break;
            }
        }

        Ok(requests)
    }

    /// Fetches a user's profile and, if they are a member, their join date.
    pub async fn fetch_subject(&self, group: &GroupId, user_id: &str) -> Result<Subject, ExecError> {
        let url = self.url_for_parts(&["users", user_id])?;
        let user: WireUser = decode(send(self.http.get(url)).await?).await?;

        let member_url = self.url_for_parts(&["groups", group.as_str(), "members", user_id])?;
        let member_since = match send(self.http.get(member_url)).await {
            Ok(response) => decode::<WireGroupMember>(response)
                .await
                .ok()
                .and_then(|m| m.joined_at),
            Err(ExecError::NotFound(_)) => None,
            Err(e) => {
                tracing::debug!(group = %group, user_id, error = %e, "membership lookup failed");
                None
            }
        };

        Ok(user.into_subject(member_since))
    }

    async fn fetch_group(&self, group_id: &str) -> Result<WireGroup, ExecError> {
        let url = self.url_for_parts(&["groups", group_id])?;
        decode(send(self.http.get(url)).await?).await
    }

    /// Returns the ids of groups where the operator holds a moderation
    /// permission.
    pub async fn moderated_groups(&self) -> Result<Vec<String>, ExecError> {
        let user_id = self.session.user_id().ok_or(ExecError::NoSession)?;
        let url = self.url_for_parts(&["users", user_id.as_str(), "groups"])?;
        let memberships: Vec<WireUserGroup> = decode(send(self.http.get(url)).await?).await?;

        let mut moderated = Vec::new();
        let mut looked_up = 0usize;
        let mut failures = 0usize;
        let mut last_failure = None;
        for membership in &memberships {
            let Some(group_id) = membership.group_id() else {
                continue;
            };
            looked_up += 1;
            match self.fetch_group(group_id).await {
                Ok(group) => {
                    if group.is_moderated() {
                        moderated.push(group.id);
                    }
                }
                Err(e) if is_fatal_lookup_error(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(group_id, error = %e, "skipping group whose details could not be fetched");
                    failures += 1;
                    last_failure = Some(e);
                }
            }
        }

        // An allow-list built only from failed lookups would revoke every group.
        if failures > 0 && failures == looked_up {
            if let Some(e) = last_failure {
                return Err(e);
            }
        }

        tracing::debug!(
            memberships = memberships.len(),
            moderated = moderated.len(),
            "fetched group permissions"
        );
        Ok(moderated)
    }

    // ── generic path ────────────────────────────────────────────────────

    /// Sends an untyped request through the shared cookie-jar client.
    pub async fn request(&self, req: &ApiRequest) -> Result<Value, ExecError> {
        let url = self.url_for(&req.segments)?;
        let mut builder = self.http.request(req.method.clone(), url);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        decode_value(send(builder).await?).await
    }

    // ── raw path ────────────────────────────────────────────────────────

    /// Sends an untyped request on a fresh client with the session cookie
    /// attached manually. Bypasses the cookie jar entirely.
    pub async fn raw_request(&self, req: &ApiRequest) -> Result<Value, ExecError> {
        let cookie = self.session.auth_cookie().ok_or(ExecError::NoSession)?;
        let client = reqwest::Client::builder()
            .user_agent(self.config.user_agent.clone())
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| ExecError::Failed(format!("failed to build raw client: {e}")))?;

        let url = self.url_for(&req.segments)?;
        let mut builder = client
            .request(req.method.clone(), url)
            .header(COOKIE, format!("{AUTH_COOKIE_NAME}={cookie}"));
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        tracing::debug!(method = %req.method, path = %req.path(), "raw platform request");
        decode_value(send(builder).await?).await
    }
}

/// Extracts `token` from a token-endpoint JSON body.
pub fn token_from_value(value: &Value) -> Result<String, ExecError> {
    value
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExecError::Decode("response has no token".to_string()))
}

/// Failures that say nothing about one group in particular: the whole
/// permission fetch is abandoned instead of skipping the group.
fn is_fatal_lookup_error(e: &ExecError) -> bool {
    matches!(
        e,
        ExecError::RateLimited { .. } | ExecError::Connection(_) | ExecError::NoSession
    )
}

fn transport_error(e: reqwest::Error) -> ExecError {
    if e.is_decode() {
        ExecError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
        ExecError::from_status(status.as_u16(), &e.to_string(), None)
    } else {
        ExecError::Connection(e.to_string())
    }
}

/// Sends the request and maps non-success statuses onto [`ExecError`].
async fn send(builder: RequestBuilder) -> Result<Response, ExecError> {
    let response = builder.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    Err(ExecError::from_status(status.as_u16(), &body, retry_after))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExecError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| ExecError::Decode(e.to_string()))
}

/// Decodes a JSON body; an empty body becomes `Value::Null`.
async fn decode_value(response: Response) -> Result<Value, ExecError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| ExecError::Decode(e.to_string()))
}
