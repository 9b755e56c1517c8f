//! Contract for the credential/session collaborator.

/// Name of the platform's session cookie.
pub const AUTH_COOKIE_NAME: &str = "auth";

/// Opaque access to the operator's platform session.
///
/// Credential storage and login flows live outside the engine; the engine
/// only asks these questions.
pub trait SessionProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// The raw value of the session cookie, without the `auth=` prefix.
    fn auth_cookie(&self) -> Option<String>;

    /// The operator's platform user id (`usr_...`).
    fn user_id(&self) -> Option<String>;
}

/// A session fixed at construction time, typically from config or env.
#[derive(Clone, Default)]
pub struct StaticSession {
    auth_cookie: Option<String>,
    user_id: Option<String>,
}

impl StaticSession {
    pub fn new(auth_cookie: Option<String>, user_id: Option<String>) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            auth_cookie: non_empty(auth_cookie),
            user_id: non_empty(user_id),
        }
    }
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("auth_cookie", &self.auth_cookie.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl SessionProvider for StaticSession {
    fn is_authenticated(&self) -> bool {
        self.auth_cookie.is_some()
    }

    fn auth_cookie(&self) -> Option<String> {
        self.auth_cookie.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}
