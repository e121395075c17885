//! Users, roles and API session tokens.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::UsersConfig;
use crate::error::{Error, Result};

pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);
const TOKEN_LEN: usize = 32;

/// API roles, weakest first. A role may do everything the roles below it
/// may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Role {
    #[serde(rename = "Read-Only")]
    ReadOnly,
    #[serde(rename = "Standard User")]
    StandardUser,
    #[serde(rename = "Administrator")]
    Administrator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::ReadOnly => "Read-Only",
            Role::StandardUser => "Standard User",
            Role::Administrator => "Administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Read-Only" => Ok(Role::ReadOnly),
            "Standard User" => Ok(Role::StandardUser),
            "Administrator" => Ok(Role::Administrator),
            other => Err(format!("unknown group '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub username: String,
    pub groups: Vec<String>,
    pub logon_time: DateTime<Utc>,
}

impl User {
    /// Strongest role among the user's groups. Groups that are not roles
    /// are ignored.
    pub fn effective_role(&self) -> Option<Role> {
        self.groups.iter().filter_map(|g| g.parse().ok()).max()
    }

    pub fn allowed(&self, required: Role) -> bool {
        self.effective_role().is_some_and(|role| role >= required)
    }
}

/// Checks credentials. Implementations must be safe to share across tasks.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<User>;
}

/// Accounts listed in the queue's users file.
pub struct StaticAuthenticator {
    users: UsersConfig,
}

impl StaticAuthenticator {
    pub fn new(users: UsersConfig) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn login(&self, username: &str, password: &str) -> Result<User> {
        match self.users.users.get(username) {
            Some(entry) if entry.password == password => Ok(User {
                username: username.to_string(),
                groups: entry.groups.clone(),
                logon_time: Utc::now(),
            }),
            _ => {
                tracing::info!(user = username, "Login rejected");
                Err(Error::Authentication)
            }
        }
    }
}

struct Session {
    user: User,
    expires: Instant,
}

/// Logged-in sessions. Each successful check renews the session.
pub struct TokenStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn generate_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect()
    }

    /// Start a session. Sessions that expired without being checked again
    /// are dropped here.
    pub async fn add_token(&self, token: String, user: User) {
        tracing::debug!(user = %user.username, "Session started");
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires > now);
        if sessions.len() < before {
            tracing::debug!(expired = before - sessions.len(), "Swept sessions");
        }
        sessions.insert(
            token,
            Session {
                user,
                expires: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn remove_token(&self, token: &str) {
        if self.sessions.lock().await.remove(token).is_some() {
            tracing::debug!("Session ended");
        }
    }

    /// Whether `token` names a live session. Expired sessions are dropped.
    pub async fn check_token(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        match sessions.get_mut(token) {
            Some(session) if session.expires > now => {
                session.expires = now + self.ttl;
                true
            }
            Some(_) => {
                sessions.remove(token);
                tracing::debug!("Session expired");
                false
            }
            None => false,
        }
    }

    pub async fn get_user(&self, token: &str) -> Result<User> {
        self.sessions
            .lock()
            .await
            .get(token)
            .map(|session| session.user.clone())
            .ok_or(Error::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserEntry;

    fn user(groups: &[&str]) -> User {
        User {
            username: "alice".into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            logon_time: Utc::now(),
        }
    }

    #[test]
    fn strongest_group_wins() {
        assert_eq!(user(&["Read-Only", "Administrator"]).effective_role(), Some(Role::Administrator));
        assert_eq!(user(&["Standard User", "staff"]).effective_role(), Some(Role::StandardUser));
        assert_eq!(user(&["staff"]).effective_role(), None);
    }

    #[test]
    fn roles_include_weaker_roles() {
        let standard = user(&["Standard User"]);
        assert!(standard.allowed(Role::ReadOnly));
        assert!(standard.allowed(Role::StandardUser));
        assert!(!standard.allowed(Role::Administrator));
        assert!(!user(&[]).allowed(Role::ReadOnly));
    }

    #[tokio::test]
    async fn static_login() {
        let mut users = UsersConfig::default();
        users.users.insert(
            "alice".into(),
            UserEntry {
                password: "pw".into(),
                groups: vec!["Administrator".into()],
            },
        );
        let auth = StaticAuthenticator::new(users);
        assert_eq!(auth.login("alice", "pw").await.unwrap().username, "alice");
        assert!(matches!(auth.login("alice", "nope").await, Err(Error::Authentication)));
        assert!(matches!(auth.login("bob", "pw").await, Err(Error::Authentication)));
    }

    #[tokio::test]
    async fn tokens_expire_and_renew() {
        let store = TokenStore::with_ttl(Duration::from_millis(80));
        let token = TokenStore::generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        store.add_token(token.clone(), user(&["Read-Only"])).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.check_token(&token).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Renewed by the previous check.
        assert!(store.check_token(&token).await);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!store.check_token(&token).await);
        assert!(store.get_user(&token).await.is_err());
    }

    #[tokio::test]
    async fn logout_removes_session() {
        let store = TokenStore::new();
        store.add_token("t".into(), user(&["Administrator"])).await;
        assert_eq!(store.get_user("t").await.unwrap().username, "alice");
        store.remove_token("t").await;
        assert!(!store.check_token("t").await);
    }

    #[tokio::test]
    async fn abandoned_sessions_are_swept_on_login() {
        let store = TokenStore::with_ttl(Duration::from_millis(40));
        for i in 0..5 {
            store.add_token(format!("old-{i}"), user(&["Read-Only"])).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        store.add_token("fresh".into(), user(&["Read-Only"])).await;

        let sessions = store.sessions.lock().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key("fresh"));
    }
}
