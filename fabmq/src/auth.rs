use async_trait::async_trait;

use fabmq_conf::Auth;

use crate::types::HashMap;

/// Decides whether CONNECT credentials are accepted.
///
/// Only consulted when both a user name and a password are present.
#[async_trait]
pub trait Authorizer: Sync + Send {
    async fn authorize(&self, username: &str, password: &[u8]) -> bool;
}

/// Accepts every credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    #[inline]
    async fn authorize(&self, _username: &str, _password: &[u8]) -> bool {
        true
    }
}

/// Fixed user table, typically loaded from the `[auth]` settings.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthorizer {
    users: HashMap<String, String>,
    allow_anonymous: bool,
}

impl StaticAuthorizer {
    pub fn new(allow_anonymous: bool) -> Self {
        Self { users: HashMap::default(), allow_anonymous }
    }

    pub fn user<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl From<&Auth> for StaticAuthorizer {
    fn from(cfg: &Auth) -> Self {
        Self {
            users: cfg.users.iter().map(|(u, p)| (u.clone(), p.clone())).collect(),
            allow_anonymous: cfg.allow_anonymous,
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, username: &str, password: &[u8]) -> bool {
        if self.users.is_empty() {
            return self.allow_anonymous;
        }
        match self.users.get(username) {
            Some(expected) => expected.as_bytes() == password,
            None => false,
        }
    }
}
