//! Member providers: turn login credentials into a member id and profile.

use std::collections::HashMap;
use std::sync::Arc;

use cohost_types::{MemberProfile, SessionId};
use serde::Deserialize;

use crate::config::{MemberConfig, ProviderKind, StaticUser};
use crate::error::ServerError;

/// Login credentials as sent by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Authenticates logins.
pub trait MemberProvider: Send + Sync + 'static {
    /// Resolve credentials to the member's session id and profile.
    fn authenticate(&self, credentials: &Credentials)
        -> Result<(SessionId, MemberProfile), ServerError>;
}

/// Build the provider named in the configuration.
pub fn from_config(config: &MemberConfig) -> Arc<dyn MemberProvider> {
    match config.provider {
        ProviderKind::Multiuser => Arc::new(MultiuserProvider::new(
            config.admin_password.clone(),
            config.user_password.clone(),
        )),
        ProviderKind::Noauth => Arc::new(NoauthProvider),
        ProviderKind::Static => Arc::new(StaticProvider::new(config.users.iter().cloned())),
    }
}

/// Shared admin and user passwords; the username only names the member.
///
/// Every login gets its own session, so two people using the same name
/// never share one.
pub struct MultiuserProvider {
    admin_password: String,
    user_password: String,
}

impl MultiuserProvider {
    pub fn new(admin_password: String, user_password: String) -> Self {
        Self {
            admin_password,
            user_password,
        }
    }
}

impl MemberProvider for MultiuserProvider {
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<(SessionId, MemberProfile), ServerError> {
        let username = credentials.username.trim();
        if username.is_empty() {
            return Err(ServerError::Unauthorized("username is required".into()));
        }
        let profile = if credentials.password == self.admin_password {
            MemberProfile::admin(username)
        } else if credentials.password == self.user_password {
            MemberProfile::user(username)
        } else {
            return Err(ServerError::Unauthorized("invalid password".into()));
        };
        let token = SessionId::generate();
        let id = SessionId::new(format!("{username}-{}", &token.as_str()[..10]));
        Ok((id, profile))
    }
}

/// Everyone gets in as a non-admin member with a fresh id.
pub struct NoauthProvider;

impl MemberProvider for NoauthProvider {
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<(SessionId, MemberProfile), ServerError> {
        let name = match credentials.username.trim() {
            "" => "guest",
            name => name,
        };
        Ok((SessionId::generate(), MemberProfile::user(name)))
    }
}

/// Fixed list of users with their own passwords and profiles.
pub struct StaticProvider {
    users: HashMap<String, StaticUser>,
}

impl StaticProvider {
    pub fn new(users: impl IntoIterator<Item = StaticUser>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.username.clone(), u))
                .collect(),
        }
    }
}

impl MemberProvider for StaticProvider {
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<(SessionId, MemberProfile), ServerError> {
        let user = self
            .users
            .get(credentials.username.trim())
            .filter(|u| u.password == credentials.password)
            .ok_or_else(|| ServerError::Unauthorized("invalid username or password".into()))?;
        let mut profile = user.profile.clone();
        if profile.name.is_empty() {
            profile.name.clone_from(&user.username);
        }
        Ok((SessionId::new(user.username.as_str()), profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    #[test]
    fn multiuser_distinguishes_admins() {
        let provider = MultiuserProvider::new("admin".into(), "neighbor".into());
        let (id, profile) = provider.authenticate(&creds("alice", "admin")).unwrap();
        assert!(id.as_str().starts_with("alice-"));
        assert_eq!(profile.name, "alice");
        assert!(profile.is_admin);

        let (_, profile) = provider.authenticate(&creds("bob", "neighbor")).unwrap();
        assert!(!profile.is_admin);
        assert!(profile.can_host);

        assert!(matches!(
            provider.authenticate(&creds("eve", "guess")),
            Err(ServerError::Unauthorized(_))
        ));
        assert!(provider.authenticate(&creds("  ", "admin")).is_err());
    }

    #[test]
    fn multiuser_logins_never_share_an_id() {
        let provider = MultiuserProvider::new("admin".into(), "neighbor".into());
        let (admin, _) = provider.authenticate(&creds("root", "admin")).unwrap();
        let (user, _) = provider.authenticate(&creds("root", "neighbor")).unwrap();
        assert_ne!(admin, user);
    }

    #[test]
    fn noauth_generates_fresh_ids() {
        let provider = NoauthProvider;
        let (a, profile) = provider.authenticate(&creds("", "")).unwrap();
        let (b, _) = provider.authenticate(&creds("", "")).unwrap();
        assert_ne!(a, b);
        assert_eq!(profile.name, "guest");
        assert!(!profile.is_admin);
    }

    #[test]
    fn static_users_keep_their_profile() {
        let provider = StaticProvider::new([StaticUser {
            username: "alice".into(),
            password: "wonderland".into(),
            profile: MemberProfile {
                can_login: true,
                can_connect: true,
                can_watch: true,
                ..MemberProfile::default()
            },
        }]);
        let (id, profile) = provider.authenticate(&creds("alice", "wonderland")).unwrap();
        assert_eq!(id.as_str(), "alice");
        assert_eq!(profile.name, "alice");
        assert!(!profile.can_host);

        assert!(provider.authenticate(&creds("alice", "nope")).is_err());
        assert!(provider.authenticate(&creds("bob", "wonderland")).is_err());
    }

    #[test]
    fn config_selects_provider() {
        let config = MemberConfig {
            provider: ProviderKind::Noauth,
            ..MemberConfig::default()
        };
        let provider = from_config(&config);
        assert!(provider.authenticate(&creds("x", "y")).is_ok());
    }
}
