
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHashString};
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::Verifier;
use crate::command::server::error::Error;
use crate::identity::{role_authority, Credential, CredentialKind, Identity};

pub const MECHANISM: &str = "basic";

// Compared against when the username is unknown, so that a miss costs as much
// as a wrong password.
const TIMING_EQUALIZER_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$9pxWwg0VtZzDXno/25417Q$e+cuKy9VisJVxec/EEuKvvfIIIOy5yDGRzYKiuDLjx0";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    pub username: String,
    /// Argon2 PHC string, as printed by the `argon` subcommand.
    pub password: String,
    #[serde(default)]
    pub authorities: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub authorities: BTreeSet<String>,
}

/// Source of user records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, Error>;
}

/// Compares a presented password with a stored hash.
#[cfg_attr(test, automock)]
pub trait PasswordMatcher: Send + Sync {
    fn matches(&self, password: &str, stored_hash: &str) -> bool;
}

/// User directory backed by the `[auth.identity.<id>]` configuration tables.
pub struct ConfigUserDirectory {
    users: HashMap<String, UserRecord>,
}

fn build_users(identities: &HashMap<String, Config>) -> HashMap<String, UserRecord> {
    let mut users = HashMap::new();
    for (id, config) in identities {
        if let Err(err) = PasswordHashString::new(&config.password) {
            warn!("Invalid password hash for identity {id} ({}): {err}", config.username);
            continue;
        }

        let authorities = config
            .authorities
            .iter()
            .cloned()
            .chain(config.roles.iter().map(|role| role_authority(role)))
            .collect();

        users.insert(
            config.username.clone(),
            UserRecord {
                username: config.username.clone(),
                password_hash: config.password.clone(),
                authorities,
            },
        );
    }

    users
}

impl ConfigUserDirectory {
    pub fn new(identities: &HashMap<String, Config>) -> Self {
        Self {
            users: build_users(identities),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for ConfigUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, Error> {
        Ok(self.users.get(username).cloned())
    }
}

pub struct Argon2PasswordMatcher;

impl PasswordMatcher for Argon2PasswordMatcher {
    fn matches(&self, password: &str, stored_hash: &str) -> bool {
        let hash = match PasswordHash::new(stored_hash) {
            Ok(hash) => hash,
            Err(error) => {
                warn!("Stored password hash cannot be parsed: {error}");
                return false;
            }
        };

        match Argon2::default().verify_password(password.as_bytes(), &hash) {
            Ok(()) => true,
            Err(error) => {
                debug!("Password verification failed: {error}");
                false
            }
        }
    }
}

pub struct BasicAuthVerifier {
    directory: Arc<dyn UserDirectory>,
    matcher: Arc<dyn PasswordMatcher>,
    lookup_timeout: Duration,
}

impl BasicAuthVerifier {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        matcher: Arc<dyn PasswordMatcher>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            matcher,
            lookup_timeout,
        }
    }

    // Password hashing is CPU bound; keep it off the runtime workers.
    async fn check_password(&self, password: &str, stored_hash: String) -> Result<bool, Error> {
        let matcher = Arc::clone(&self.matcher);
        let password = password.to_string();

        tokio::task::spawn_blocking(move || matcher.matches(&password, &stored_hash))
            .await
            .map_err(|error| {
                Error::CollaboratorUnavailable(format!("password check did not complete: {error}"))
            })
    }

    #[instrument(skip(self, password))]
    pub async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Identity, Error> {
        let lookup = timeout(self.lookup_timeout, self.directory.find_by_username(username));

        let record = match lookup.await {
            Ok(Ok(record)) => record,
            Ok(Err(error)) => {
                return Err(Error::CollaboratorUnavailable(format!(
                    "user directory lookup failed: {error}"
                )))
            }
            Err(_) => {
                return Err(Error::CollaboratorUnavailable(format!(
                    "user directory lookup exceeded {}ms",
                    self.lookup_timeout.as_millis()
                )))
            }
        };

        let Some(record) = record else {
            debug!("Username not found in user directory");
            let _ = self
                .check_password(password, TIMING_EQUALIZER_HASH.to_string())
                .await?;
            return Err(Error::InvalidCredential);
        };

        if !self
            .check_password(password, record.password_hash.clone())
            .await?
        {
            return Err(Error::InvalidCredential);
        }

        Ok(Identity::verified(
            record.username,
            record.authorities,
            MECHANISM,
        ))
    }
}

#[async_trait]
impl Verifier for BasicAuthVerifier {
    fn name(&self) -> &'static str {
        MECHANISM
    }

    fn supports(&self, kind: CredentialKind) -> bool {
        kind == CredentialKind::UsernamePassword
    }

    async fn verify(&self, credential: &Credential) -> Result<Identity, Error> {
        match credential {
            Credential::UsernamePassword { username, password } => {
                self.validate_credentials(username, password).await
            }
            credential => Err(Error::UnsupportedCredentialType(credential.kind())),
        }
    }
}
