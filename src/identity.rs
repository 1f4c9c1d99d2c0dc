use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

pub const ROLE_PREFIX: &str = "ROLE_";

/// Type tag of a [`Credential`], used by verifiers to declare what they handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    SharedSecret,
    UsernamePassword,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::SharedSecret => "shared-secret",
            CredentialKind::UsernamePassword => "username-password",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw, unverified proof of identity extracted from a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    SharedSecret(String),
    UsernamePassword { username: String, password: String },
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::SharedSecret(_) => CredentialKind::SharedSecret,
            Credential::UsernamePassword { .. } => CredentialKind::UsernamePassword,
        }
    }
}

// Secrets must never reach the logs, even through `{:?}`.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Credential::SharedSecret(_) => f.write_str("SharedSecret(***)"),
            Credential::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// A principal resolved by one of the verifiers.
///
/// Only verifiers build identities, and the authority set always comes from
/// server-side configuration or the user directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    principal: String,
    authorities: BTreeSet<String>,
    verified: bool,
    mechanism: &'static str,
}

impl Identity {
    pub fn verified<I, S>(principal: impl Into<String>, authorities: I, mechanism: &'static str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: principal.into(),
            authorities: authorities.into_iter().map(Into::into).collect(),
            verified: true,
            mechanism,
        }
    }

    /// A principal a verifier recognised but did not vouch for. The
    /// authentication dispatcher rejects these.
    #[cfg(test)]
    pub fn unverified(principal: impl Into<String>, mechanism: &'static str) -> Self {
        Self {
            principal: principal.into(),
            authorities: BTreeSet::new(),
            verified: false,
            mechanism,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn authorities(&self) -> &BTreeSet<String> {
        &self.authorities
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn mechanism(&self) -> &'static str {
        self.mechanism
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.authorities.contains(&role_authority(role))
    }
}

/// Maps a role name to the authority that carries it (`ADMIN` -> `ROLE_ADMIN`).
pub fn role_authority(role: &str) -> String {
    if role.starts_with(ROLE_PREFIX) {
        role.to_string()
    } else {
        format!("{ROLE_PREFIX}{role}")
    }
}
