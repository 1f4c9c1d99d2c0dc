pub mod api_key;
pub mod authenticator;
pub mod authorizer;
pub mod basic_auth;
pub mod extractor;
pub mod method_guard;
pub mod middleware;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

pub use api_key::ApiKeyVerifier;
pub use authenticator::{AuthConfig, Authenticator, VerifierKind};
pub use authorizer::Authorizer;
pub use basic_auth::BasicAuthVerifier;
pub use extractor::{CredentialExtractor, CredentialSource};
pub use method_guard::MethodGuard;
pub use middleware::{AuthenticationStage, AuthorizationStage};

use crate::command::server::error::Error;
use crate::identity::{Credential, CredentialKind, Identity};

/// Turns a raw credential into a verified identity.
///
/// A verifier only sees credentials whose kind it declared support for.
/// It answers with one of the authentication errors when the credential is
/// wrong (`InvalidCredential`) or a collaborator it depends on could not
/// answer (`CollaboratorUnavailable`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Verifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, kind: CredentialKind) -> bool;

    async fn verify(&self, credential: &Credential) -> Result<Identity, Error>;
}
