use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, instrument, warn};

use super::basic_auth::{Argon2PasswordMatcher, ConfigUserDirectory};
use super::{api_key, basic_auth, ApiKeyVerifier, BasicAuthVerifier, Verifier};
use crate::command::server::error::Error;
use crate::configuration::Error as ConfigError;
use crate::identity::{Credential, Identity};
use crate::metrics_provider::AUTH_ATTEMPTS;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum VerifierKind {
    #[serde(rename = "api-key")]
    ApiKey,
    #[serde(rename = "basic")]
    Basic,
}

impl VerifierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VerifierKind::ApiKey => api_key::MECHANISM,
            VerifierKind::Basic => basic_auth::MECHANISM,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    /// Verifiers in dispatch order.
    #[serde(default = "AuthConfig::default_verifiers")]
    pub verifiers: Vec<VerifierKind>,
    #[serde(default = "AuthConfig::default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default)]
    pub api_key: api_key::Config,
    #[serde(default)]
    pub identity: HashMap<String, basic_auth::Config>,
}

impl AuthConfig {
    fn default_verifiers() -> Vec<VerifierKind> {
        vec![VerifierKind::ApiKey, VerifierKind::Basic]
    }

    fn default_lookup_timeout_ms() -> u64 {
        2000
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verifiers: Self::default_verifiers(),
            lookup_timeout_ms: Self::default_lookup_timeout_ms(),
            api_key: api_key::Config::default(),
            identity: HashMap::new(),
        }
    }
}

/// Dispatches a credential to the first registered verifier supporting its
/// kind. Later verifiers are never consulted for that credential, even if the
/// first one rejects it.
pub struct Authenticator {
    verifiers: Vec<Arc<dyn Verifier>>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigError> {
        let mut verifiers: Vec<Arc<dyn Verifier>> = Vec::new();
        let mut registered = Vec::new();

        for kind in &config.verifiers {
            if registered.contains(kind) {
                warn!("Verifier {kind:?} listed more than once, ignoring duplicate");
                continue;
            }
            registered.push(*kind);

            match kind {
                VerifierKind::ApiKey => {
                    let verifier = ApiKeyVerifier::new(&config.api_key.keys)?;
                    if verifier.is_empty() {
                        warn!("API key verifier enabled without any key");
                    }
                    verifiers.push(Arc::new(verifier));
                }
                VerifierKind::Basic => {
                    let directory = ConfigUserDirectory::new(&config.identity);
                    if directory.is_empty() {
                        warn!("Basic verifier enabled without any identity");
                    }
                    verifiers.push(Arc::new(BasicAuthVerifier::new(
                        Arc::new(directory),
                        Arc::new(Argon2PasswordMatcher),
                        Duration::from_millis(config.lookup_timeout_ms),
                    )));
                }
            }
        }

        Ok(Self { verifiers })
    }

    pub fn with_verifiers(verifiers: Vec<Arc<dyn Verifier>>) -> Self {
        Self { verifiers }
    }

    #[instrument(skip_all, fields(credential_kind = %credential.kind()))]
    pub async fn authenticate(&self, credential: &Credential) -> Result<Identity, Error> {
        let kind = credential.kind();

        let Some(verifier) = self.verifiers.iter().find(|v| v.supports(kind)) else {
            error!("No verifier registered for credential type '{kind}'");
            AUTH_ATTEMPTS
                .with_label_values(&["none", "unsupported"])
                .inc();
            return Err(Error::UnsupportedCredentialType(kind));
        };

        let mechanism = verifier.name();
        match verifier.verify(credential).await {
            Ok(identity) if identity.is_verified() => {
                debug!(
                    mechanism,
                    principal = identity.principal(),
                    "Authentication succeeded"
                );
                AUTH_ATTEMPTS
                    .with_label_values(&[mechanism, "success"])
                    .inc();
                Ok(identity)
            }
            Ok(identity) => {
                warn!(
                    mechanism,
                    principal = identity.principal(),
                    "Verifier returned an unverified identity"
                );
                AUTH_ATTEMPTS
                    .with_label_values(&[mechanism, "failed"])
                    .inc();
                Err(Error::InvalidCredential)
            }
            Err(error) => {
                let result = match error {
                    Error::CollaboratorUnavailable(_) => "unavailable",
                    _ => "failed",
                };
                AUTH_ATTEMPTS.with_label_values(&[mechanism, result]).inc();
                Err(error)
            }
        }
    }
}
