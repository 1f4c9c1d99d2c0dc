use std::collections::{BTreeMap, BTreeSet};
use std::env;

use async_trait::async_trait;
use hyper::header::HeaderName;
use serde::Deserialize;
use sha2::{Digest as ShaDigestTrait, Sha256};
use tracing::{debug, instrument};

use super::Verifier;
use crate::command::server::error::Error;
use crate::configuration::Error as ConfigError;
use crate::identity::{role_authority, Credential, CredentialKind, Identity};

pub const MECHANISM: &str = "api-key";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_header")]
    pub header: String,
    #[serde(default)]
    pub keys: BTreeMap<String, KeyConfig>,
}

impl Config {
    fn default_header() -> String {
        "X-API-Key".to_string()
    }

    pub fn header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.header.as_bytes()).map_err(|e| {
            ConfigError::InvalidAuth(format!("Invalid API key header '{}': {e}", self.header))
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            header: Self::default_header(),
            keys: BTreeMap::new(),
        }
    }
}

/// A named shared secret. The name becomes the principal.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeyConfig {
    pub key: Option<String>,
    /// Environment variable holding the key, for deployments that keep
    /// secrets out of the configuration file.
    pub key_env: Option<String>,
    #[serde(default)]
    pub authorities: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

struct ApiKey {
    principal: String,
    digest: Vec<u8>,
    authorities: BTreeSet<String>,
}

pub struct ApiKeyVerifier {
    keys: Vec<ApiKey>,
}

fn digest(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).as_slice().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn resolve_key(name: &str, config: &KeyConfig) -> Result<String, ConfigError> {
    let key = match (&config.key, &config.key_env) {
        (Some(key), None) => key.clone(),
        (None, Some(variable)) => env::var(variable).map_err(|e| {
            ConfigError::InvalidAuth(format!(
                "API key '{name}' reads variable '{variable}': {e}"
            ))
        })?,
        _ => {
            return Err(ConfigError::InvalidAuth(format!(
                "API key '{name}' must set exactly one of 'key' or 'key_env'"
            )))
        }
    };

    if key.is_empty() {
        return Err(ConfigError::InvalidAuth(format!("API key '{name}' is empty")));
    }

    Ok(key)
}

impl ApiKeyVerifier {
    pub fn new(keys: &BTreeMap<String, KeyConfig>) -> Result<Self, ConfigError> {
        let mut verifier_keys = Vec::with_capacity(keys.len());

        for (name, config) in keys {
            let key = resolve_key(name, config)?;
            let authorities = config
                .authorities
                .iter()
                .cloned()
                .chain(config.roles.iter().map(|role| role_authority(role)))
                .collect();

            verifier_keys.push(ApiKey {
                principal: name.clone(),
                digest: digest(&key),
                authorities,
            });
        }

        Ok(Self {
            keys: verifier_keys,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every configured key is compared, so the time spent does not depend on
    /// which key (if any) matched.
    #[instrument(skip_all)]
    pub fn validate_key(&self, presented: &str) -> Result<Identity, Error> {
        let presented = digest(presented);

        let matched = self.keys.iter().fold(None, |found, key| {
            let equal = constant_time_eq(&key.digest, &presented);
            match found {
                None if equal => Some(key),
                found => found,
            }
        });

        match matched {
            Some(key) => Ok(Identity::verified(
                key.principal.clone(),
                key.authorities.iter().cloned(),
                MECHANISM,
            )),
            None => {
                debug!("Presented API key matches no configured key");
                Err(Error::InvalidCredential)
            }
        }
    }
}

#[async_trait]
impl Verifier for ApiKeyVerifier {
    fn name(&self) -> &'static str {
        MECHANISM
    }

    fn supports(&self, kind: CredentialKind) -> bool {
        kind == CredentialKind::SharedSecret
    }

    async fn verify(&self, credential: &Credential) -> Result<Identity, Error> {
        match credential {
            Credential::SharedSecret(key) => self.validate_key(key),
            credential => Err(Error::UnsupportedCredentialType(credential.kind())),
        }
    }
}
