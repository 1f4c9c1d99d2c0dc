use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;

mod error;
pub mod watcher;

use crate::command::server::auth::AuthConfig;
use crate::documents::{NewDocument, OperationRules};
use crate::policy::{AuthorizationRule, RouteRuleConfig};
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    /// Rule applied to requests that match no `[[route]]` entry.
    #[serde(default)]
    pub default_rule: AuthorizationRule,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteRuleConfig>,
    #[serde(default)]
    pub operations: OperationRules,
    #[serde(default, rename = "document")]
    pub documents: Vec<NewDocument>,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
    #[serde(default = "ServerConfig::default_max_body_size")]
    pub max_body_size: usize,
}

impl ServerConfig {
    fn default_bind_address() -> IpAddr {
        IpAddr::from(Ipv4Addr::from([0; 4]))
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }

    fn default_max_body_size() -> usize {
        1024 * 1024
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            port: Self::default_port(),
            query_timeout: Self::default_query_timeout(),
            query_timeout_grace_period: Self::default_query_timeout_grace_period(),
            max_body_size: Self::default_max_body_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            max_concurrent_requests: GlobalConfig::default_max_concurrent_requests(),
        }
    }
}

impl GlobalConfig {
    fn default_max_concurrent_requests() -> usize {
        4
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice).map_err(|e| {
            println!("Configuration file format error:");
            println!("{e}");
            Error::ConfigurationFileFormat(e.to_string())
        })?;

        Ok(config)
    }

    /// Every predicate expression declared in the configuration, so they can
    /// be compiled once at startup.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.routes
            .iter()
            .map(|route| &route.rule)
            .chain(std::iter::once(&self.default_rule))
            .chain(self.operations.rules())
            .filter_map(AuthorizationRule::expression)
    }
}
