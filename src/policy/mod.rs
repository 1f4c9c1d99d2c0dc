//! Declarative access rules and their evaluation primitives.
//!
//! Rules are declared in configuration, either per route (see [`RouteRules`])
//! or per guarded operation, and evaluated by the server's `Authorizer`.
//! Free-form predicates are delegated to a [`PredicateEvaluator`]; the
//! shipped one is backed by CEL.

mod cel;
mod route;

use std::fmt;

use serde::Deserialize;

pub use cel::{CelEvaluator, PredicateEvaluator, PredicateScope, RequestView};
pub use route::{RouteRuleConfig, RouteRules};

/// An access rule.
///
/// In TOML, unit variants are plain strings (`rule = "permit_all"`) and the
/// others are inline tables (`rule = { authority = "READ" }`).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationRule {
    PermitAll,
    #[default]
    Authenticated,
    DenyAll,
    #[serde(rename = "authority")]
    RequiresAuthority(String),
    #[serde(rename = "any_authority")]
    RequiresAnyAuthority(Vec<String>),
    #[serde(rename = "role")]
    RequiresRole(String),
    #[serde(rename = "any_role")]
    RequiresAnyRole(Vec<String>),
    #[serde(rename = "expression")]
    Predicate(String),
}

impl AuthorizationRule {
    pub fn expression(&self) -> Option<&str> {
        match self {
            AuthorizationRule::Predicate(expression) => Some(expression),
            _ => None,
        }
    }
}

impl fmt::Display for AuthorizationRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthorizationRule::PermitAll => write!(f, "permitAll"),
            AuthorizationRule::Authenticated => write!(f, "authenticated"),
            AuthorizationRule::DenyAll => write!(f, "denyAll"),
            AuthorizationRule::RequiresAuthority(name) => write!(f, "hasAuthority({name})"),
            AuthorizationRule::RequiresAnyAuthority(names) => {
                write!(f, "hasAnyAuthority({})", names.join(", "))
            }
            AuthorizationRule::RequiresRole(name) => write!(f, "hasRole({name})"),
            AuthorizationRule::RequiresAnyRole(names) => {
                write!(f, "hasAnyRole({})", names.join(", "))
            }
            AuthorizationRule::Predicate(expression) => write!(f, "expression({expression})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    Context(String),
    Execution(String),
    NonBoolean(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Context(err) => write!(f, "Unable to build predicate context: {err}"),
            Error::Execution(err) => write!(f, "Predicate evaluation failed: {err}"),
            Error::NonBoolean(value) => write!(f, "Predicate returned a non-boolean value: {value}"),
        }
    }
}
