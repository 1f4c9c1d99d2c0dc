use hyper::Method;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::AuthorizationRule;
use crate::configuration::Error as ConfigError;

#[derive(Clone, Debug, Deserialize)]
pub struct RouteRuleConfig {
    /// Regular expression matched against the whole request path.
    pub path: String,
    /// Methods this rule applies to; empty means all methods.
    #[serde(default)]
    pub methods: Vec<String>,
    pub rule: AuthorizationRule,
}

struct RouteRule {
    pattern: Regex,
    methods: Vec<Method>,
    rule: AuthorizationRule,
}

impl RouteRule {
    fn matches(&self, method: &Method, path: &str) -> bool {
        (self.methods.is_empty() || self.methods.contains(method)) && self.pattern.is_match(path)
    }
}

/// Ordered route rules. The first matching rule wins; unmatched requests fall
/// back to the default rule.
pub struct RouteRules {
    rules: Vec<RouteRule>,
    default_rule: AuthorizationRule,
}

impl RouteRules {
    pub fn new(
        configs: &[RouteRuleConfig],
        default_rule: AuthorizationRule,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            let pattern = Regex::new(&format!("^(?:{})$", config.path)).map_err(|e| {
                ConfigError::InvalidRoute(format!(
                    "Route rule #{} has an invalid path pattern '{}': {e}",
                    index + 1,
                    config.path
                ))
            })?;

            let methods = config
                .methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_uppercase().as_bytes()).map_err(|e| {
                        ConfigError::InvalidRoute(format!(
                            "Route rule #{} has an invalid method '{m}': {e}",
                            index + 1
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            rules.push(RouteRule {
                pattern,
                methods,
                rule: config.rule.clone(),
            });
        }

        Ok(Self {
            rules,
            default_rule,
        })
    }

    pub fn rule_for(&self, method: &Method, path: &str) -> &AuthorizationRule {
        for (index, route) in self.rules.iter().enumerate() {
            if route.matches(method, path) {
                debug!("Route rule #{} matched {method} {path}", index + 1);
                return &route.rule;
            }
        }

        &self.default_rule
    }
}
