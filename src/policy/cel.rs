use std::collections::HashMap;
use std::sync::Arc;

use cel_interpreter::{Context, Program, Value};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use super::Error;
use crate::configuration::Error as ConfigError;
use crate::identity::{role_authority, Identity};

/// Evaluates free-form predicate expressions.
///
/// Implementations see the identity, the request (route-level checks), the
/// named arguments of a guarded operation, its return value (post-call) and
/// the collection element under test (filters).
pub trait PredicateEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, scope: &PredicateScope<'_>) -> Result<bool, Error>;
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    pub method: String,
    pub path: String,
}

/// Identity as seen by CEL expressions. Anonymous callers get an empty one.
#[derive(Debug, Default, Serialize)]
pub struct CelIdentity {
    pub principal: Option<String>,
    pub authorities: Vec<String>,
    pub authenticated: bool,
    pub mechanism: Option<String>,
}

impl From<Option<&Identity>> for CelIdentity {
    fn from(identity: Option<&Identity>) -> Self {
        match identity {
            Some(identity) => CelIdentity {
                principal: Some(identity.principal().to_string()),
                authorities: identity.authorities().iter().cloned().collect(),
                authenticated: identity.is_verified(),
                mechanism: Some(identity.mechanism().to_string()),
            },
            None => CelIdentity::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PredicateScope<'a> {
    pub identity: Option<&'a Identity>,
    pub request: Option<&'a RequestView>,
    pub args: Option<&'a Map<String, JsonValue>>,
    pub returned: Option<&'a JsonValue>,
    pub element: Option<&'a JsonValue>,
}

impl<'a> PredicateScope<'a> {
    pub fn new(identity: Option<&'a Identity>) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: &'a RequestView) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_args(mut self, args: &'a Map<String, JsonValue>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_returned(mut self, returned: &'a JsonValue) -> Self {
        self.returned = Some(returned);
        self
    }

    pub fn with_element(mut self, element: &'a JsonValue) -> Self {
        self.element = Some(element);
        self
    }
}

/// CEL-backed predicate evaluator.
///
/// Every expression found in the configuration is compiled once, up front, so
/// that a typo fails at startup rather than on the first matching request.
pub struct CelEvaluator {
    programs: HashMap<String, Program>,
}

impl CelEvaluator {
    pub fn new<'a, I>(expressions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut programs = HashMap::new();

        for (index, expression) in expressions.into_iter().enumerate() {
            if programs.contains_key(expression) {
                continue;
            }

            let program = Program::compile(expression).map_err(|e| {
                ConfigError::PolicyCompilation(format!(
                    "Failed to compile expression #{} '{expression}': {e}",
                    index + 1
                ))
            })?;
            programs.insert(expression.to_string(), program);
        }

        Ok(Self { programs })
    }

    fn build_context(scope: &PredicateScope<'_>) -> Result<Context<'static>, Error> {
        let null = JsonValue::Null;
        let empty_args = Map::new();
        let identity = CelIdentity::from(scope.identity);
        let authorities = Arc::new(identity.authorities.clone());

        let mut context = Context::default();
        context
            .add_variable("identity", &identity)
            .map_err(|e| Error::Context(e.to_string()))?;
        context
            .add_variable("request", scope.request)
            .map_err(|e| Error::Context(e.to_string()))?;
        context
            .add_variable("args", scope.args.unwrap_or(&empty_args))
            .map_err(|e| Error::Context(e.to_string()))?;
        context
            .add_variable("returned", scope.returned.unwrap_or(&null))
            .map_err(|e| Error::Context(e.to_string()))?;
        context
            .add_variable("element", scope.element.unwrap_or(&null))
            .map_err(|e| Error::Context(e.to_string()))?;

        let held = Arc::clone(&authorities);
        context.add_function("has_authority", move |authority: Arc<String>| {
            held.iter().any(|a| a == authority.as_str())
        });
        context.add_function("has_role", move |role: Arc<String>| {
            let role = role_authority(&role);
            authorities.iter().any(|a| *a == role)
        });

        Ok(context)
    }
}

impl PredicateEvaluator for CelEvaluator {
    fn evaluate(&self, expression: &str, scope: &PredicateScope<'_>) -> Result<bool, Error> {
        let compiled;
        let program = if let Some(program) = self.programs.get(expression) {
            program
        } else {
            debug!("Compiling expression outside of configuration: {expression}");
            compiled = Program::compile(expression).map_err(|e| Error::Execution(e.to_string()))?;
            &compiled
        };

        let context = Self::build_context(scope)?;

        match program.execute(&context) {
            Ok(Value::Bool(result)) => Ok(result),
            Ok(value) => {
                warn!("Expression '{expression}' returned non-boolean value: {value:?}");
                Err(Error::NonBoolean(format!("{value:?}")))
            }
            Err(e) => Err(Error::Execution(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn alice() -> Identity {
        Identity::verified("alice", ["READ", "ROLE_ADMIN"], "basic")
    }

    #[test]
    fn test_new_compiles_expressions() {
        let evaluator = CelEvaluator::new(["true", "identity.authenticated", "true"]).unwrap();
        assert_eq!(evaluator.programs.len(), 2);
    }

    #[test]
    fn test_new_rejects_invalid_expression() {
        let result = CelEvaluator::new(["identity.principal == "]);
        match result {
            Err(ConfigError::PolicyCompilation(msg)) => {
                assert!(msg.contains("#1"));
            }
            _ => panic!("Expected PolicyCompilation error"),
        }
    }

    #[test]
    fn test_evaluate_identity() {
        let evaluator = CelEvaluator::new([]).unwrap();
        let identity = alice();

        let scope = PredicateScope::new(Some(&identity));
        assert_eq!(
            evaluator.evaluate("identity.principal == 'alice'", &scope),
            Ok(true)
        );
        assert_eq!(
            evaluator.evaluate("'READ' in identity.authorities", &scope),
            Ok(true)
        );
        assert_eq!(evaluator.evaluate("has_authority('WRITE')", &scope), Ok(false));
        assert_eq!(evaluator.evaluate("has_role('ADMIN')", &scope), Ok(true));
    }

    #[test]
    fn test_evaluate_anonymous_identity() {
        let evaluator = CelEvaluator::new([]).unwrap();
        let scope = PredicateScope::new(None);

        assert_eq!(evaluator.evaluate("identity.authenticated", &scope), Ok(false));
        assert_eq!(evaluator.evaluate("has_role('ADMIN')", &scope), Ok(false));
    }

    #[test]
    fn test_evaluate_args_returned_element() {
        let evaluator = CelEvaluator::new([]).unwrap();
        let identity = alice();
        let mut args = Map::new();
        args.insert("id".to_string(), json!("doc-1"));
        let returned = json!({ "owner": "alice" });
        let element = json!("A");

        let scope = PredicateScope::new(Some(&identity))
            .with_args(&args)
            .with_returned(&returned)
            .with_element(&element);

        assert_eq!(evaluator.evaluate("args.id == 'doc-1'", &scope), Ok(true));
        assert_eq!(
            evaluator.evaluate("returned.owner == identity.principal", &scope),
            Ok(true)
        );
        assert_eq!(evaluator.evaluate("element in ['A', 'B']", &scope), Ok(true));
    }

    #[test]
    fn test_evaluate_request() {
        let evaluator = CelEvaluator::new([]).unwrap();
        let request = RequestView {
            method: "GET".to_string(),
            path: "/api/documents".to_string(),
        };
        let scope = PredicateScope::new(None).with_request(&request);

        assert_eq!(
            evaluator.evaluate("request.method == 'GET' && request.path.startsWith('/api')", &scope),
            Ok(true)
        );
    }

    #[test]
    fn test_evaluate_non_boolean() {
        let evaluator = CelEvaluator::new([]).unwrap();
        let scope = PredicateScope::new(None);

        let result = evaluator.evaluate("'not a boolean'", &scope);
        assert!(matches!(result, Err(Error::NonBoolean(_))));
    }

    #[test]
    fn test_evaluate_missing_field() {
        let evaluator = CelEvaluator::new([]).unwrap();
        let scope = PredicateScope::new(None);

        let result = evaluator.evaluate("returned.owner == 'alice'", &scope);
        assert!(matches!(result, Err(Error::Execution(_))));
    }
}
