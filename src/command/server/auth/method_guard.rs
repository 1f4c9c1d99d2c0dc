use std::future::Future;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use super::Authorizer;
use crate::command::server::error::Error;
use crate::identity::Identity;
use crate::metrics_provider::AUTHORIZATION_DECISIONS;
use crate::policy::{AuthorizationRule, Decision, PredicateScope};

/// Method-level authorization around a single guarded operation.
///
/// Four modes are offered:
/// - [`pre_authorize`](Self::pre_authorize): the rule sees the arguments, the
///   operation only runs if it allows.
/// - [`post_authorize`](Self::post_authorize): the operation runs first, the
///   rule sees its result. A denial hides the result but does not undo side
///   effects of the operation.
/// - [`pre_filter`](Self::pre_filter): each input element is tested, the
///   operation receives the allowed ones in their original order.
/// - [`post_filter`](Self::post_filter): each returned element is tested.
pub struct MethodGuard<'a> {
    authorizer: &'a Authorizer,
    identity: Option<&'a Identity>,
    operation: &'static str,
    args: Map<String, JsonValue>,
}

impl<'a> MethodGuard<'a> {
    pub fn new(
        authorizer: &'a Authorizer,
        identity: Option<&'a Identity>,
        operation: &'static str,
    ) -> Self {
        Self {
            authorizer,
            identity,
            operation,
            args: Map::new(),
        }
    }

    /// Exposes a named argument to predicates as `args.<name>`.
    pub fn with_argument<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|error| {
            warn!(
                operation = self.operation,
                "Argument '{name}' cannot be exposed to predicates: {error}"
            );
            JsonValue::Null
        });
        self.args.insert(name.to_string(), value);
        self
    }

    fn check(
        &self,
        mode: &'static str,
        rule: &AuthorizationRule,
        returned: Option<&JsonValue>,
        element: Option<&JsonValue>,
    ) -> Decision {
        let mut scope = PredicateScope::new(self.identity).with_args(&self.args);
        scope.returned = returned;
        scope.element = element;

        let decision = self.authorizer.decide(rule, &scope);
        AUTHORIZATION_DECISIONS
            .with_label_values(&[mode, decision.as_str()])
            .inc();
        decision
    }

    fn deny(&self, mode: &'static str, rule: &AuthorizationRule) -> Error {
        info!(
            operation = self.operation,
            mode,
            principal = self.identity.map(Identity::principal),
            "Access denied by rule {rule}"
        );
        Error::AuthorizationDenied
    }

    pub async fn pre_authorize<T, F, Fut>(
        &self,
        rule: &AuthorizationRule,
        operation: F,
    ) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if !self.check("pre_authorize", rule, None, None).is_allowed() {
            return Err(self.deny("pre_authorize", rule));
        }

        operation().await
    }

    pub async fn post_authorize<T, F, Fut>(
        &self,
        rule: &AuthorizationRule,
        operation: F,
    ) -> Result<T, Error>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let result = operation().await?;
        let returned = serde_json::to_value(&result)
            .map_err(|error| Error::Internal(format!("Cannot inspect operation result: {error}")))?;

        if !self
            .check("post_authorize", rule, Some(&returned), None)
            .is_allowed()
        {
            return Err(self.deny("post_authorize", rule));
        }

        Ok(result)
    }

    pub async fn pre_filter<T, R, F, Fut>(
        &self,
        rule: &AuthorizationRule,
        items: Vec<T>,
        operation: F,
    ) -> Result<R, Error>
    where
        T: Serialize,
        F: FnOnce(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, Error>>,
    {
        let allowed = self.filter("pre_filter", rule, items)?;
        operation(allowed).await
    }

    pub async fn post_filter<T, F, Fut>(
        &self,
        rule: &AuthorizationRule,
        operation: F,
    ) -> Result<Vec<T>, Error>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, Error>>,
    {
        let items = operation().await?;
        self.filter("post_filter", rule, items)
    }

    fn filter<T: Serialize>(
        &self,
        mode: &'static str,
        rule: &AuthorizationRule,
        items: Vec<T>,
    ) -> Result<Vec<T>, Error> {
        let total = items.len();
        let mut allowed = Vec::with_capacity(total);

        for item in items {
            let element = serde_json::to_value(&item)
                .map_err(|error| Error::Internal(format!("Cannot inspect element: {error}")))?;

            if self.check(mode, rule, None, Some(&element)).is_allowed() {
                allowed.push(item);
            }
        }

        if allowed.len() < total {
            debug!(
                operation = self.operation,
                mode,
                "Removed {} of {total} elements",
                total - allowed.len()
            );
        }

        Ok(allowed)
    }
}
