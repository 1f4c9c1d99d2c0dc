use std::sync::Arc;

use hyper::Request;
use tracing::{debug, info, instrument, warn};

use crate::identity::Identity;
use crate::metrics_provider::AUTHORIZATION_DECISIONS;
use crate::policy::{AuthorizationRule, Decision, PredicateEvaluator, PredicateScope, RequestView};

/// Centralized authorization component: turns a rule and the current scope
/// into a decision.
///
/// Everything except `PermitAll` requires a verified identity. Predicate
/// evaluation failures are treated as denials.
pub struct Authorizer {
    evaluator: Arc<dyn PredicateEvaluator>,
}

impl Authorizer {
    pub fn new(evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn decide(&self, rule: &AuthorizationRule, scope: &PredicateScope<'_>) -> Decision {
        let identity = match (rule, scope.identity) {
            (AuthorizationRule::PermitAll, _) => return Decision::Allow,
            (_, Some(identity)) if identity.is_verified() => identity,
            _ => {
                debug!("No verified identity for rule {rule}");
                return Decision::Deny;
            }
        };

        match rule {
            AuthorizationRule::PermitAll | AuthorizationRule::Authenticated => Decision::Allow,
            AuthorizationRule::DenyAll => Decision::Deny,
            AuthorizationRule::RequiresAuthority(authority) => {
                identity.has_authority(authority).into()
            }
            AuthorizationRule::RequiresAnyAuthority(authorities) => authorities
                .iter()
                .any(|authority| identity.has_authority(authority))
                .into(),
            AuthorizationRule::RequiresRole(role) => identity.has_role(role).into(),
            AuthorizationRule::RequiresAnyRole(roles) => {
                roles.iter().any(|role| identity.has_role(role)).into()
            }
            AuthorizationRule::Predicate(expression) => {
                match self.evaluator.evaluate(expression, scope) {
                    Ok(result) => result.into(),
                    Err(error) => {
                        warn!("Predicate '{expression}' could not be evaluated, denying: {error}");
                        Decision::Deny
                    }
                }
            }
        }
    }

    /// Route-level decision, taken before the endpoint runs.
    #[instrument(skip(self, identity, rule, request), fields(method = %request.method(), path = request.uri().path()))]
    pub fn authorize_request<B>(
        &self,
        identity: Option<&Identity>,
        rule: &AuthorizationRule,
        request: &Request<B>,
    ) -> Decision {
        let view = RequestView {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
        };
        let scope = PredicateScope::new(identity).with_request(&view);

        let decision = self.decide(rule, &scope);
        AUTHORIZATION_DECISIONS
            .with_label_values(&["route", decision.as_str()])
            .inc();

        if !decision.is_allowed() {
            info!(
                principal = identity.map(Identity::principal),
                "Access denied by route rule {rule}"
            );
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CelEvaluator;

    fn authorizer() -> Authorizer {
        Authorizer::new(Arc::new(CelEvaluator::new([]).unwrap()))
    }

    fn alice() -> Identity {
        Identity::verified("alice", ["documents:read", "ROLE_USER"], "basic")
    }

    fn decide(rule: &AuthorizationRule, identity: Option<&Identity>) -> Decision {
        authorizer().decide(rule, &PredicateScope::new(identity))
    }

    #[test]
    fn test_permit_all() {
        assert_eq!(decide(&AuthorizationRule::PermitAll, None), Decision::Allow);
        assert_eq!(
            decide(&AuthorizationRule::PermitAll, Some(&alice())),
            Decision::Allow
        );
    }

    #[test]
    fn test_anonymous_is_denied_for_everything_else() {
        let rules = [
            AuthorizationRule::Authenticated,
            AuthorizationRule::DenyAll,
            AuthorizationRule::RequiresAuthority("documents:read".to_string()),
            AuthorizationRule::RequiresAnyRole(vec!["USER".to_string()]),
            AuthorizationRule::Predicate("true".to_string()),
        ];

        for rule in &rules {
            assert_eq!(decide(rule, None), Decision::Deny, "rule {rule}");
        }
    }

    #[test]
    fn test_unverified_identity_is_treated_as_anonymous() {
        let identity = Identity::unverified("mallory", "basic");
        assert_eq!(
            decide(&AuthorizationRule::Authenticated, Some(&identity)),
            Decision::Deny
        );
    }

    #[test]
    fn test_authenticated_and_deny_all() {
        assert_eq!(
            decide(&AuthorizationRule::Authenticated, Some(&alice())),
            Decision::Allow
        );
        assert_eq!(
            decide(&AuthorizationRule::DenyAll, Some(&alice())),
            Decision::Deny
        );
    }

    #[test]
    fn test_authorities() {
        let alice = alice();

        assert_eq!(
            decide(
                &AuthorizationRule::RequiresAuthority("documents:read".to_string()),
                Some(&alice)
            ),
            Decision::Allow
        );
        assert_eq!(
            decide(
                &AuthorizationRule::RequiresAuthority("documents:write".to_string()),
                Some(&alice)
            ),
            Decision::Deny
        );
        assert_eq!(
            decide(
                &AuthorizationRule::RequiresAnyAuthority(vec![
                    "documents:write".to_string(),
                    "documents:read".to_string()
                ]),
                Some(&alice)
            ),
            Decision::Allow
        );
        assert_eq!(
            decide(&AuthorizationRule::RequiresAnyAuthority(vec![]), Some(&alice)),
            Decision::Deny
        );
    }

    #[test]
    fn test_roles() {
        let alice = alice();

        assert_eq!(
            decide(&AuthorizationRule::RequiresRole("USER".to_string()), Some(&alice)),
            Decision::Allow
        );
        assert_eq!(
            decide(&AuthorizationRule::RequiresRole("ADMIN".to_string()), Some(&alice)),
            Decision::Deny
        );
        // roles are authorities with a prefix, not the bare name
        assert_eq!(
            decide(
                &AuthorizationRule::RequiresRole("documents:read".to_string()),
                Some(&alice)
            ),
            Decision::Deny
        );
        assert_eq!(
            decide(
                &AuthorizationRule::RequiresAnyRole(vec!["ADMIN".to_string(), "USER".to_string()]),
                Some(&alice)
            ),
            Decision::Allow
        );
    }

    #[test]
    fn test_predicate() {
        let alice = alice();

        assert_eq!(
            decide(
                &AuthorizationRule::Predicate("identity.principal == 'alice'".to_string()),
                Some(&alice)
            ),
            Decision::Allow
        );
        assert_eq!(
            decide(
                &AuthorizationRule::Predicate("has_role('ADMIN')".to_string()),
                Some(&alice)
            ),
            Decision::Deny
        );
    }

    #[test]
    fn test_predicate_errors_deny() {
        let alice = alice();

        // not a boolean
        assert_eq!(
            decide(&AuthorizationRule::Predicate("'yes'".to_string()), Some(&alice)),
            Decision::Deny
        );
        // does not compile
        assert_eq!(
            decide(&AuthorizationRule::Predicate("(((".to_string()), Some(&alice)),
            Decision::Deny
        );
    }

    #[test]
    fn test_authorize_request() {
        let authorizer = authorizer();
        let alice = alice();
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/documents/1")
            .body(())
            .unwrap();

        let rule = AuthorizationRule::Predicate(
            "request.method == 'DELETE' && request.path.startsWith('/api/')".to_string(),
        );
        assert_eq!(
            authorizer.authorize_request(Some(&alice), &rule, &request),
            Decision::Allow
        );
        assert_eq!(
            authorizer.authorize_request(None, &rule, &request),
            Decision::Deny
        );
    }
}
