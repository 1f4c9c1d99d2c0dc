use std::sync::Arc;

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response};
use tracing::{debug, error, instrument, warn};

use super::{Authenticator, Authorizer, CredentialExtractor, CredentialSource};
use crate::command::server::chain::{Next, RequestContext, Stage};
use crate::command::server::error::Error;
use crate::command::server::response::{access_denied, authentication_failure, ResponseBody};
use crate::policy::RouteRules;

/// Extracts a credential, hands it to the authenticator and records the
/// resulting identity on the request context.
///
/// Requests without a credential pass through untouched. Every extracted
/// credential is verified, even when an earlier stage already established an
/// identity: a failed authentication clears that identity and ends the chain
/// with a 401 whose body is identical whatever the cause.
pub struct AuthenticationStage {
    name: String,
    extractor: CredentialExtractor,
    authenticator: Arc<Authenticator>,
}

impl AuthenticationStage {
    pub fn new(
        name: impl Into<String>,
        extractor: CredentialExtractor,
        authenticator: Arc<Authenticator>,
    ) -> Self {
        Self {
            name: name.into(),
            extractor,
            authenticator,
        }
    }

    fn log_failure(&self, error: &Error, context: &RequestContext, mechanism: &str) {
        let remote_address = context.remote_address;
        let category = error.category();

        match error {
            Error::UnsupportedCredentialType(_) => error!(
                ?remote_address,
                mechanism, category, "Authentication misconfigured: {error}"
            ),
            Error::CollaboratorUnavailable(_) => error!(
                ?remote_address,
                mechanism, category, "Authentication could not complete: {error}"
            ),
            _ => warn!(
                ?remote_address,
                mechanism, category, "Authentication failed"
            ),
        }
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(stage = %self.name))]
    async fn process(
        &self,
        request: &Request<Bytes>,
        context: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response<ResponseBody>, Error> {
        let Some(credential) = self.extractor.extract(request.headers()) else {
            debug!("No credential found, continuing");
            return next.run(request, context).await;
        };

        match self.authenticator.authenticate(&credential).await {
            Ok(identity) => {
                context.identity = Some(identity);
                next.run(request, context).await
            }
            Err(error) => {
                context.identity = None;
                self.log_failure(&error, context, credential.kind().as_str());

                let challenge = self.extractor.has_source(&CredentialSource::Basic);
                Ok(authentication_failure(challenge))
            }
        }
    }
}

/// Route-level authorization: the first route rule matching the request
/// decides, a denial ends the chain with a 403.
pub struct AuthorizationStage {
    rules: RouteRules,
    authorizer: Arc<Authorizer>,
}

impl AuthorizationStage {
    pub fn new(rules: RouteRules, authorizer: Arc<Authorizer>) -> Self {
        Self { rules, authorizer }
    }
}

#[async_trait]
impl Stage for AuthorizationStage {
    fn name(&self) -> &str {
        "authorization"
    }

    async fn process(
        &self,
        request: &Request<Bytes>,
        context: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response<ResponseBody>, Error> {
        let rule = self.rules.rule_for(request.method(), request.uri().path());

        let decision = self
            .authorizer
            .authorize_request(context.identity.as_ref(), rule, request);

        if decision.is_allowed() {
            next.run(request, context).await
        } else {
            Ok(access_denied())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use hyper::header::{HeaderName, WWW_AUTHENTICATE};
    use hyper::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::command::server::auth::api_key::{ApiKeyVerifier, KeyConfig};
    use crate::command::server::auth::Verifier;
    use crate::command::server::chain::{ChainState, Endpoint, InterceptorChain};
    use crate::command::server::response::json_response;
    use crate::command::server::response::tests::body_json;
    use crate::identity::Identity;
    use crate::policy::{AuthorizationRule, CelEvaluator, RouteRuleConfig};

    struct WhoAmI;

    #[async_trait]
    impl Endpoint for WhoAmI {
        async fn call(
            &self,
            _request: &Request<Bytes>,
            context: &RequestContext,
        ) -> Result<Response<ResponseBody>, Error> {
            let principal = context.identity.as_ref().map(Identity::principal);
            json_response(hyper::StatusCode::OK, &json!({ "principal": principal }))
        }
    }

    struct Preset;

    #[async_trait]
    impl Stage for Preset {
        fn name(&self) -> &str {
            "preset"
        }

        async fn process(
            &self,
            request: &Request<Bytes>,
            context: &mut RequestContext,
            next: Next<'_>,
        ) -> Result<Response<ResponseBody>, Error> {
            context.identity = Some(Identity::verified("upstream", ["ROLE_USER"], "mtls"));
            next.run(request, context).await
        }
    }

    fn api_key_authenticator() -> Arc<Authenticator> {
        let keys = BTreeMap::from([(
            "ci".to_string(),
            KeyConfig {
                key: Some("s3cret".to_string()),
                authorities: vec!["documents:read".to_string()],
                ..KeyConfig::default()
            },
        )]);
        let verifier: Arc<dyn Verifier> = Arc::new(ApiKeyVerifier::new(&keys).unwrap());
        Arc::new(Authenticator::with_verifiers(vec![verifier]))
    }

    fn api_key_stage() -> Arc<dyn Stage> {
        let extractor = CredentialExtractor::new(vec![CredentialSource::Header(
            HeaderName::from_static("x-api-key"),
        )]);
        Arc::new(AuthenticationStage::new(
            "api-key",
            extractor,
            api_key_authenticator(),
        ))
    }

    fn basic_stage() -> Arc<dyn Stage> {
        // no verifier for username/password credentials
        let extractor = CredentialExtractor::new(vec![CredentialSource::Basic]);
        Arc::new(AuthenticationStage::new(
            "basic",
            extractor,
            api_key_authenticator(),
        ))
    }

    fn authorization_stage(routes: &[RouteRuleConfig]) -> Arc<dyn Stage> {
        let rules = RouteRules::new(routes, AuthorizationRule::Authenticated).unwrap();
        let authorizer = Authorizer::new(Arc::new(CelEvaluator::new([]).unwrap()));
        Arc::new(AuthorizationStage::new(rules, Arc::new(authorizer)))
    }

    fn request(headers: &[(&str, &str)]) -> Request<Bytes> {
        let mut builder = Request::builder().uri("/api/documents");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Bytes::new()).unwrap()
    }

    async fn run(
        stages: Vec<Arc<dyn Stage>>,
        request: &Request<Bytes>,
    ) -> (Response<ResponseBody>, RequestContext) {
        let chain = InterceptorChain::new(stages, Arc::new(WhoAmI));
        let mut context = RequestContext::new(Some("127.0.0.1:40000".parse().unwrap()));
        let response = chain.execute(request, &mut context).await.unwrap();
        (response, context)
    }

    #[tokio::test]
    async fn test_valid_credential_sets_identity() {
        let (response, context) = run(
            vec![api_key_stage()],
            &request(&[("X-API-Key", "s3cret")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(context.identity.unwrap().principal(), "ci");
        assert_eq!(body_json(response).await["principal"], "ci");
    }

    #[tokio::test]
    async fn test_missing_credential_passes_through() {
        let (response, context) = run(vec![api_key_stage()], &request(&[])).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(context.identity.is_none());
        assert_eq!(context.state(), ChainState::Completed);
    }

    #[tokio::test]
    async fn test_invalid_credential_short_circuits_with_401() {
        let (response, context) =
            run(vec![api_key_stage()], &request(&[("X-API-Key", "wrong")])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
        assert!(context.identity.is_none());
        assert_eq!(context.state(), ChainState::ShortCircuited);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Authentication error" })
        );
    }

    #[tokio::test]
    async fn test_unsupported_credential_has_same_response() {
        let header = format!("Basic {}", BASE64_STANDARD.encode("alice:password1"));
        let (response, context) = run(
            vec![basic_stage()],
            &request(&[("Authorization", header.as_str())]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_some());
        assert_eq!(context.state(), ChainState::ShortCircuited);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Authentication error" })
        );
    }

    #[tokio::test]
    async fn test_invalid_credential_clears_existing_identity() {
        let preset: Arc<dyn Stage> = Arc::new(Preset);
        let (response, context) = run(
            vec![preset, api_key_stage()],
            &request(&[("X-API-Key", "wrong")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(context.identity.is_none());
        assert_eq!(context.state(), ChainState::ShortCircuited);
    }

    #[tokio::test]
    async fn test_valid_key_with_unverifiable_basic_is_rejected() {
        let header = format!("Basic {}", BASE64_STANDARD.encode("alice:wrong"));
        let (response, context) = run(
            vec![api_key_stage(), basic_stage()],
            &request(&[("X-API-Key", "s3cret"), ("Authorization", header.as_str())]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(context.identity.is_none());
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Authentication error" })
        );
    }

    #[tokio::test]
    async fn test_authorization_denies_anonymous_with_403() {
        let (response, context) = run(
            vec![api_key_stage(), authorization_stage(&[])],
            &request(&[]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(context.state(), ChainState::ShortCircuited);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Access denied" })
        );
    }

    #[tokio::test]
    async fn test_authorization_route_rules() {
        let routes = vec![
            RouteRuleConfig {
                path: "/api/documents".to_string(),
                methods: vec!["GET".to_string()],
                rule: AuthorizationRule::RequiresAuthority("documents:read".to_string()),
            },
            RouteRuleConfig {
                path: "/public".to_string(),
                methods: vec![],
                rule: AuthorizationRule::PermitAll,
            },
        ];

        let (response, _) = run(
            vec![api_key_stage(), authorization_stage(&routes)],
            &request(&[("X-API-Key", "s3cret")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let public = Request::builder().uri("/public").body(Bytes::new()).unwrap();
        let (response, context) =
            run(vec![api_key_stage(), authorization_stage(&routes)], &public).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(context.identity.is_none());
    }
}
