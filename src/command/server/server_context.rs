use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Bytes;
use hyper::{Request, Response};
use tracing::{info, instrument};

use crate::command::server::auth::{
    AuthenticationStage, Authenticator, AuthorizationStage, Authorizer, CredentialExtractor,
    CredentialSource, VerifierKind,
};
use crate::command::server::chain::{InterceptorChain, RequestContext, Stage};
use crate::command::server::error::Error;
use crate::command::server::handlers::Handlers;
use crate::command::server::response::ResponseBody;
use crate::configuration::Configuration;
use crate::documents::{DocumentService, DocumentStore};
use crate::policy::{CelEvaluator, RouteRules};

/// Everything a request needs, rebuilt from scratch on each configuration
/// change.
pub struct ServerContext {
    chain: InterceptorChain,
    max_body_size: usize,
}

impl ServerContext {
    pub fn new(config: &Configuration, documents: Arc<DocumentStore>) -> Result<Self, Error> {
        let evaluator = CelEvaluator::new(config.expressions())?;
        let authorizer = Arc::new(Authorizer::new(Arc::new(evaluator)));
        let authenticator = Arc::new(Authenticator::new(&config.auth)?);

        // one authentication stage per mechanism, in dispatch order
        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
        let mut registered = Vec::new();
        for kind in &config.auth.verifiers {
            if registered.contains(kind) {
                continue;
            }
            registered.push(*kind);

            let source = match kind {
                VerifierKind::ApiKey => {
                    CredentialSource::Header(config.auth.api_key.header_name()?)
                }
                VerifierKind::Basic => CredentialSource::Basic,
            };

            stages.push(Arc::new(AuthenticationStage::new(
                kind.as_str(),
                CredentialExtractor::new(vec![source]),
                Arc::clone(&authenticator),
            )));
        }

        let rules = RouteRules::new(&config.routes, config.default_rule.clone())?;
        stages.push(Arc::new(AuthorizationStage::new(
            rules,
            Arc::clone(&authorizer),
        )));

        let service = DocumentService::new(documents, authorizer, config.operations.clone());
        let chain = InterceptorChain::new(stages, Arc::new(Handlers::new(service)));
        info!("Interceptor chain: {}", chain.stage_names().join(" -> "));

        Ok(Self {
            chain,
            max_body_size: config.server.max_body_size,
        })
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    #[instrument(skip(self, request))]
    pub async fn process(
        &self,
        request: &Request<Bytes>,
        remote_address: Option<SocketAddr>,
    ) -> Result<Response<ResponseBody>, Error> {
        let mut context = RequestContext::new(remote_address);
        self.chain.execute(request, &mut context).await
    }
}

#[cfg(test)]
pub mod tests {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use hyper::header::WWW_AUTHENTICATE;
    use hyper::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::command::server::response::tests::body_json;

    pub static TEST_CONFIG: &str = r#"
        default_rule = "authenticated"

        [auth]
        verifiers = ["api-key", "basic"]

        [auth.api_key.keys.ci]
        key = "s3cret"
        authorities = ["documents:read"]

        [auth.api_key.keys.ops]
        key = "ops-s3cret"
        roles = ["ADMIN"]

        [auth.identity.alice]
        username = "alice"
        password = "$argon2id$v=19$m=19456,t=2,p=1$9pxWwg0VtZzDXno/25417Q$e+cuKy9VisJVxec/EEuKvvfIIIOy5yDGRzYKiuDLjx0"  # password is "password1"
        roles = ["USER"]

        [[route]]
        path = "/healthz|/metrics"
        methods = ["GET"]
        rule = "permit_all"

        [[route]]
        path = "/api/documents(/.*)?"
        methods = ["GET"]
        rule = { any_authority = ["documents:read", "ROLE_USER", "ROLE_ADMIN"] }

        [[document]]
        owner = "alice"
        title = "alice-1"

        [[document]]
        owner = "bob"
        title = "bob-1"
    "#;

    pub fn create_test_server_context() -> ServerContext {
        let config = Configuration::load_from_str(TEST_CONFIG).unwrap();
        let documents = Arc::new(DocumentStore::new(&config.documents));
        ServerContext::new(&config, documents).unwrap()
    }

    fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> Request<Bytes> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn basic(username: &str, password: &str) -> String {
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{username}:{password}"))
        )
    }

    async fn process(context: &ServerContext, request: &Request<Bytes>) -> Response<ResponseBody> {
        context
            .process(request, Some("127.0.0.1:50000".parse().unwrap()))
            .await
            .unwrap_or_else(|error| crate::command::server::response::error_to_response(&error, None))
    }

    #[tokio::test]
    async fn test_shared_secret_scenario() {
        let context = create_test_server_context();

        let response = process(
            &context,
            &request(Method::GET, "/api/me", &[("X-API-Key", "s3cret")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["principal"], "ci");
        assert_eq!(body["authorities"], json!(["documents:read"]));

        let response = process(
            &context,
            &request(Method::GET, "/api/me", &[("X-API-Key", "wrong")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Authentication error" })
        );
    }

    #[tokio::test]
    async fn test_falls_through_to_basic() {
        let context = create_test_server_context();
        let authorization = basic("alice", "password1");

        let response = process(
            &context,
            &request(Method::GET, "/api/me", &[("Authorization", authorization.as_str())]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["principal"], "alice");

        let authorization = basic("alice", "wrong");
        let response = process(
            &context,
            &request(Method::GET, "/api/me", &[("Authorization", authorization.as_str())]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_some());
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Authentication error" })
        );
    }

    #[tokio::test]
    async fn test_valid_key_does_not_cover_wrong_password() {
        let context = create_test_server_context();
        let authorization = basic("alice", "definitely-wrong");

        let response = process(
            &context,
            &request(
                Method::GET,
                "/api/me",
                &[
                    ("X-API-Key", "s3cret"),
                    ("Authorization", authorization.as_str()),
                ],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Authentication error" })
        );
    }

    #[tokio::test]
    async fn test_lowercase_basic_scheme_is_verified() {
        let context = create_test_server_context();
        let authorization = basic("alice", "wrong").replacen("Basic", "basic", 1);

        let response = process(
            &context,
            &request(Method::GET, "/healthz", &[("Authorization", authorization.as_str())]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_user_and_wrong_password_look_alike() {
        let context = create_test_server_context();

        let unknown = basic("mallory", "password1");
        let wrong = basic("alice", "password2");

        let first = process(
            &context,
            &request(Method::GET, "/api/me", &[("Authorization", unknown.as_str())]),
        )
        .await;
        let second = process(
            &context,
            &request(Method::GET, "/api/me", &[("Authorization", wrong.as_str())]),
        )
        .await;

        assert_eq!(first.status(), second.status());
        assert_eq!(body_json(first).await, body_json(second).await);
    }

    #[tokio::test]
    async fn test_anonymous_requests() {
        let context = create_test_server_context();

        let response = process(&context, &request(Method::GET, "/healthz", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = process(&context, &request(Method::GET, "/api/documents", &[])).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Access denied" })
        );

        let response = process(&context, &request(Method::GET, "/api/me", &[])).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_documents_are_filtered_per_identity() {
        let context = create_test_server_context();
        let authorization = basic("alice", "password1");

        let response = process(
            &context,
            &request(
                Method::GET,
                "/api/documents",
                &[("Authorization", authorization.as_str())],
            ),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["owner"], "alice");

        let response = process(
            &context,
            &request(Method::GET, "/api/documents", &[("X-API-Key", "ops-s3cret")]),
        )
        .await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_route_rule_denies_missing_authority() {
        let config = Configuration::load_from_str(
            r#"
            [auth.api_key.keys.ci]
            key = "s3cret"

            [[route]]
            path = "/api/.*"
            rule = { authority = "documents:read" }
            "#,
        )
        .unwrap();
        let context = ServerContext::new(&config, Arc::new(DocumentStore::default())).unwrap();

        let response = process(
            &context,
            &request(Method::GET, "/api/me", &[("X-API-Key", "s3cret")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_shipped_config_builds() {
        let config = Configuration::load_from_str(include_str!("../../../config.toml")).unwrap();
        let documents = Arc::new(DocumentStore::new(&config.documents));

        assert!(ServerContext::new(&config, documents).is_ok());
    }

    #[test]
    fn test_invalid_configuration_fails() {
        let config = Configuration::load_from_str(
            r#"
            [[route]]
            path = "/api/.*"
            rule = { expression = "identity.principal == " }
            "#,
        )
        .unwrap();

        let result = ServerContext::new(&config, Arc::new(DocumentStore::default()));
        assert!(matches!(result, Err(Error::Initialization(_))));
    }
}
