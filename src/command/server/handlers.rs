use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{instrument, warn};

use crate::command::server::chain::{Endpoint, RequestContext};
use crate::command::server::error::Error;
use crate::command::server::response::{json_response, ResponseBody};
use crate::command::server::router::{self, Route};
use crate::documents::{DocumentService, DocumentUpdate, NewDocument};
use crate::identity::Identity;
use crate::metrics_provider::METRICS_PROVIDER;

/// Terminal endpoint of the interceptor chain.
pub struct Handlers {
    documents: DocumentService,
}

impl Handlers {
    pub fn new(documents: DocumentService) -> Self {
        Self { documents }
    }
}

fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Invalid request body: {e}");
        Error::BadRequest(format!("invalid JSON body: {e}"))
    })
}

#[async_trait]
impl Endpoint for Handlers {
    #[instrument(skip_all)]
    async fn call(
        &self,
        request: &Request<Bytes>,
        context: &RequestContext,
    ) -> Result<Response<ResponseBody>, Error> {
        let identity = context.identity.as_ref();

        match router::parse(request.method(), request.uri().path()) {
            Route::Unknown => handle_unknown_route(request),
            Route::Healthz => handle_healthz(),
            Route::Metrics => handle_metrics(),
            Route::Me => handle_me(identity),
            Route::ListDocuments => {
                let documents = self.documents.list(identity).await?;
                json_response(StatusCode::OK, &documents)
            }
            Route::CreateDocuments => {
                let documents: Vec<NewDocument> = parse_json_body(request.body())?;
                let created = self.documents.create(identity, documents).await?;
                json_response(StatusCode::CREATED, &created)
            }
            Route::GetDocument { id } => {
                let document = self.documents.get(identity, id).await?;
                json_response(StatusCode::OK, &document)
            }
            Route::UpdateDocument { id } => {
                let update: DocumentUpdate = parse_json_body(request.body())?;
                let document = self.documents.update(identity, id, update).await?;
                json_response(StatusCode::OK, &document)
            }
            Route::DeleteDocument { id } => {
                let document = self.documents.delete(identity, id).await?;
                json_response(StatusCode::OK, &document)
            }
        }
    }
}

fn handle_unknown_route(request: &Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
    if [Method::GET, Method::HEAD].contains(request.method()) {
        let msg = format!("unknown route: {} {}", request.method(), request.uri());
        Err(Error::NotFound(msg))
    } else {
        let msg = format!("unsupported route: {} {}", request.method(), request.uri());
        Err(Error::BadRequest(msg))
    }
}

fn handle_healthz() -> Result<Response<ResponseBody>, Error> {
    json_response(StatusCode::OK, &json!({ "status": "ok" }))
}

fn handle_metrics() -> Result<Response<ResponseBody>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(ResponseBody::new(Bytes::from(metrics)));

    match response {
        Ok(resp) => Ok(resp),
        Err(e) => {
            let msg = format!("Failed to build metrics response: {e}");
            Err(Error::Internal(msg))
        }
    }
}

fn handle_me(identity: Option<&Identity>) -> Result<Response<ResponseBody>, Error> {
    match identity {
        Some(identity) => json_response(StatusCode::OK, identity),
        None => json_response(StatusCode::OK, &json!({ "principal": null })),
    }
}
