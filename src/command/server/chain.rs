use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response};
use tracing::{debug, instrument};

use crate::command::server::error::Error;
use crate::command::server::response::ResponseBody;
use crate::identity::Identity;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    NotStarted,
    /// The stage at this index is running.
    InProgress(usize),
    /// Every stage passed the request on and the endpoint was invoked.
    Completed,
    /// A stage answered without handing the request to the rest of the chain.
    ShortCircuited,
}

/// Per-request state shared by the stages of one chain execution.
///
/// The identity slot lives here and nowhere else, so it is discarded with the
/// request.
#[derive(Debug)]
pub struct RequestContext {
    pub remote_address: Option<SocketAddr>,
    pub identity: Option<Identity>,
    state: ChainState,
}

impl RequestContext {
    pub fn new(remote_address: Option<SocketAddr>) -> Self {
        Self {
            remote_address,
            identity: None,
            state: ChainState::NotStarted,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }
}

/// One interceptor of the chain.
///
/// A stage either answers itself (short-circuit) or delegates to `next`.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        request: &Request<Bytes>,
        context: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response<ResponseBody>, Error>;
}

/// What runs once all stages have passed the request on.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(
        &self,
        request: &Request<Bytes>,
        context: &RequestContext,
    ) -> Result<Response<ResponseBody>, Error>;
}

/// The remainder of the chain, handed to the running stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    index: usize,
    endpoint: &'a dyn Endpoint,
}

impl Next<'_> {
    pub async fn run(
        self,
        request: &Request<Bytes>,
        context: &mut RequestContext,
    ) -> Result<Response<ResponseBody>, Error> {
        let Some(stage) = self.stages.get(self.index) else {
            context.state = ChainState::Completed;
            return self.endpoint.call(request, context).await;
        };

        context.state = ChainState::InProgress(self.index);
        let next = Next {
            stages: self.stages,
            index: self.index + 1,
            endpoint: self.endpoint,
        };

        let response = stage.process(request, context, next).await;

        if context.state == ChainState::InProgress(self.index) {
            debug!(stage = stage.name(), "Chain short-circuited");
            context.state = ChainState::ShortCircuited;
        }

        response
    }
}

/// Ordered stages in front of an endpoint.
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Stage>>,
    endpoint: Arc<dyn Endpoint>,
}

impl InterceptorChain {
    pub fn new(stages: Vec<Arc<dyn Stage>>, endpoint: Arc<dyn Endpoint>) -> Self {
        Self { stages, endpoint }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        request: &Request<Bytes>,
        context: &mut RequestContext,
    ) -> Result<Response<ResponseBody>, Error> {
        let next = Next {
            stages: &self.stages,
            index: 0,
            endpoint: self.endpoint.as_ref(),
        };

        next.run(request, context).await
    }
}
