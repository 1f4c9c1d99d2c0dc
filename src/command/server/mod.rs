use std::sync::Arc;

use argh::FromArgs;

use crate::command;
use crate::configuration::Configuration;
use crate::documents::DocumentStore;

pub mod auth;
mod chain;
mod error;
mod handlers;
mod http_server;
mod listener;
mod request_ext;
mod response;
mod router;
mod server_context;

pub use error::Error;
pub use server_context::ServerContext;

use listener::HttpListener;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the guarded document service"
)]
pub struct Options {}

pub struct Command {
    listener: HttpListener,
    documents: Arc<DocumentStore>,
}

impl Command {
    pub fn new(config: &Configuration) -> Result<Command, Error> {
        let documents = Arc::new(DocumentStore::new(&config.documents));
        let context = ServerContext::new(config, Arc::clone(&documents))?;
        let listener = HttpListener::new(&config.server, context);

        Ok(Command {
            listener,
            documents,
        })
    }

    /// Rebuilds the request pipeline from `config`. Documents created at
    /// runtime survive the reload; the `[[document]]` seed is only read at
    /// startup.
    pub fn notify_config_change(&self, config: &Configuration) -> Result<(), Error> {
        let context = ServerContext::new(config, Arc::clone(&self.documents))?;
        self.listener.notify_config_change(&config.server, context);
        Ok(())
    }

    #[cfg(test)]
    pub fn current_context(&self) -> Arc<ServerContext> {
        self.listener.current_context()
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        self.listener.serve().await?;
        Ok(())
    }
}
