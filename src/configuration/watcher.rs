use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::command::{self, server};
use crate::configuration::Configuration;

/// Reloads the server pipeline whenever the configuration file is modified.
pub struct ConfigWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn new(config_path: &str, server: Arc<server::Command>) -> Result<Self, command::Error> {
        info!("Setting up config watcher for: {config_path}");

        let config_file_path = std::fs::canonicalize(PathBuf::from(config_path))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = watch_config_loop(config_file_path, server).await {
                error!("Config watcher failed: {e}");
            }
        });

        Ok(Self { _handle: handle })
    }
}

async fn watch_config_loop(
    config_path: PathBuf,
    server: Arc<server::Command>,
) -> Result<(), command::Error> {
    let (tx, mut rx) = mpsc::channel::<Event>(100);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            let _ = tx.blocking_send(event);
        }
    })?;
    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

    while let Some(event) = rx.recv().await {
        if is_config_change(&event, &config_path) {
            info!("Configuration file changed, reloading");
            reload_config(&server, &config_path);
        }
    }

    error!("Config watcher channel closed");
    Ok(())
}

fn is_config_change(event: &Event, config_path: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
    ) && event.paths.iter().any(|p| p == config_path)
}

/// A configuration that fails to load or to build leaves the running
/// pipeline untouched.
fn reload_config(server: &server::Command, config_path: &Path) {
    let config = match Configuration::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to reload configuration: {e}");
            return;
        }
    };

    if let Err(e) = server.notify_config_change(&config) {
        error!("Failed to apply configuration change: {e}");
    } else {
        info!("Configuration reloaded");
    }
}
