//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay before re-reading, so editors can finish writing
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and yields each successfully validated reload
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    reloads: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the initial config and start watching the file
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let (tx, reloads) = mpsc::channel(4);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // Watch the directory: editors often replace the file instead of writing in place
        let path = PathBuf::from(&config_path);
        let file_name = path.file_name().map(|n| n.to_os_string());
        let watch_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Config watch error: {}", e);
                    return;
                },
            };

            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }

            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_config {
                return;
            }

            debug!("Config file changed: {:?}", event.paths);

            let config_path = config_path_for_reload(&path);
            let tx = tx.clone();
            runtime_handle.spawn(async move {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;

                match AppConfig::load(&config_path).await {
                    Ok(new_config) => {
                        info!("Configuration reloaded successfully");
                        if let Err(e) = tx.send(new_config).await {
                            error!("Failed to send config update: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to reload config (keeping old config): {:#}", e);
                    },
                }
            });
        })?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", watch_dir.display()))?;

        info!("Watching {} for changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                reloads,
            },
            Arc::new(initial_config),
        ))
    }

    /// Next validated configuration, or None once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.reloads.recv().await
    }
}

fn config_path_for_reload(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
