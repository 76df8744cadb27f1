//! Runtime wiring for the bridge
//!
//! [`Bridge`] owns the mapping engine, the OBS connection loop and the
//! dispatcher, and tears them down in a fixed order: stop the note source,
//! give in-flight scene changes a bounded drain, then let the reconnect loop
//! disconnect from OBS.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, BehaviorConfig};
use crate::connection::ConnectionManager;
use crate::dispatcher::{Dispatcher, SceneSwitcher};
use crate::mapping::MappingEngine;
use crate::obs::SceneTransport;
use crate::source::{NoteHandler, NoteSource};

/// A running bridge: reconnect loop and dispatcher event loop
pub struct Bridge {
    mapping: Arc<MappingEngine>,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
    // Behavior flags are fixed for the lifetime of the process
    behavior: BehaviorConfig,
    cancel: CancellationToken,
    connection_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl Bridge {
    /// Build the pipeline on `transport` and spawn its background loops.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &AppConfig, transport: Arc<dyn SceneTransport>) -> Result<Self> {
        Self::with_connection(config, ConnectionManager::new(transport, config.obs.clone()))
    }

    /// Same as [`start`](Self::start) with a preconfigured connection manager
    pub fn with_connection(config: &AppConfig, connection: ConnectionManager) -> Result<Self> {
        let mapping = Arc::new(MappingEngine::new(config.rules()?));
        let connection = Arc::new(connection);
        let switcher: Arc<dyn SceneSwitcher> = Arc::clone(&connection) as Arc<dyn SceneSwitcher>;
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&mapping), switcher, &config.behavior));

        let cancel = CancellationToken::new();

        let connection_task = {
            let connection = Arc::clone(&connection);
            let cancel = cancel.clone();
            tokio::spawn(async move { connection.run(cancel).await })
        };

        let dispatcher_task = {
            let dispatcher = Arc::clone(&dispatcher);
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(&cancel).await })
        };

        Ok(Self {
            mapping,
            connection,
            dispatcher,
            behavior: config.behavior.clone(),
            cancel,
            connection_task,
            dispatcher_task,
        })
    }

    /// Token cancelled when the bridge shuts down; hand it to the note source
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Callback feeding note events into the dispatcher
    pub fn note_handler(&self) -> NoteHandler {
        let dispatcher = Arc::clone(&self.dispatcher);
        Arc::new(move |evt| {
            dispatcher.handle_note(evt);
        })
    }

    /// Apply a reloaded configuration to the running bridge
    pub fn apply_reload(&self, new_config: &AppConfig) {
        match new_config.rules() {
            Ok(rules) => {
                info!("Reloaded {} mapping(s)", rules.len());
                self.mapping.replace(rules);
            },
            Err(e) => warn!("Keeping previous mappings: {}", e),
        }

        self.connection.update_settings(new_config.obs.clone());

        if new_config.behavior != self.behavior {
            warn!("Behavior settings changed; restart to apply them");
        }
    }

    /// Stop the bridge. Scene changes still waiting on OBS get `drain_timeout`
    /// and are then cancelled, so the disconnect never waits on OBS.
    pub async fn shutdown(self, source: &dyn NoteSource, drain_timeout: Duration) {
        info!("Shutting down...");
        self.cancel.cancel();

        if let Err(e) = source.stop().await {
            warn!("Failed to stop MIDI input: {:#}", e);
        }

        // Before the reconnect loop: a pending request can block its disconnect
        self.dispatcher.shutdown(drain_timeout).await;

        if let Err(e) = self.connection_task.await {
            warn!("OBS connection task failed: {}", e);
        }
        if let Err(e) = self.dispatcher_task.await {
            warn!("Dispatcher task failed: {}", e);
        }
    }
}
