//! Note event dispatch
//!
//! Turns incoming note events into scene switches:
//! - Unmapped notes are ignored
//! - While OBS is disconnected requests are dropped, with a rate-limited warning
//! - Optionally skips requests for the scene OBS is already showing
//! - Sends run as tracked background tasks so the MIDI callback never waits on I/O
//!
//! The scene cache is advisory. Confirmed sends, the seed query after each
//! connect, and remote scene changes all write it, and the last write wins.
//! A request can therefore be skipped or sent based on a slightly stale view
//! of OBS; the next note corrects it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::BehaviorConfig;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::mapping::MappingEngine;
use crate::midi::NoteEvent;
use crate::rate_limiter::RateLimiter;

/// The connection-side operations the dispatcher relies on
#[async_trait]
pub trait SceneSwitcher: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn send(&self, scene: &str, cancel: &CancellationToken) -> bool;
    async fn query(&self, cancel: &CancellationToken) -> Option<String>;
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[async_trait]
impl SceneSwitcher for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    async fn send(&self, scene: &str, cancel: &CancellationToken) -> bool {
        ConnectionManager::send(self, scene, cancel).await
    }

    async fn query(&self, cancel: &CancellationToken) -> Option<String> {
        ConnectionManager::query(self, cancel).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        ConnectionManager::subscribe(self)
    }
}

/// Last known OBS program scene
#[derive(Debug, Default)]
pub struct SceneCache {
    current: Mutex<Option<String>>,
}

impl SceneCache {
    pub fn get(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn set(&self, scene: impl Into<String>) {
        *self.current.lock() = Some(scene.into());
    }

    /// Exact, case-sensitive comparison
    pub fn is(&self, scene: &str) -> bool {
        self.current.lock().as_deref() == Some(scene)
    }
}

/// What [`Dispatcher::handle_note`] did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No mapping rule matched
    Unmapped,
    /// OBS was disconnected; `warned` is true if this drop was logged
    DroppedDisconnected { warned: bool },
    /// Deduplicated against the cached scene
    AlreadyOnScene,
    /// A send for this scene was started
    Scheduled(String),
}

pub struct Dispatcher {
    mapping: Arc<MappingEngine>,
    switcher: Arc<dyn SceneSwitcher>,
    skip_current: bool,
    disconnected_warning: RateLimiter,
    cache: Arc<SceneCache>,
    tasks: TaskTracker,
    // Cancelled only when draining in-flight sends times out
    drain: CancellationToken,
    runtime: Handle,
    events: Mutex<Option<broadcast::Receiver<ConnectionEvent>>>,
}

impl Dispatcher {
    /// Create a dispatcher. Must be called from within a Tokio runtime; sends
    /// are spawned on it even when notes arrive on a foreign thread.
    pub fn new(mapping: Arc<MappingEngine>, switcher: Arc<dyn SceneSwitcher>, behavior: &BehaviorConfig) -> Self {
        // Subscribe now so a connect before run() starts is not missed
        let events = switcher.subscribe();

        Self {
            mapping,
            switcher,
            skip_current: behavior.ignore_if_already_on_scene,
            disconnected_warning: RateLimiter::new(behavior.disconnected_log_interval()),
            cache: Arc::new(SceneCache::default()),
            tasks: TaskTracker::new(),
            drain: CancellationToken::new(),
            runtime: Handle::current(),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn cache(&self) -> &SceneCache {
        &self.cache
    }

    /// Handle one note event without blocking
    pub fn handle_note(&self, evt: NoteEvent) -> Dispatch {
        let Some(scene) = self.mapping.try_map(&evt) else {
            return Dispatch::Unmapped;
        };

        if !self.switcher.is_connected() {
            let warned = self.disconnected_warning.try_acquire();
            if warned {
                warn!("OBS disconnected; dropped scene change request for \"{}\"", scene);
            }
            return Dispatch::DroppedDisconnected { warned };
        }

        if self.skip_current && self.cache.is(&scene) {
            debug!("Already on scene \"{}\", skipping", scene);
            return Dispatch::AlreadyOnScene;
        }

        let switcher = Arc::clone(&self.switcher);
        let cache = Arc::clone(&self.cache);
        let drain = self.drain.clone();
        let target = scene.clone();
        self.tasks.spawn_on(
            async move {
                if switcher.send(&target, &drain).await {
                    cache.set(target);
                }
            },
            &self.runtime,
        );

        Dispatch::Scheduled(scene)
    }

    /// Keep the scene cache in step with OBS until `cancel` fires
    pub async fn run(&self, cancel: &CancellationToken) {
        let receiver = self.events.lock().take();
        let Some(mut events) = receiver else {
            warn!("Dispatcher event loop already running");
            return;
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ConnectionEvent::Connected) => {
                    if let Some(scene) = self.switcher.query(cancel).await {
                        debug!("Seeded scene cache with \"{}\"", scene);
                        self.cache.set(scene);
                    }
                },
                Ok(ConnectionEvent::SceneChanged(scene)) => {
                    debug!("OBS switched to \"{}\"", scene);
                    self.cache.set(scene);
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dispatcher lagged, skipped {} connection events", skipped);
                },
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Wait for in-flight sends, cancelling them after `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.tasks.close();
        if self.tasks.is_empty() {
            return;
        }

        info!("Waiting for {} pending scene change(s)", self.tasks.len());
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!("Pending scene changes did not finish within {:?}, cancelling", timeout);
            self.drain.cancel();
            self.tasks.wait().await;
        }
    }

    /// Wait for every send started so far
    #[cfg(test)]
    async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
