//! OBS connection lifecycle
//!
//! [`ConnectionManager`] owns the reconnect loop: resolve the host, start a
//! connect, wait for the transport to report the outcome, then either stay
//! until the session drops or back off before the next attempt. Scene
//! requests are gated on the connection state and never fail loudly.

mod backoff;
mod rendezvous;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use rendezvous::Rendezvous;

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ObsConfig;
use crate::obs::{Endpoint, SceneTransport, TransportEvent};
use crate::resolver::HostResolver;

/// First retry delay; doubles on each consecutive failure
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Notifications for consumers that track OBS state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A session was established
    Connected,
    /// OBS reported a program scene change
    SceneChanged(String),
}

/// State shared with the transport callback
struct Shared {
    state: RwLock<ConnectionState>,
    endpoint: RwLock<Option<Endpoint>>,
    rendezvous: Rendezvous,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.state.write(), state)
    }

    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.set_state(ConnectionState::Connected);
                match self.endpoint.read().as_ref() {
                    Some(endpoint) => info!("✅ Connected to OBS at {}", endpoint.url()),
                    None => info!("✅ Connected to OBS"),
                }
                // Subscribers must see Connected before the loop moves on
                let _ = self.events.send(ConnectionEvent::Connected);
                self.rendezvous.signal();
            },
            TransportEvent::Disconnected { reason } => {
                let previous = self.set_state(ConnectionState::Disconnected);
                match previous {
                    ConnectionState::Connected => warn!("🔌 Disconnected from OBS: {}", reason),
                    ConnectionState::Connecting => warn!("Failed to connect to OBS: {}", reason),
                    ConnectionState::Disconnected => debug!("OBS disconnect while idle: {}", reason),
                }
                self.rendezvous.signal();
            },
            TransportEvent::SceneChanged(scene) => {
                let _ = self.events.send(ConnectionEvent::SceneChanged(scene));
            },
        }
    }
}

/// Keeps an OBS session alive and gates scene requests on it
pub struct ConnectionManager {
    transport: Arc<dyn SceneTransport>,
    resolver: HostResolver,
    settings: RwLock<ObsConfig>,
    shared: Arc<Shared>,
    base_delay: Duration,
}

impl ConnectionManager {
    /// Create a manager and install its callback on `transport`
    pub fn new(transport: Arc<dyn SceneTransport>, settings: ObsConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Disconnected),
            endpoint: RwLock::new(None),
            rendezvous: Rendezvous::new(),
            events,
        });

        let callback_shared = Arc::clone(&shared);
        transport.set_event_handler(Arc::new(move |event| callback_shared.on_transport_event(event)));

        Self {
            transport,
            resolver: HostResolver::new(),
            settings: RwLock::new(settings),
            shared,
            base_delay: BASE_RECONNECT_DELAY,
        }
    }

    /// Override the first retry delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Replace the connection settings; used from the next attempt on
    pub fn update_settings(&self, settings: ObsConfig) {
        let mut current = self.settings.write();
        if *current != settings {
            info!("OBS connection settings updated ({}:{})", settings.host, settings.port);
            *current = settings;
        }
    }

    /// Drive the reconnect loop until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let initial_max = self.settings.read().reconnect_max();
        let mut backoff = Backoff::new(self.base_delay, initial_max);

        while !cancel.is_cancelled() {
            let settings = self.settings.read().clone();
            backoff.set_max(settings.reconnect_max());

            self.attempt(&settings, &mut backoff, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            let delay = backoff.current();
            debug!("⏳ OBS reconnect in {}ms", delay.as_millis());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
            }
            backoff.advance();
        }

        if self.state() != ConnectionState::Disconnected {
            info!("Disconnecting from OBS");
            self.transport.disconnect().await;
            self.shared.set_state(ConnectionState::Disconnected);
        }
        debug!("OBS reconnect loop stopped");
    }

    /// One resolve/connect cycle. Returns once the attempt failed, the
    /// session ended, or `cancel` fired.
    async fn attempt(&self, settings: &ObsConfig, backoff: &mut Backoff, cancel: &CancellationToken) {
        let Some(address) = self.resolver.resolve(&settings.host, cancel).await else {
            if !cancel.is_cancelled() {
                warn!("Cannot resolve OBS host '{}'", settings.host);
            }
            return;
        };

        let endpoint = Endpoint::new(address, settings.port);
        info!("🎬 Connecting to OBS at {}", endpoint.url());
        *self.shared.endpoint.write() = Some(endpoint.clone());
        self.shared.set_state(ConnectionState::Connecting);

        if let Err(e) = self.transport.connect(&endpoint, settings.password.as_deref()).await {
            warn!("Failed to start OBS connection: {}", e);
            self.shared.set_state(ConnectionState::Disconnected);
            return;
        }

        let shared = &self.shared;
        let resolved = shared
            .rendezvous
            .wait_until(|| shared.state() != ConnectionState::Connecting, cancel)
            .await;
        if !resolved || shared.state() != ConnectionState::Connected {
            return;
        }

        backoff.reset();
        shared
            .rendezvous
            .wait_until(|| shared.state() != ConnectionState::Connected, cancel)
            .await;
    }

    /// Ask OBS to switch the program scene.
    ///
    /// Returns false without touching the transport while disconnected, and
    /// false after logging when the request fails.
    pub async fn send(&self, scene: &str, cancel: &CancellationToken) -> bool {
        if !self.is_connected() {
            return false;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scene change to \"{}\" cancelled", scene);
                return false;
            },
            result = self.transport.set_current_scene(scene) => result,
        };

        match result {
            Ok(()) => {
                info!("Switched OBS scene to \"{}\"", scene);
                true
            },
            Err(e) => {
                warn!("Failed to switch OBS scene to \"{}\": {}", scene, e);
                false
            },
        }
    }

    /// Current OBS program scene, or None when disconnected or on failure
    pub async fn query(&self, cancel: &CancellationToken) -> Option<String> {
        if !self.is_connected() {
            return None;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = self.transport.current_scene() => result,
        };

        match result {
            Ok(scene) => {
                debug!("OBS current program scene: {}", scene);
                Some(scene)
            },
            Err(e) => {
                warn!("Failed to query OBS current scene: {}", e);
                None
            },
        }
    }
}
