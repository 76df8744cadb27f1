//! obws-backed OBS WebSocket transport
//!
//! Connects in a background task and reports the outcome through the
//! registered [`TransportCallback`]. The same task then listens to OBS events,
//! forwards program scene changes, and reports the end of the event stream as
//! a disconnect.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, trace, warn};

use super::{Endpoint, SceneTransport, TransportCallback, TransportError, TransportEvent};

type ClientSlot = Arc<AsyncRwLock<Option<Arc<obws::Client>>>>;
type HandlerSlot = Arc<RwLock<Option<TransportCallback>>>;

/// OBS Studio WebSocket transport built on `obws`
pub struct ObwsTransport {
    // OBS client (wrapped for interior mutability)
    client: ClientSlot,
    handler: HandlerSlot,
    // Bumped on every connect/disconnect so stale tasks stay silent
    generation: Arc<AtomicU64>,
}

/// Everything one connect attempt's background task needs
struct Session {
    id: u64,
    host: String,
    port: u16,
    password: Option<String>,
    client: ClientSlot,
    handler: HandlerSlot,
    generation: Arc<AtomicU64>,
}

impl Session {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.id
    }

    fn emit(&self, event: TransportEvent) {
        if self.is_current() {
            emit(&self.handler, event);
        }
    }

    async fn run(self) {
        let client = match obws::Client::connect(self.host.clone(), self.port, self.password.clone()).await {
            Ok(client) => client,
            Err(e) => {
                self.emit(TransportEvent::Disconnected { reason: e.to_string() });
                return;
            },
        };

        let events = match client.events() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to get OBS event stream: {}", e);
                self.emit(TransportEvent::Disconnected { reason: e.to_string() });
                return;
            },
        };

        {
            let mut slot = self.client.write().await;
            if !self.is_current() {
                debug!("Discarding superseded OBS connection");
                return;
            }
            *slot = Some(Arc::new(client));
        }

        self.emit(TransportEvent::Connected);

        use obws::events::Event;
        use tokio_stream::StreamExt;

        tokio::pin!(events);
        while let Some(event) = events.next().await {
            if !self.is_current() {
                return;
            }
            match event {
                Event::CurrentProgramSceneChanged { name } => {
                    debug!("OBS program scene changed: {}", name);
                    self.emit(TransportEvent::SceneChanged(name));
                },
                _ => trace!("Ignoring unrelated OBS event"),
            }
        }

        // Stream ended (disconnected)
        let mut slot = self.client.write().await;
        if self.is_current() {
            slot.take();
            drop(slot);
            self.emit(TransportEvent::Disconnected {
                reason: "event stream closed".to_string(),
            });
        }
    }
}

fn emit(handler: &RwLock<Option<TransportCallback>>, event: TransportEvent) {
    // Clone out of the lock so the callback never runs under it
    let callback = handler.read().clone();
    if let Some(callback) = callback {
        callback(event);
    }
}

impl ObwsTransport {
    pub fn new() -> Self {
        Self {
            client: Arc::new(AsyncRwLock::new(None)),
            handler: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The live client, taken out of the slot so no request awaits under the lock
    async fn current_client(&self) -> Result<Arc<obws::Client>, TransportError> {
        self.client.read().await.clone().ok_or(TransportError::NotConnected)
    }
}

impl Default for ObwsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SceneTransport for ObwsTransport {
    fn set_event_handler(&self, handler: TransportCallback) {
        *self.handler.write() = Some(handler);
    }

    async fn connect(&self, endpoint: &Endpoint, password: Option<&str>) -> Result<(), TransportError> {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let session = Session {
            id,
            host: endpoint.host.clone(),
            port: endpoint.port,
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
            client: Arc::clone(&self.client),
            handler: Arc::clone(&self.handler),
            generation: Arc::clone(&self.generation),
        };

        tokio::spawn(session.run());
        Ok(())
    }

    async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let client = self.client.write().await.take();
        if let Some(client) = client {
            // Closes once no request holds a reference
            drop(client);
            emit(&self.handler, TransportEvent::Disconnected {
                reason: "disconnect requested".to_string(),
            });
        }
    }

    async fn set_current_scene(&self, scene: &str) -> Result<(), TransportError> {
        let client = self.current_client().await?;
        client
            .scenes()
            .set_current_program_scene(scene)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn current_scene(&self) -> Result<String, TransportError> {
        let client = self.current_client().await?;
        client
            .scenes()
            .current_program_scene()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }
}
