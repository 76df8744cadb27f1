//! OBS Studio transport
//!
//! Defines the contract the connection manager consumes:
//! - Asynchronous connect whose outcome arrives as a [`TransportEvent`]
//! - Program scene switching and readout
//! - Remote scene-change notifications

mod transport;

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::resolver::format_for_uri;

pub use transport::ObwsTransport;

/// Notifications raised by a transport, possibly from any thread or task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established and authenticated
    Connected,
    /// Connect attempt failed or an established session ended
    Disconnected { reason: String },
    /// The program scene was changed on the OBS side
    SceneChanged(String),
}

/// Callback type for transport notifications
pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Transport request failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("OBS not connected")]
    NotConnected,
    #[error("OBS request failed: {0}")]
    Request(String),
}

/// Resolved WebSocket endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host as it appears in a URI (IPv6 bracketed)
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            host: format_for_uri(address),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Remote control endpoint the bridge switches scenes on
///
/// Note: All methods take &self so the transport can be shared as
/// `Arc<dyn SceneTransport>`; implementations use interior mutability.
#[async_trait]
pub trait SceneTransport: Send + Sync {
    /// Register the callback that receives connection and scene notifications
    fn set_event_handler(&self, handler: TransportCallback);

    /// Begin connecting to `endpoint`.
    ///
    /// Returns once the attempt is under way; the outcome is reported through
    /// the event handler as `Connected` or `Disconnected`.
    async fn connect(&self, endpoint: &Endpoint, password: Option<&str>) -> Result<(), TransportError>;

    /// Close the current session, if any
    async fn disconnect(&self);

    /// Switch the program scene
    async fn set_current_scene(&self, scene: &str) -> Result<(), TransportError>;

    /// Read the current program scene
    async fn current_scene(&self) -> Result<String, TransportError>;
}
