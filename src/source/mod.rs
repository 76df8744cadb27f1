//! Note event sources

mod midir_source;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::midi::NoteEvent;

pub use midir_source::{list_input_ports, MidirSource};

/// Callback invoked for every note event, possibly from a non-async thread
pub type NoteHandler = Arc<dyn Fn(NoteEvent) + Send + Sync>;

/// Something that produces note events
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Set the handler that receives events, replacing any previous one
    fn subscribe(&self, handler: NoteHandler);

    /// Open the input. Delivery stops when `cancel` fires or on [`stop`](Self::stop).
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Close the input; no events are delivered once this returns
    async fn stop(&self) -> Result<()>;
}
