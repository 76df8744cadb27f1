//! midir-backed note source
//!
//! The midir connection lives on a dedicated "midi-input" thread for its
//! whole lifetime; midir invokes the input callback on its own backend thread.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use midir::{Ignore, MidiInput, MidiInputConnection};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{NoteHandler, NoteSource};
use crate::config::MidiConfig;
use crate::midi::{format_hex, MidiMessage, NoteEvent};

type HandlerSlot = Arc<RwLock<Option<NoteHandler>>>;

/// Running listener thread
struct Listener {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    active: Arc<AtomicBool>,
    cancel_watch: tokio::task::JoinHandle<()>,
}

/// Note source reading from a MIDI input port
pub struct MidirSource {
    config: MidiConfig,
    handler: HandlerSlot,
    listener: Mutex<Option<Listener>>,
}

impl MidirSource {
    pub fn new(config: MidiConfig) -> Self {
        Self {
            config,
            handler: Arc::new(RwLock::new(None)),
            listener: Mutex::new(None),
        }
    }
}

#[async_trait]
impl NoteSource for MidirSource {
    fn subscribe(&self, handler: NoteHandler) {
        *self.handler.write() = Some(handler);
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        if self.listener.lock().is_some() {
            anyhow::bail!("MIDI input already started");
        }

        let (ready_tx, ready_rx) = oneshot::channel::<Result<String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let active = Arc::new(AtomicBool::new(true));

        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);
        let callback_active = Arc::clone(&active);

        let thread = std::thread::Builder::new()
            .name("midi-input".to_string())
            .spawn(move || {
                let callback = move |_timestamp: u64, data: &[u8], _: &mut ()| {
                    if callback_active.load(Ordering::SeqCst) {
                        deliver(data, &handler);
                    }
                };

                let connection = match open_connection(&config, callback) {
                    Ok((connection, port_name)) => {
                        let _ = ready_tx.send(Ok(port_name));
                        connection
                    },
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    },
                };

                // Returns on stop or when the sender is gone
                let _ = stop_rx.recv();
                let _ = connection.close();
                debug!("MIDI listener thread exiting");
            })
            .context("Failed to spawn MIDI listener thread")?;

        let port_name = match ready_rx.await {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            },
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow!("MIDI listener thread exited during startup"));
            },
        };

        info!("🎹 Listening for MIDI on '{}'", port_name);

        let stop_on_cancel = stop_tx.clone();
        let cancel_active = Arc::clone(&active);
        let cancel_watch = tokio::spawn(async move {
            cancel.cancelled().await;
            cancel_active.store(false, Ordering::SeqCst);
            let _ = stop_on_cancel.send(());
        });

        *self.listener.lock() = Some(Listener {
            stop_tx,
            thread,
            active,
            cancel_watch,
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let listener = self.listener.lock().take();
        let Some(listener) = listener else {
            return Ok(());
        };

        listener.active.store(false, Ordering::SeqCst);
        listener.cancel_watch.abort();
        let _ = listener.stop_tx.send(());

        tokio::task::spawn_blocking(move || listener.thread.join())
            .await
            .context("Failed to join MIDI listener thread")?
            .map_err(|_| anyhow!("MIDI listener thread panicked"))?;

        info!("MIDI input closed");
        Ok(())
    }
}

/// Parse raw bytes and hand note events to the current handler
fn deliver(data: &[u8], handler: &RwLock<Option<NoteHandler>>) {
    let Some(message) = MidiMessage::parse(data) else {
        trace!("Unparsed MIDI: {}", format_hex(data));
        return;
    };

    let Some(evt) = NoteEvent::from_message(&message) else {
        trace!("Ignoring MIDI message: {}", message);
        return;
    };

    // Clone out of the lock so a handler swap never waits on delivery
    let current = handler.read().clone();
    if let Some(current) = current {
        current(evt);
    }
}

fn open_connection<F>(config: &MidiConfig, callback: F) -> Result<(MidiInputConnection<()>, String)>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    let mut midi_in = MidiInput::new(&config.device_name).context("Failed to create MIDI input")?;
    midi_in.ignore(Ignore::All);

    let pattern = config.input_port.as_deref().map(str::trim).filter(|p| !p.is_empty());
    match pattern {
        Some(pattern) => {
            let (port, name) = find_input_port(&midi_in, pattern)
                .ok_or_else(|| anyhow!("MIDI input port matching '{}' not found", pattern))?;
            info!("Connecting to input port: {}", name);
            let connection = midi_in
                .connect(&port, &config.device_name, callback, ())
                .map_err(|e| anyhow!("Failed to connect to input port '{}': {}", name, e))?;
            Ok((connection, name))
        },
        None => open_virtual_port(midi_in, &config.device_name, callback),
    }
}

#[cfg(unix)]
fn open_virtual_port<F>(midi_in: MidiInput, name: &str, callback: F) -> Result<(MidiInputConnection<()>, String)>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    use midir::os::unix::VirtualInput;

    info!("Creating virtual MIDI input port: {}", name);
    let connection = midi_in
        .create_virtual(name, callback, ())
        .map_err(|e| anyhow!("Failed to create virtual MIDI port '{}': {}", name, e))?;
    Ok((connection, name.to_string()))
}

#[cfg(not(unix))]
fn open_virtual_port<F>(_midi_in: MidiInput, name: &str, _callback: F) -> Result<(MidiInputConnection<()>, String)>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    Err(anyhow!(
        "Cannot create virtual MIDI port '{}' on this platform; set midi.input_port to an existing (loopback) port",
        name
    ))
}

/// Find an input port by case-insensitive substring match
fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(midir::MidiInputPort, String)> {
    let pattern = pattern.to_lowercase();
    midi_in.ports().into_iter().find_map(|port| {
        let name = midi_in.port_name(&port).ok()?;
        if name.to_lowercase().contains(&pattern) {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            Some((port, name))
        } else {
            None
        }
    })
}

/// Names of all available MIDI input ports
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("midi-obs-bridge-probe").context("Failed to create MIDI input")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}
