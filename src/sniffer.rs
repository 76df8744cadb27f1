//! MIDI diagnostics: port listing and a note sniffer
//!
//! The sniffer opens the configured input exactly as the bridge would and
//! prints each note with the scene it maps to, without talking to OBS.

use anyhow::Result;
use colored::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::mapping::MappingEngine;
use crate::midi::NoteEvent;
use crate::source::{list_input_ports, MidirSource, NoteSource};

/// List all input ports in a formatted way
pub fn list_ports_formatted() {
    println!("\n{}", "=== Available MIDI Input Ports ===".bold().cyan());

    match list_input_ports() {
        Ok(ports) if ports.is_empty() => println!("  {}", "No input ports found".dimmed()),
        Ok(ports) => {
            for (i, name) in ports.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        },
        Err(e) => println!("  {} {:#}", "Failed to enumerate ports:".red(), e),
    }
    println!();
}

/// One sniffer line without colors: event plus mapping result
fn describe(evt: &NoteEvent, scene: Option<&str>) -> String {
    match scene {
        Some(scene) => format!("{} => \"{}\"", evt, scene),
        None => format!("{} => (no mapping)", evt),
    }
}

/// Print note events from the configured input until Ctrl+C
pub async fn run_sniffer(config: &AppConfig) -> Result<()> {
    println!("{}", "=== MIDI Sniffer ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    let engine = MappingEngine::new(config.rules()?);
    let source = MidirSource::new(config.midi.clone());

    let (event_tx, mut event_rx) = mpsc::channel::<NoteEvent>(1000);
    source.subscribe(Arc::new(move |evt| {
        // Never block the MIDI thread
        let _ = event_tx.try_send(evt);
    }));

    let cancel = CancellationToken::new();
    source.start(cancel.clone()).await?;

    println!("{}", "Format: [elapsed] EVENT => SCENE".dimmed());
    println!("{}\n", "─".repeat(60).dimmed());

    let start_time = Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            Some(evt) = event_rx.recv() => {
                let scene = engine.try_map(&evt);
                let line = describe(&evt, scene.as_deref());
                let line = if scene.is_some() {
                    line.bright_green()
                } else {
                    line.normal()
                };
                println!("[{:>8}ms] {}", start_time.elapsed().as_millis().to_string().dimmed(), line);
            }
        }
    }

    cancel.cancel();
    source.stop().await?;
    println!("\n{}", "Sniffer stopped".yellow());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_mapped() {
        let evt = NoteEvent::new(true, 1, 60, 100);
        assert_eq!(describe(&evt, Some("Cam 1")), "On Ch=1 Note=60 Vel=100 => \"Cam 1\"");
    }

    #[test]
    fn test_describe_unmapped() {
        let evt = NoteEvent::new(false, 2, 5, 0);
        assert_eq!(describe(&evt, None), "Off Ch=2 Note=5 Vel=0 => (no mapping)");
    }

    #[test]
    fn test_port_listing_does_not_panic() {
        let _ = list_input_ports();
    }
}
