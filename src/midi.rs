//! MIDI message decoding and the note event model
//!
//! Raw bytes from the input port are parsed into [`MidiMessage`]; only note
//! messages become [`NoteEvent`]s, which is what the rest of the bridge consumes.

use chrono::{DateTime, Utc};
use std::fmt;

/// A decoded MIDI message. Channels are 0-15, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Any other channel voice message (CC, program change, pitch bend...)
    Channel { status: u8, channel: u8 },
    /// System common and realtime messages (0xF0-0xFF)
    System { status: u8 },
}

impl MidiMessage {
    /// Decode one message; running status and truncated notes yield `None`
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        if status & 0x80 == 0 {
            return None;
        }
        if status >= 0xF0 {
            return Some(Self::System { status });
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            kind @ (0x80 | 0x90) => {
                let note = *rest.first()? & 0x7F;
                let velocity = *rest.get(1)? & 0x7F;
                // A zero-velocity Note On is how many senders release a key
                if kind == 0x90 && velocity > 0 {
                    Some(Self::NoteOn { channel, note, velocity })
                } else {
                    Some(Self::NoteOff { channel, note, velocity })
                }
            },
            kind => Some(Self::Channel { status: kind, channel }),
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch={} note={} vel={}", channel + 1, note, velocity)
            },
            Self::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch={} note={} vel={}", channel + 1, note, velocity)
            },
            Self::Channel { status, channel } => write!(f, "Channel message {:02X} ch={}", status, channel + 1),
            Self::System { status } => write!(f, "System message {:02X}", status),
        }
    }
}

/// A note activation or release observed on the input port.
///
/// Channels are 1-based (1-16) here, regardless of the wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteEvent {
    pub is_note_on: bool,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub timestamp: DateTime<Utc>,
}

impl NoteEvent {
    /// Build an event stamped with the current time
    pub fn new(is_note_on: bool, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            is_note_on,
            channel,
            note,
            velocity,
            timestamp: Utc::now(),
        }
    }

    /// Convert a parsed message into a note event; non-note messages yield `None`
    pub fn from_message(message: &MidiMessage) -> Option<Self> {
        match *message {
            MidiMessage::NoteOn { channel, note, velocity } => Some(Self::new(true, channel + 1, note, velocity)),
            MidiMessage::NoteOff { channel, note, velocity } => Some(Self::new(false, channel + 1, note, velocity)),
            _ => None,
        }
    }

    /// "On" or "Off", as written in mapping rules
    pub fn note_type(&self) -> &'static str {
        if self.is_note_on {
            "On"
        } else {
            "Off"
        }
    }
}

impl fmt::Display for NoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Ch={} Note={} Vel={}",
            self.note_type(),
            self.channel,
            self.note,
            self.velocity
        )
    }
}

/// Space-separated hex dump of raw bytes
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", byte));
    }
    out
}
