//! MIDI-OBS Bridge library
//!
//! Switches OBS Studio program scenes in response to MIDI notes, keeping an
//! OBS WebSocket session alive with capped exponential backoff.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod mapping;
pub mod midi;
pub mod obs;
pub mod rate_limiter;
pub mod resolver;
pub mod sniffer;
pub mod source;
