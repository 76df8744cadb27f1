//! Note-to-scene mapping rules
//!
//! Rules are evaluated in configured order and the first match wins; there is
//! no specificity ranking, so operators express overrides through list order.
//! The active rule list is an immutable snapshot that reloads replace whole.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::MappingEntry;
use crate::midi::NoteEvent;

/// Velocity value in configuration meaning "any velocity"
pub const WILDCARD_VELOCITY: i32 = -1;

/// Activation type a rule listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteType {
    On,
    Off,
}

impl NoteType {
    /// Parse "On"/"Off" ignoring case and surrounding whitespace
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("on") {
            Some(NoteType::On)
        } else if value.eq_ignore_ascii_case("off") {
            Some(NoteType::Off)
        } else {
            None
        }
    }

    fn matches(self, is_note_on: bool) -> bool {
        match self {
            NoteType::On => is_note_on,
            NoteType::Off => !is_note_on,
        }
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteType::On => f.write_str("On"),
            NoteType::Off => f.write_str("Off"),
        }
    }
}

/// Velocity selector of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityMatch {
    Any,
    Exact(u8),
}

impl VelocityMatch {
    fn matches(self, velocity: u8) -> bool {
        match self {
            VelocityMatch::Any => true,
            VelocityMatch::Exact(v) => v == velocity,
        }
    }
}

impl fmt::Display for VelocityMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VelocityMatch::Any => f.write_str("any"),
            VelocityMatch::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// A validated mapping from a note pattern to a scene name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub note_type: NoteType,
    /// 1-based MIDI channel
    pub channel: u8,
    pub note: u8,
    pub velocity: VelocityMatch,
    pub scene: String,
}

impl MappingRule {
    /// Check whether this rule applies to an event
    pub fn matches(&self, evt: &NoteEvent) -> bool {
        self.note_type.matches(evt.is_note_on)
            && self.channel == evt.channel
            && self.note == evt.note
            && self.velocity.matches(evt.velocity)
    }
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Note {} Ch={} Note={} Vel={} -> Scene \"{}\"",
            self.note_type, self.channel, self.note, self.velocity, self.scene
        )
    }
}

impl TryFrom<&MappingEntry> for MappingRule {
    type Error = String;

    fn try_from(entry: &MappingEntry) -> Result<Self, Self::Error> {
        let note_type = match entry.note_type.as_deref() {
            None => NoteType::On,
            Some(s) if s.trim().is_empty() => NoteType::On,
            Some(s) => NoteType::parse(s)
                .ok_or_else(|| format!("note_type must be 'On' or 'Off', got '{}'", s.trim()))?,
        };

        let channel = u8::try_from(entry.channel)
            .ok()
            .filter(|c| (1..=16).contains(c))
            .ok_or_else(|| format!("channel must be 1..16, got {}", entry.channel))?;

        let note = u8::try_from(entry.note)
            .ok()
            .filter(|n| *n <= 127)
            .ok_or_else(|| format!("note must be 0..127, got {}", entry.note))?;

        let velocity = if entry.velocity == WILDCARD_VELOCITY {
            VelocityMatch::Any
        } else {
            u8::try_from(entry.velocity)
                .ok()
                .filter(|v| *v <= 127)
                .map(VelocityMatch::Exact)
                .ok_or_else(|| format!("velocity must be -1 or 0..127, got {}", entry.velocity))?
        };

        if entry.scene.trim().is_empty() {
            return Err("scene must not be empty".to_string());
        }

        Ok(Self {
            note_type,
            channel,
            note,
            velocity,
            scene: entry.scene.clone(),
        })
    }
}

/// Evaluates the current rule snapshot against incoming notes
pub struct MappingEngine {
    rules: RwLock<Arc<Vec<MappingRule>>>,
}

impl MappingEngine {
    pub fn new(rules: Vec<MappingRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// Swap in a new rule list; readers holding the old snapshot keep it intact
    pub fn replace(&self, rules: Vec<MappingRule>) {
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        debug!("Mapping rules replaced ({} rules)", count);
    }

    /// Current rule snapshot
    pub fn snapshot(&self) -> Arc<Vec<MappingRule>> {
        Arc::clone(&self.rules.read())
    }

    /// Return the scene of the first rule matching `evt`
    pub fn try_map(&self, evt: &NoteEvent) -> Option<String> {
        let rules = self.snapshot();

        match rules.iter().find(|rule| rule.matches(evt)) {
            Some(rule) => {
                debug!("{} -> \"{}\"", evt, rule.scene);
                Some(rule.scene.clone())
            },
            None => {
                debug!("No mapping for {}", evt);
                None
            },
        }
    }
}
