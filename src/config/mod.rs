//! Configuration management for the bridge
//!
//! Handles loading, normalizing, validating, and hot-reloading of the YAML
//! configuration file.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::mapping::{MappingRule, NoteType, WILDCARD_VELOCITY};

pub use watcher::ConfigWatcher;

/// Every problem found while validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub obs: ObsConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
}

/// MIDI input configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Name of the virtual input port created when no `input_port` is given
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Substring of an existing input port to open instead of a virtual port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_port: Option<String>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            input_port: None,
        }
    }
}

/// OBS WebSocket configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ObsConfig {
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_reconnect_max_seconds")]
    pub reconnect_max_seconds: u64,
}

impl ObsConfig {
    /// Upper bound of the reconnect backoff
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_seconds.max(1))
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: None,
            reconnect_max_seconds: default_reconnect_max_seconds(),
        }
    }
}

/// Dispatch behavior flags
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BehaviorConfig {
    #[serde(default = "default_disconnected_log_interval")]
    pub obs_disconnected_log_interval_seconds: u64,
    #[serde(default)]
    pub ignore_if_already_on_scene: bool,
}

impl BehaviorConfig {
    pub fn disconnected_log_interval(&self) -> Duration {
        Duration::from_secs(self.obs_disconnected_log_interval_seconds)
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            obs_disconnected_log_interval_seconds: default_disconnected_log_interval(),
            ignore_if_already_on_scene: false,
        }
    }
}

/// One mapping entry as written in the config file.
///
/// Numeric fields are kept wide so out-of-range values reach validation
/// instead of failing deserialization with a less helpful message.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MappingEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_type: Option<String>,
    pub channel: i32,
    pub note: i32,
    #[serde(default = "default_velocity")]
    pub velocity: i32,
    pub scene: String,
}

impl AppConfig {
    /// Load, normalize and validate configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to load config: {}", path))?;

        Ok(config)
    }

    /// Parse, normalize and validate configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let mut config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.normalize();
        config.validate()?;

        Ok(config)
    }

    /// Fill in defaults that serde cannot express (blank note types become "On")
    pub fn normalize(&mut self) {
        for entry in &mut self.mappings {
            let blank = entry
                .note_type
                .as_deref()
                .map_or(true, |s| s.trim().is_empty());
            if blank {
                entry.note_type = Some(NoteType::On.to_string());
            }
        }
    }

    /// Validate configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.obs.host.trim().is_empty() {
            errors.push("obs.host must not be empty".to_string());
        }

        if self.obs.port == 0 {
            errors.push(format!("obs.port must be 1..65535, got {}", self.obs.port));
        }

        if self.mappings.is_empty() {
            errors.push("mappings must contain at least one entry".to_string());
        }

        for (i, m) in self.mappings.iter().enumerate() {
            let prefix = format!("mappings[{}]", i);

            if let Some(note_type) = m.note_type.as_deref() {
                if !note_type.trim().is_empty() && NoteType::parse(note_type).is_none() {
                    errors.push(format!(
                        "{}.note_type must be 'On' or 'Off', got '{}'",
                        prefix,
                        note_type.trim()
                    ));
                }
            }

            if !(1..=16).contains(&m.channel) {
                errors.push(format!("{}.channel must be 1..16, got {}", prefix, m.channel));
            }

            if !(0..=127).contains(&m.note) {
                errors.push(format!("{}.note must be 0..127, got {}", prefix, m.note));
            }

            if m.velocity != WILDCARD_VELOCITY && !(0..=127).contains(&m.velocity) {
                errors.push(format!(
                    "{}.velocity must be -1 or 0..127, got {}",
                    prefix, m.velocity
                ));
            }

            if m.scene.trim().is_empty() {
                errors.push(format!("{}.scene must not be empty", prefix));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Compile mapping entries into rules, preserving their order
    pub fn rules(&self) -> Result<Vec<MappingRule>, ConfigError> {
        let mut rules = Vec::with_capacity(self.mappings.len());
        let mut errors = Vec::new();

        for (i, entry) in self.mappings.iter().enumerate() {
            match MappingRule::try_from(entry) {
                Ok(rule) => rules.push(rule),
                Err(e) => errors.push(format!("mappings[{}]: {}", i, e)),
            }
        }

        if errors.is_empty() {
            Ok(rules)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Human-readable startup summary (secrets masked)
    pub fn summary_lines(&self) -> Vec<String> {
        let password = match self.obs.password.as_deref() {
            Some(p) if !p.is_empty() => "********",
            _ => "(not set)",
        };
        let input = match &self.midi.input_port {
            Some(pattern) => format!("port matching '{}'", pattern),
            None => format!("virtual port '{}'", self.midi.device_name),
        };

        let mut lines = vec![
            "=== MIDI-OBS Bridge starting ===".to_string(),
            format!("Platform: {}", std::env::consts::OS),
            format!("MIDI input: {}", input),
            format!("OBS host: {}:{}", self.obs.host, self.obs.port),
            format!("OBS password: {}", password),
            format!("Reconnect max: {}s", self.obs.reconnect_max_seconds),
            format!(
                "Ignore if already on scene: {}",
                self.behavior.ignore_if_already_on_scene
            ),
            format!(
                "OBS disconnected log interval: {}s",
                self.behavior.obs_disconnected_log_interval_seconds
            ),
            format!("Mappings ({}):", self.mappings.len()),
        ];

        for entry in &self.mappings {
            match MappingRule::try_from(entry) {
                Ok(rule) => lines.push(format!("  {}", rule)),
                Err(e) => lines.push(format!("  <invalid: {}>", e)),
            }
        }

        lines
    }
}

// Default value functions
fn default_device_name() -> String { "ProPresenter-OBS Bridge".to_string() }
fn default_obs_host() -> String { "localhost".to_string() }
fn default_obs_port() -> u16 { 4455 }
fn default_reconnect_max_seconds() -> u64 { 30 }
fn default_disconnected_log_interval() -> u64 { 10 }
fn default_velocity() -> i32 { WILDCARD_VELOCITY }
