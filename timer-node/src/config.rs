//! # config
//!
//! Node configuration: the channel table, game and node mode, overlay and
//! LED parameters, and the sampling-loop settings.
//!
//! Stored as TOML. A missing or unreadable file is never fatal: the node
//! boots with defaults and says so in the log.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use rssi_sim::FlightConfig;
use sft_types::{ChannelConfig, Color, ConfigSnapshot, GameMode, Millis, NodeMode, MAX_CHANNELS};

use crate::osd::{LapTemplate, DEFAULT_OSD_FORMAT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parsing {}: {source}", .path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("serializing config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("writing {}: {source}", .path.display())]
    Write { path: PathBuf, source: std::io::Error },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Sampling-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target period of one sampling iteration
    pub loop_period_ms: Millis,
    /// Sampling ticks a channel stays tuned before the scanner moves on
    pub dwell_ticks: u32,
    /// How long posting a gate event may block the sampling loop
    pub event_post_timeout_ms: Millis,
    /// How long posting a telemetry batch may block the sampling loop
    pub telemetry_post_timeout_ms: Millis,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: 5,
            dwell_ticks: 10,
            event_post_timeout_ms: 500,
            telemetry_post_timeout_ms: 100,
        }
    }
}

// ── Simulator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub scenario: String,
    pub seed: u64,
    pub flight: FlightConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            scenario: "clean".into(),
            seed: 1,
            flight: FlightConfig::default(),
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of this gate, reported in CTF status
    pub node_name: String,
    /// Pilot name used for channels without a name
    pub player_name: String,
    pub game_mode: GameMode,
    pub node_mode: NodeMode,
    /// `host:port` of the controller node (child nodes only)
    pub ctrl_addr: String,
    pub osd_x: u16,
    pub osd_y: u16,
    pub osd_format: String,
    pub led_num: u16,
    pub channels: Vec<ChannelConfig>,
    pub engine: EngineConfig,
    pub sim: SimConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "gate".into(),
            player_name: "pilot".into(),
            game_mode: GameMode::Race,
            node_mode: NodeMode::Controller,
            ctrl_addr: "192.168.4.1:80".into(),
            osd_x: 0,
            osd_y: 0,
            osd_format: DEFAULT_OSD_FORMAT.into(),
            led_num: 24,
            channels: vec![ChannelConfig {
                name: String::new(),
                freq: 5917,
                led_color: Color::BLUE,
                ..Default::default()
            }],
            engine: EngineConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

impl NodeConfig {
    /// The part of the configuration the engine and controllers consume.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            channels: self.channels.clone(),
            game_mode: self.game_mode,
            node_mode: self.node_mode,
            led_num: self.led_num,
        }
    }

    /// Display name of the pilot flying `channel`.
    pub fn pilot_name(&self, channel: &ChannelConfig) -> String {
        if channel.name.is_empty() {
            self.player_name.clone()
        } else {
            channel.name.clone()
        }
    }

    /// Store a learned peak. Returns false if no channel uses `freq`.
    pub fn set_peak(&mut self, freq: u16, peak: i32) -> bool {
        let peak = peak.clamp(0, u16::MAX as i32) as u16;
        let mut found = false;
        for ch in self.channels.iter_mut().filter(|c| c.freq == freq) {
            ch.peak = peak;
            found = true;
        }
        found
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::Invalid(format!(
                "{} channels, at most {} supported",
                self.channels.len(),
                MAX_CHANNELS
            )));
        }
        for ch in self.channels.iter().filter(|c| c.is_configured()) {
            for (name, value) in [("offset_enter", ch.offset_enter), ("offset_leave", ch.offset_leave), ("filter", ch.filter)] {
                if !PERCENT.contains(&value) {
                    return Err(ConfigError::Invalid(format!("{} MHz: {name} ({value}) must be within 1-100", ch.freq)));
                }
            }
            if ch.offset_enter <= ch.offset_leave {
                return Err(ConfigError::Invalid(format!(
                    "{} MHz: offset_enter ({}) must be above offset_leave ({})",
                    ch.freq, ch.offset_enter, ch.offset_leave
                )));
            }
        }
        if self.engine.loop_period_ms == 0 || self.engine.dwell_ticks == 0 {
            return Err(ConfigError::Invalid("loop_period_ms and dwell_ticks must be positive".into()));
        }
        LapTemplate::parse(&self.osd_format)
            .map_err(|e| ConfigError::Invalid(format!("osd_format {:?}: {e}", self.osd_format)))?;
        Ok(())
    }
}

const PERCENT: std::ops::RangeInclusive<u16> = 1..=100;

// ── Store ─────────────────────────────────────────────────────────────────────

/// Where the node configuration lives between boots.
pub trait ConfigStore: Send + Sync {
    /// Load the stored configuration, falling back to defaults.
    fn load(&self) -> NodeConfig;
    fn save(&self, cfg: &NodeConfig) -> Result<(), ConfigError>;
}

/// TOML file on disk.
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_load(&self) -> Result<NodeConfig, ConfigError> {
        let data = fs::read_to_string(&self.path)
            .map_err(|source| ConfigError::Read { path: self.path.clone(), source })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse { path: self.path.clone(), source })
    }
}

impl ConfigStore for TomlFileStore {
    fn load(&self) -> NodeConfig {
        if !self.path.exists() {
            info!("No {} found, using default config", self.path.display());
            return NodeConfig::default();
        }

        match self.try_load() {
            Ok(cfg) => {
                if let Err(e) = cfg.validate() {
                    warn!("{}: {e}, using default config", self.path.display());
                    return NodeConfig::default();
                }
                info!(
                    "Loaded config from {} ({} channels, mode {:?})",
                    self.path.display(),
                    cfg.channels.iter().filter(|c| c.is_configured()).count(),
                    cfg.game_mode
                );
                cfg
            }
            Err(e) => {
                warn!("{e}, using default config");
                NodeConfig::default()
            }
        }
    }

    fn save(&self, cfg: &NodeConfig) -> Result<(), ConfigError> {
        let data = toml::to_string_pretty(cfg)?;
        fs::write(&self.path, data).map_err(|source| ConfigError::Write { path: self.path.clone(), source })
    }
}

/// In-memory store, for nodes without persistent storage and for tests.
#[derive(Default)]
pub struct MemoryStore {
    cfg: Mutex<NodeConfig>,
}

impl MemoryStore {
    pub fn new(cfg: NodeConfig) -> Self {
        Self { cfg: Mutex::new(cfg) }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> NodeConfig {
        match self.cfg.lock() {
            Ok(cfg) => cfg.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn save(&self, cfg: &NodeConfig) -> Result<(), ConfigError> {
        match self.cfg.lock() {
            Ok(mut stored) => *stored = cfg.clone(),
            Err(poisoned) => *poisoned.into_inner() = cfg.clone(),
        }
        Ok(())
    }
}
