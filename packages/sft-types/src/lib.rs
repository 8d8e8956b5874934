//! # sft-types
//!
//! Shared data contracts of the gate timer.
//!
//! These types are used by:
//! - `timer-node`: the sampling engine, the mode controllers and every
//!   collaborator adapter (LED, overlay, network forwarding)
//! - `rssi-sim`: only the frequency plan and [`Millis`]
//!
//! ## Conventions
//!
//! - Time is monotonic milliseconds since boot ([`Millis`]).
//! - Frequencies are in MHz. A frequency of `0` marks an unconfigured slot.
//! - RSSI values are the receiver's analog output in millivolts.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Monotonic milliseconds since boot.
pub type Millis = u64;

/// Number of channel slots in a configuration snapshot.
pub const MAX_CHANNELS: usize = 8;

/// Upper bound of points carried by one [`TelemetryBatch`].
pub const TELEMETRY_BATCH_MAX: usize = 32;

// ── Game / Node Mode ──────────────────────────────────────────────────────────

/// Game played on this node. Switching mode re-initializes the controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Lap racing, one competitor per channel plus remote players
    #[default]
    Race,
    /// Capture the flag: teams fight for exclusive gate occupancy
    Ctf,
    /// Signal analyzer: LEDs show the live RSSI level
    Spectrum,
}

impl GameMode {
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::Ctf,
            2 => Self::Spectrum,
            _ => Self::Race,
        }
    }
}

/// Role of this node in a multi-gate setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    /// Collects laps from child nodes
    #[default]
    Controller,
    /// Forwards its laps to the controller
    Child,
}

// ── Color ─────────────────────────────────────────────────────────────────────

/// 24-bit RGB color, `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Color(((red as u32) << 16) | ((green as u32) << 8) | blue as u32)
    }

    pub fn red(&self) -> u8 { (self.0 >> 16) as u8 }
    pub fn green(&self) -> u8 { (self.0 >> 8) as u8 }
    pub fn blue(&self) -> u8 { self.0 as u8 }
}

// ── Configuration Snapshot ────────────────────────────────────────────────────

/// One configured receive frequency and its detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Team / pilot name shown in CTF and race results
    pub name: String,
    /// Frequency in MHz, `0` = slot unused
    pub freq: u16,
    /// Learned peak RSSI; enter/leave thresholds derive from it
    pub peak: u16,
    /// Smoothing strength 1–100: near 1 smooths more, 100 keeps the raw value
    pub filter: u16,
    /// Percentage of peak at which a drone counts as inside the gate
    pub offset_enter: u16,
    /// Percentage of peak at which a drone counts as gone
    pub offset_leave: u16,
    /// Laps to fly before calibration ends
    pub calib_max_lap_count: u16,
    /// Calibration ignores peaks below this value
    pub calib_min_rssi_peak: u16,
    /// Team color for the CTF LED presentation
    pub led_color: Color,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            freq: 0,
            peak: 900,
            filter: 60,
            offset_enter: 80,
            offset_leave: 70,
            calib_max_lap_count: 3,
            calib_min_rssi_peak: 600,
            led_color: Color::BLUE,
        }
    }
}

impl ChannelConfig {
    pub fn with_freq(freq: u16) -> Self {
        Self { freq, ..Default::default() }
    }

    pub fn is_configured(&self) -> bool {
        self.freq != 0
    }
}

/// Everything the engine needs from a configuration change.
/// Delivered as a whole and applied as a whole; there are no partial updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub channels: Vec<ChannelConfig>,
    pub game_mode: GameMode,
    pub node_mode: NodeMode,
    pub led_num: u16,
}

impl ConfigSnapshot {
    /// Channels taking part in scanning, in slot order.
    ///
    /// Unconfigured slots are skipped, only the first [`MAX_CHANNELS`] slots
    /// count, and a frequency listed twice is only used once.
    pub fn configured(&self) -> impl Iterator<Item = &ChannelConfig> + '_ {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .take(MAX_CHANNELS)
            .filter(|c| c.is_configured())
            .filter(move |c| seen.insert(c.freq))
    }

    pub fn channel(&self, freq: u16) -> Option<&ChannelConfig> {
        self.configured().find(|c| c.freq == freq)
    }
}

// ── Gate Events ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateEventKind {
    /// Smoothed RSSI rose above the enter threshold
    Enter,
    /// Smoothed RSSI fell below the leave threshold after an enter
    Passed,
}

/// A detected gate transition.
///
/// For [`GateEventKind::Passed`] `rssi` and `abs_time_ms` are the maximum
/// seen while the drone was inside the gate, not the sample at leave time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvent {
    pub freq: u16,
    pub rssi: i32,
    pub abs_time_ms: Millis,
    pub kind: GateEventKind,
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub abs_time_ms: Millis,
    pub smoothed: i32,
    pub raw: i32,
    pub occupied: bool,
}

/// Throttled RSSI history of one channel, at most [`TELEMETRY_BATCH_MAX`] points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub freq: u16,
    pub points: Vec<TelemetryPoint>,
}

impl TelemetryBatch {
    pub fn average_smoothed(&self) -> Option<i32> {
        if self.points.is_empty() {
            return None;
        }
        let sum: i64 = self.points.iter().map(|p| p.smoothed as i64).sum();
        Some((sum / self.points.len() as i64) as i32)
    }
}

// ── Laps ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lap {
    pub id: u32,
    pub rssi: i32,
    #[serde(rename = "duration")]
    pub duration_ms: Millis,
    #[serde(rename = "abs_time")]
    pub abs_time_ms: Millis,
}

/// Who flew a lap: a channel of this node or a remote node by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerIdentity {
    Local { freq: u16 },
    Remote(IpAddr),
}

impl PlayerIdentity {
    pub fn is_remote(&self) -> bool {
        matches!(self, PlayerIdentity::Remote(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapRecorded {
    pub player: String,
    pub identity: PlayerIdentity,
    pub lap: Lap,
    /// Lap duration minus the player's fastest earlier lap, 0 for the first lap
    pub delta_ms: i64,
}

// ── Capture The Flag ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtfStatus {
    pub node: String,
    pub teams: Vec<String>,
    /// Captured time per team, including the running accrual of the holder
    pub captured_ms: Vec<Millis>,
    /// Index into `teams` of the exclusive occupant
    pub current: Option<usize>,
    pub running: bool,
    pub time_left_ms: Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    Solid,
    Blink,
}

/// Request to the LED collaborator. `team` is `None` when nobody holds the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtfPresentationRequest {
    pub team: Option<usize>,
    pub color: Color,
    pub mode: PresentationMode,
}
