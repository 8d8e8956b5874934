//! scenarios.rs — Injectable signal scenarios for the receiver simulator
//!
//! Each scenario reproduces a real-world condition the gate detector has to
//! survive: analog noise, multipath ripple while the drone departs, flaky ADC
//! reads, and video transmitters bleeding into neighbouring channels.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioType {
    /// Low noise, clean bells
    Clean,
    /// Heavy Gaussian noise on every read
    Noisy,
    /// Sinusoidal ripple on top of the bell (tests the leave debounce)
    Ripple,
    /// A fraction of reads fail outright
    ReadDropout,
    /// Each tuned channel also hears part of every other drone
    CrossTalk,
}

impl ScenarioType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "clean" => Some(Self::Clean),
            "noisy" => Some(Self::Noisy),
            "ripple" => Some(Self::Ripple),
            "readdropout" | "dropout" => Some(Self::ReadDropout),
            "crosstalk" => Some(Self::CrossTalk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub kind: ScenarioType,
    /// RSSI with nobody near the gate (mV)
    pub noise_floor: f64,
    /// Gaussian read noise (mV, one sd)
    pub noise_sd: f64,
    /// Ripple amplitude (mV)
    pub ripple_mv: f64,
    /// Ripple period (ms)
    pub ripple_period_ms: f64,
    /// Probability that a single read fails
    pub dropout_rate: f64,
    /// Share of another drone's signal heard on the tuned channel
    pub crosstalk: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            kind: ScenarioType::Clean,
            noise_floor: 450.0,
            noise_sd: 4.0,
            ripple_mv: 0.0,
            ripple_period_ms: 120.0,
            dropout_rate: 0.0,
            crosstalk: 0.0,
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, kind: ScenarioType) -> bool {
        self.kind == kind
    }
}

/// Scenario presets selectable from the command line
pub fn preset(kind: ScenarioType) -> ScenarioConfig {
    match kind {
        ScenarioType::Clean => ScenarioConfig::default(),
        ScenarioType::Noisy => ScenarioConfig {
            kind,
            noise_sd: 40.0,
            ..Default::default()
        },
        ScenarioType::Ripple => ScenarioConfig {
            kind,
            ripple_mv: 90.0,
            ..Default::default()
        },
        ScenarioType::ReadDropout => ScenarioConfig {
            kind,
            dropout_rate: 0.2,
            ..Default::default()
        },
        ScenarioType::CrossTalk => ScenarioConfig {
            kind,
            crosstalk: 0.3,
            ..Default::default()
        },
    }
}

pub fn preset_by_name(name: &str) -> Option<ScenarioConfig> {
    ScenarioType::parse(name).map(preset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_loosely() {
        assert_eq!(ScenarioType::parse("Read-Dropout"), Some(ScenarioType::ReadDropout));
        assert_eq!(ScenarioType::parse("CROSS_TALK"), Some(ScenarioType::CrossTalk));
        assert_eq!(ScenarioType::parse("storm"), None);
    }

    #[test]
    fn presets_only_enable_their_fault() {
        let p = preset(ScenarioType::Ripple);
        assert!(p.has(ScenarioType::Ripple));
        assert_eq!(p.dropout_rate, 0.0);
        assert_eq!(p.crosstalk, 0.0);
        assert!(preset_by_name("noisy").is_some_and(|c| c.noise_sd > 10.0));
    }
}
