//! # mode
//!
//! The game mode decides what gate events mean. Exactly one controller is
//! active at a time; switching modes exits the old one before the new one
//! is entered.

use std::sync::Arc;

use sft_types::{GameMode, GateEvent, Millis, TelemetryBatch};

use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::ctf::CtfController;
use crate::outbound::Publisher;
use crate::race::RaceController;
use crate::spectrum::SpectrumController;

pub trait ModeController {
    fn on_enter(&mut self, now: Millis);

    fn on_exit(&mut self) {}

    fn on_gate_event(&mut self, event: &GateEvent);

    fn on_telemetry(&mut self, _batch: &TelemetryBatch) {}

    fn on_tick(&mut self, _now: Millis) {}

    /// A channel finished calibrating and learned `peak`.
    fn on_calibration_complete(&mut self, _freq: u16, _peak: i32) {}
}

pub enum ActiveMode {
    Race(RaceController),
    Ctf(CtfController),
    Spectrum(SpectrumController),
}

impl ActiveMode {
    pub fn new(cfg: &NodeConfig, publisher: Publisher, clock: Arc<dyn Clock>) -> Self {
        match cfg.game_mode {
            GameMode::Race => Self::Race(RaceController::new(cfg, publisher)),
            GameMode::Ctf => Self::Ctf(CtfController::new(cfg, publisher, clock)),
            GameMode::Spectrum => Self::Spectrum(SpectrumController::new(cfg, publisher)),
        }
    }

    pub fn game_mode(&self) -> GameMode {
        match self {
            Self::Race(_) => GameMode::Race,
            Self::Ctf(_) => GameMode::Ctf,
            Self::Spectrum(_) => GameMode::Spectrum,
        }
    }

    pub fn controller(&mut self) -> &mut dyn ModeController {
        match self {
            Self::Race(c) => c,
            Self::Ctf(c) => c,
            Self::Spectrum(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn mode_follows_config() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(0));
        for mode in [GameMode::Race, GameMode::Ctf, GameMode::Spectrum] {
            let cfg = NodeConfig { game_mode: mode, ..Default::default() };
            let active = ActiveMode::new(&cfg, Publisher::new(), clock.clone());
            assert_eq!(active.game_mode(), mode);
        }
    }
}
