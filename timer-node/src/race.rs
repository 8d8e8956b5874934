//! # race
//!
//! Race mode: every passed event of a local pilot closes a lap that began at
//! that pilot's previous crossing. Laps land in the [`Ledger`], go out as
//! [`Outbound::LapRecorded`] and are rendered on the goggle overlay.
//!
//! The controller node also keeps laps of remote pilots, reported by child
//! nodes through [`RaceController::player_lap`].

use std::net::IpAddr;

use sft_types::{GateEvent, GateEventKind, Lap, LapRecorded, Millis, PlayerIdentity};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::ledger::{Ledger, Player};
use crate::mode::ModeController;
use crate::osd::{LapTemplate, Overlay};
use crate::outbound::{Outbound, Publisher};

#[derive(Debug, Clone)]
struct RaceChannel {
    freq: u16,
    calibrating: bool,
    calib_laps: u16,
    calib_target: u16,
    /// Time of the previous crossing; a lap needs one
    last_crossing: Option<Millis>,
}

pub struct RaceController {
    channels: Vec<RaceChannel>,
    ledger: Ledger,
    overlay: Overlay,
    /// False when the configured template does not parse
    template_ok: bool,
    publisher: Publisher,
}

impl RaceController {
    pub fn new(cfg: &NodeConfig, publisher: Publisher) -> Self {
        let snapshot = cfg.snapshot();
        let mut ledger = Ledger::new();
        let mut channels = Vec::new();
        for ch in snapshot.configured() {
            ledger.get_or_create(PlayerIdentity::Local { freq: ch.freq }, Some(&cfg.pilot_name(ch)));
            channels.push(RaceChannel {
                freq: ch.freq,
                calibrating: false,
                calib_laps: 0,
                calib_target: ch.calib_max_lap_count,
                last_crossing: None,
            });
        }

        let (template, template_ok) = match LapTemplate::parse(&cfg.osd_format) {
            Ok(t) => (t, true),
            Err(e) => {
                warn!("osd_format {:?} unusable, lap overlay disabled: {e}", cfg.osd_format);
                (LapTemplate::empty(), false)
            }
        };

        Self {
            channels,
            ledger,
            overlay: Overlay::new(cfg.osd_x, cfg.osd_y, template),
            template_ok,
            publisher,
        }
    }

    /// Every configured channel relearns its peak. Laps are not counted
    /// while a channel calibrates.
    pub fn start_calibration(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.calibrating = true;
            ch.calib_laps = 0;
            ch.last_crossing = None;
        }
    }

    /// Forget every lap. Pilots stay, and the next crossing starts a fresh lap.
    pub fn clear_laps(&mut self) {
        self.ledger.clear_laps();
        for ch in self.channels.iter_mut() {
            ch.last_crossing = None;
        }
        info!("laps cleared");
    }

    /// A child node announced its pilot. False when no slot is left.
    pub fn player_connect(&mut self, addr: IpAddr, name: &str) -> bool {
        let known = self.ledger.get_or_create(PlayerIdentity::Remote(addr), Some(name)).is_some();
        if known {
            info!("player {} connected from {}", name, addr);
        }
        known
    }

    /// A child node reported a lap. Unknown senders are ignored.
    pub fn player_lap(&mut self, addr: IpAddr, id: u32, rssi: i32, duration_ms: Millis, now: Millis) -> Option<Lap> {
        let identity = PlayerIdentity::Remote(addr);
        let Some(player) = self.ledger.get_or_create(identity, None) else {
            warn!("lap from unknown player {}", addr);
            return None;
        };
        let (lap, delta_ms) = record(player, Some(id), rssi, duration_ms, now)?;
        self.publisher.publish(Outbound::LapRecorded(LapRecorded {
            player: player.name.clone(),
            identity,
            lap,
            delta_ms,
        }));
        Some(lap)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn on_passed(&mut self, event: &GateEvent) {
        let Some(ch) = self.channels.iter_mut().find(|c| c.freq == event.freq) else {
            debug!("passed event for unconfigured {} MHz", event.freq);
            return;
        };

        if ch.calibrating {
            ch.calib_laps += 1;
            let text = format!("calib: {}/{} rssi:{}", ch.calib_laps, ch.calib_target, event.rssi);
            if ch.calib_laps >= ch.calib_target {
                ch.calibrating = false;
            }
            let msg = self.overlay.text(text);
            self.publisher.publish(Outbound::OverlayText(msg));
            return;
        }

        let previous = ch.last_crossing.replace(event.abs_time_ms);
        let Some(previous) = previous else {
            debug!("{} MHz: first crossing starts the clock", event.freq);
            return;
        };

        let identity = PlayerIdentity::Local { freq: event.freq };
        let Some(player) = self.ledger.find_mut(&identity) else {
            return;
        };
        let duration_ms = event.abs_time_ms.saturating_sub(previous);
        let Some((lap, delta_ms)) = record(player, None, event.rssi, duration_ms, event.abs_time_ms) else {
            return;
        };

        self.publisher.publish(Outbound::LapRecorded(LapRecorded {
            player: player.name.clone(),
            identity,
            lap,
            delta_ms,
        }));
        if self.template_ok {
            let msg = self.overlay.lap(lap.id, lap.duration_ms, delta_ms);
            self.publisher.publish(Outbound::OverlayText(msg));
        }
    }
}

/// Add a lap and compute its delta to the fastest lap recorded before it.
fn record(player: &mut Player, id: Option<u32>, rssi: i32, duration_ms: Millis, at: Millis) -> Option<(Lap, i64)> {
    let fastest = player.fastest_lap();
    let lap = player.add_lap(id, rssi, duration_ms, at)?;
    let delta_ms = fastest.map_or(0, |f| lap.duration_ms as i64 - f.duration_ms as i64);
    Some((lap, delta_ms))
}

impl ModeController for RaceController {
    fn on_enter(&mut self, _now: Millis) {
        for ch in self.channels.iter_mut() {
            ch.last_crossing = None;
        }
        info!("🏎️ race mode, {} pilots", self.channels.len());
    }

    fn on_gate_event(&mut self, event: &GateEvent) {
        match event.kind {
            GateEventKind::Enter => {}
            GateEventKind::Passed => self.on_passed(event),
        }
    }

    fn on_calibration_complete(&mut self, freq: u16, peak: i32) {
        if let Some(ch) = self.channels.iter_mut().find(|c| c.freq == freq) {
            ch.calibrating = false;
        }
        let msg = self.overlay.text(format!("calib done rssi:{peak}"));
        self.publisher.publish(Outbound::OverlayText(msg));
    }
}
