//! # detector
//!
//! Per-channel gate detection: exponential smoothing, the enter/leave
//! hysteresis state machine and the calibration procedure.
//!
//! ```text
//!                      drone
//!                      left
//!                        |
//!   ----*>>>>>>>>>>>>+>>>+~~~~~~~~~~~~~~~~~~~~|----
//!       |            |                        |
//!     drone      COLLECT_MIN             GATE_BLOCKED
//!     enter
//! ```
//!
//! After an enter the channel is deaf to a leave for [`COLLECT_MIN_MS`];
//! after a leave it is deaf to a new enter for [`GATE_BLOCKED_MS`], which
//! swallows the signal ripple of a departing drone.
//!
//! ## Thresholds
//! `enter` and `leave` are integer percentages of `peak` (truncating
//! division) and are only ever written through [`Channel::set_peak`].
//! While either one is zero the state machine is idle.

use sft_types::{ChannelConfig, GateEvent, GateEventKind, Millis};
use tracing::{debug, info};

use crate::timer::Timer;

/// Refractory window after an enter, and after a calibration peak raise
pub const COLLECT_MIN_MS: Millis = 700;
/// Refractory window after a passed drone
pub const GATE_BLOCKED_MS: Millis = 2000;

/// Lowest smoothing coefficient
const FILTER_MIN: f32 = 0.01;

/// Outcome of one processed sample that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub event: GateEvent,
    /// Set on the passed event that completes calibration: the learned peak
    pub calibrated_peak: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub freq: u16,
    raw: i32,
    smoothed: f32,
    filter: f32,

    peak: i32,
    offset_enter: i32,
    offset_leave: i32,
    enter: i32,
    leave: i32,

    occupied: bool,
    in_gate_peak: i32,
    in_gate_peak_ms: Millis,
    debounce: Timer,

    calibrating: bool,
    calib_min_rssi: i32,
    calib_laps: u16,
    calib_target: u16,
}

impl Channel {
    pub fn from_config(cfg: &ChannelConfig) -> Self {
        let mut ch = Self {
            freq: cfg.freq,
            raw: 0,
            smoothed: 0.0,
            filter: (cfg.filter as f32 / 100.0).clamp(FILTER_MIN, 1.0),
            peak: 0,
            offset_enter: cfg.offset_enter as i32,
            offset_leave: cfg.offset_leave as i32,
            enter: 0,
            leave: 0,
            occupied: false,
            in_gate_peak: 0,
            in_gate_peak_ms: 0,
            debounce: Timer::new(),
            calibrating: false,
            calib_min_rssi: cfg.calib_min_rssi_peak as i32,
            calib_laps: 0,
            calib_target: cfg.calib_max_lap_count,
        };
        ch.set_peak(cfg.peak as i32);
        ch
    }

    /// Feed one raw sample taken at `now`.
    pub fn process(&mut self, raw: i32, now: Millis) -> Option<Detection> {
        self.raw = raw;
        self.smoothed = self.filter * raw as f32 + (1.0 - self.filter) * self.smoothed;
        let smoothed = self.smoothed();

        if self.calibrating && smoothed > self.peak && smoothed > self.calib_min_rssi {
            self.set_peak(smoothed);
            self.occupied = false;
            self.debounce.start(now, COLLECT_MIN_MS, None);
            debug!(freq = self.freq, peak = self.peak, "calibration raised peak");
        }

        if self.enter == 0 || self.leave == 0 {
            return None;
        }

        let settled = self.debounce.is_over(now).is_some();

        if smoothed > self.enter && settled && !self.occupied {
            self.occupied = true;
            self.in_gate_peak = smoothed;
            self.in_gate_peak_ms = now;
            self.debounce.start(now, COLLECT_MIN_MS, None);
            info!(freq = self.freq, rssi = smoothed, "drone entered gate");
            return Some(Detection {
                event: self.event(GateEventKind::Enter),
                calibrated_peak: None,
            });
        }

        if self.occupied && settled && smoothed < self.leave {
            self.occupied = false;
            self.debounce.start(now, GATE_BLOCKED_MS, None);
            info!(freq = self.freq, rssi = self.in_gate_peak, "drone passed");
            let event = self.event(GateEventKind::Passed);
            return Some(Detection { event, calibrated_peak: self.count_calibration_lap() });
        }

        if self.occupied && smoothed > self.in_gate_peak {
            self.in_gate_peak = smoothed;
            self.in_gate_peak_ms = now;
        }
        None
    }

    /// Forget the learned peak and learn it again over the next laps.
    pub fn start_calibration(&mut self) {
        self.calibrating = true;
        self.calib_laps = 0;
        self.occupied = false;
        self.set_peak(0);
    }

    /// The only writer of `peak`, `enter` and `leave`.
    fn set_peak(&mut self, peak: i32) {
        self.peak = peak;
        self.enter = percent_of(peak, self.offset_enter);
        self.leave = percent_of(peak, self.offset_leave);
    }

    fn count_calibration_lap(&mut self) -> Option<i32> {
        if !self.calibrating {
            return None;
        }
        self.calib_laps += 1;
        info!(freq = self.freq, lap = self.calib_laps, of = self.calib_target, peak = self.peak, "calibration lap");
        if self.calib_laps >= self.calib_target {
            self.calibrating = false;
            Some(self.peak)
        } else {
            None
        }
    }

    fn event(&self, kind: GateEventKind) -> GateEvent {
        GateEvent {
            freq: self.freq,
            rssi: self.in_gate_peak,
            abs_time_ms: self.in_gate_peak_ms,
            kind,
        }
    }

    pub fn raw(&self) -> i32 { self.raw }
    pub fn smoothed(&self) -> i32 { self.smoothed.round() as i32 }
    pub fn filter(&self) -> f32 { self.filter }
    pub fn peak(&self) -> i32 { self.peak }
    pub fn enter(&self) -> i32 { self.enter }
    pub fn leave(&self) -> i32 { self.leave }
    pub fn is_occupied(&self) -> bool { self.occupied }
    pub fn is_calibrating(&self) -> bool { self.calibrating }
    pub fn calibration_laps(&self) -> u16 { self.calib_laps }
}

fn percent_of(value: i32, percent: i32) -> i32 {
    let scaled = i64::from(value) * i64::from(percent) / 100;
    scaled.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(peak: u16, filter: u16) -> Channel {
        Channel::from_config(&ChannelConfig {
            freq: 5800,
            peak,
            filter,
            offset_enter: 80,
            offset_leave: 70,
            ..Default::default()
        })
    }

    fn feed(ch: &mut Channel, samples: &[(Millis, i32)]) -> Vec<GateEvent> {
        samples.iter().filter_map(|&(t, v)| ch.process(v, t)).map(|d| d.event).collect()
    }

    #[test]
    fn thresholds_follow_peak() {
        let ch = channel(1000, 100);
        assert_eq!((ch.enter(), ch.leave()), (800, 700));

        let ch = channel(999, 100);
        assert_eq!((ch.enter(), ch.leave()), (799, 699));
    }

    #[test]
    fn extreme_offsets_saturate() {
        let ch = Channel::from_config(&ChannelConfig {
            freq: 5800,
            peak: 60_000,
            offset_enter: 50_000,
            offset_leave: 40_000,
            ..Default::default()
        });
        assert_eq!(ch.enter(), 30_000_000);
        assert_eq!(ch.leave(), 24_000_000);
        assert_eq!(percent_of(i32::MAX, 200), i32::MAX);
        assert_eq!(percent_of(i32::MIN, 200), i32::MIN);
    }

    #[test]
    fn filter_is_clamped() {
        assert_eq!(channel(900, 0).filter(), 0.01);
        assert_eq!(channel(900, 250).filter(), 1.0);
        assert!((channel(900, 60).filter() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn smoothing_converges_to_constant_input() {
        let mut ch = channel(0, 20);
        for t in 0..60 {
            ch.process(1000, t);
        }
        assert_eq!(ch.smoothed(), 1000);
        assert_eq!(ch.raw(), 1000);
    }

    #[test]
    fn enter_then_passed_carries_in_gate_peak() {
        let mut ch = channel(1000, 100);
        let samples: Vec<(Millis, i32)> = [0, 0, 850, 900, 850, 650]
            .iter()
            .enumerate()
            .map(|(i, v)| (i as Millis * 1000, *v))
            .collect();

        let events = feed(&mut ch, &samples);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, GateEventKind::Enter);
        assert_eq!((events[0].rssi, events[0].abs_time_ms), (850, 2000));
        assert_eq!(events[1].kind, GateEventKind::Passed);
        assert_eq!((events[1].rssi, events[1].abs_time_ms), (900, 3000));
        assert!(!ch.is_occupied());
    }

    #[test]
    fn leave_is_ignored_inside_collect_window() {
        let mut ch = channel(1000, 100);
        let events = feed(&mut ch, &[(0, 850), (200, 650), (400, 850), (800, 650)]);
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![GateEventKind::Enter, GateEventKind::Passed]);
    }

    #[test]
    fn reentry_blocked_after_pass() {
        let mut ch = channel(1000, 100);
        feed(&mut ch, &[(0, 850), (1000, 650)]);

        // ripple while the drone departs
        let ripple = feed(&mut ch, &[(1500, 850), (2000, 600), (2900, 860)]);
        assert!(ripple.is_empty());

        let next = feed(&mut ch, &[(3100, 850)]);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].kind, GateEventKind::Enter);
    }

    #[test]
    fn idle_without_thresholds() {
        let mut ch = channel(0, 100);
        assert!(feed(&mut ch, &[(0, 3000), (5000, 0)]).is_empty());
    }

    #[test]
    fn calibration_learns_peak() {
        let mut ch = Channel::from_config(&ChannelConfig {
            freq: 5800,
            filter: 100,
            calib_max_lap_count: 2,
            calib_min_rssi_peak: 600,
            ..Default::default()
        });
        ch.start_calibration();
        assert_eq!((ch.peak(), ch.enter(), ch.leave()), (0, 0, 0));

        // below the floor: ignored
        ch.process(550, 0);
        assert_eq!(ch.peak(), 0);

        let mut last_peak = 0;
        for (t, v) in [(100, 700), (200, 900), (300, 850), (400, 950)] {
            ch.process(v, t);
            assert!(ch.peak() >= last_peak);
            assert_eq!(ch.enter(), ch.peak() * 80 / 100);
            assert_eq!(ch.leave(), ch.peak() * 70 / 100);
            last_peak = ch.peak();
        }
        assert_eq!(ch.peak(), 950);

        // first lap
        let enter = ch.process(900, 1200).map(|d| d.event.kind);
        assert_eq!(enter, Some(GateEventKind::Enter));
        let passed = ch.process(500, 2000);
        assert!(passed.is_some_and(|d| d.calibrated_peak.is_none()));
        assert_eq!(ch.calibration_laps(), 1);

        // second lap completes calibration
        ch.process(900, 4100);
        let done = ch.process(500, 4900);
        assert_eq!(done.and_then(|d| d.calibrated_peak), Some(950));
        assert!(!ch.is_calibrating());
    }
}
