//! # ctf
//!
//! Capture the flag: every channel is a team, the gate is the flag.
//!
//! ## Rules
//! - A team is *present* between its enter and its passed event.
//! - A team captures the gate when it is the only team present. Its capture
//!   time accrues from then on, even after the drone has left, until another
//!   team captures the gate or the match ends.
//! - Two or more teams present at once contest the gate: nobody accrues and
//!   the LEDs blink in the color of the team that caused the contest. When
//!   all but one team have left, the one still present takes the gate.
//!
//! Presence is tracked outside a match too; captures only happen while one
//! runs. A heartbeat task ends the match on time and republishes the status
//! every second.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sft_types::{Color, CtfPresentationRequest, CtfStatus, GateEvent, GateEventKind, Millis, PresentationMode};

use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::mode::ModeController;
use crate::outbound::{Outbound, Publisher};

const HEARTBEAT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Team {
    name: String,
    freq: u16,
    color: Color,
    /// Time of the last enter; `None` once the drone has passed
    present_since: Option<Millis>,
    capture_start: Option<Millis>,
    captured_ms: Millis,
}

#[derive(Debug, Default)]
struct CtfState {
    node: String,
    teams: Vec<Team>,
    current: Option<usize>,
    contested: bool,
    running: bool,
    match_end: Millis,
}

impl CtfState {
    /// Stop the holder's accrual at `now`, capped at the match end.
    fn close_capture(&mut self, now: Millis) {
        let end = now.min(self.match_end);
        if let Some(team) = self.current.and_then(|i| self.teams.get_mut(i)) {
            if let Some(start) = team.capture_start.take() {
                team.captured_ms += end.saturating_sub(start);
            }
        }
    }

    fn status(&self, now: Millis) -> CtfStatus {
        let end = now.min(self.match_end);
        CtfStatus {
            node: self.node.clone(),
            teams: self.teams.iter().map(|t| t.name.clone()).collect(),
            captured_ms: self
                .teams
                .iter()
                .map(|t| t.captured_ms + t.capture_start.map_or(0, |s| end.saturating_sub(s)))
                .collect(),
            current: self.current,
            running: self.running,
            time_left_ms: if self.running { self.match_end.saturating_sub(now) } else { 0 },
        }
    }

    /// Apply the capture rules after `reporting` changed presence.
    fn evaluate(&mut self, reporting: usize, now: Millis) -> Option<CtfPresentationRequest> {
        let occupied: Vec<usize> = (0..self.teams.len())
            .filter(|&i| self.teams[i].present_since.is_some())
            .collect();

        match occupied.as_slice() {
            [] => None,
            &[only] => {
                if self.current == Some(only) {
                    return None;
                }
                self.close_capture(now);
                self.current = Some(only);
                self.contested = false;
                let team = &mut self.teams[only];
                team.capture_start = Some(now);
                info!("🚩 {} captured the gate", team.name);
                Some(CtfPresentationRequest {
                    team: Some(only),
                    color: team.color,
                    mode: PresentationMode::Solid,
                })
            }
            _ => {
                if self.contested {
                    return None;
                }
                self.close_capture(now);
                self.current = None;
                self.contested = true;
                info!("⚔️ gate contested by {} teams", occupied.len());
                Some(CtfPresentationRequest {
                    team: Some(reporting),
                    color: self.teams[reporting].color,
                    mode: PresentationMode::Blink,
                })
            }
        }
    }
}

fn dark() -> CtfPresentationRequest {
    CtfPresentationRequest { team: None, color: Color::BLACK, mode: PresentationMode::Solid }
}

// ── Shared Handle ─────────────────────────────────────────────────────────────

/// State shared between the dispatcher and the heartbeat task.
#[derive(Clone)]
struct CtfShared {
    state: Arc<Mutex<CtfState>>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
}

impl CtfShared {
    fn lock(&self) -> MutexGuard<'_, CtfState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// End the match once its time is up and release the holder. Returns
    /// the status when anything changed.
    fn expire(&self, now: Millis) -> Option<CtfStatus> {
        let mut st = self.lock();
        let mut changed = false;
        if st.running && now >= st.match_end {
            st.close_capture(now);
            st.running = false;
            changed = true;
            info!("🏁 ctf match over");
        }
        if !st.running && st.current.is_some() {
            st.close_capture(now);
            st.current = None;
            changed = true;
        }
        changed.then(|| st.status(now))
    }

    /// Heartbeat: expire, then publish the status either way.
    fn tick(&self, now: Millis) {
        let status = self.expire(now).unwrap_or_else(|| self.lock().status(now));
        self.publisher.publish(Outbound::CtfStatus(status));
    }
}

pub struct CtfController {
    shared: CtfShared,
    heartbeat: Option<JoinHandle<()>>,
}

impl CtfController {
    pub fn new(cfg: &NodeConfig, publisher: Publisher, clock: Arc<dyn Clock>) -> Self {
        let snapshot = cfg.snapshot();
        let teams = snapshot
            .configured()
            .map(|ch| Team {
                name: cfg.pilot_name(ch),
                freq: ch.freq,
                color: ch.led_color,
                present_since: None,
                capture_start: None,
                captured_ms: 0,
            })
            .collect();
        let state = CtfState { node: cfg.node_name.clone(), teams, ..Default::default() };

        Self {
            shared: CtfShared { state: Arc::new(Mutex::new(state)), publisher, clock },
            heartbeat: None,
        }
    }

    /// Start a match of `duration_ms`. Capture times start from zero.
    pub fn start(&mut self, duration_ms: Millis, now: Millis) {
        let status = {
            let mut st = self.shared.lock();
            for team in st.teams.iter_mut() {
                team.capture_start = None;
                team.captured_ms = 0;
            }
            st.current = None;
            st.contested = false;
            st.running = true;
            st.match_end = now + duration_ms;
            st.status(now)
        };
        info!("🚩 ctf match started, {} s", duration_ms / 1000);
        self.shared.publisher.publish(Outbound::CtfPresentation(dark()));
        self.shared.publisher.publish(Outbound::CtfStatus(status));
    }

    /// End the match now. Capture times are kept for the final status.
    pub fn stop(&mut self, now: Millis) {
        let status = {
            let mut st = self.shared.lock();
            st.close_capture(now);
            st.current = None;
            st.contested = false;
            st.running = false;
            st.match_end = st.match_end.min(now);
            st.status(now)
        };
        info!("ctf match stopped");
        self.shared.publisher.publish(Outbound::CtfPresentation(dark()));
        self.shared.publisher.publish(Outbound::CtfStatus(status));
    }

    pub fn status(&self, now: Millis) -> CtfStatus {
        self.shared.lock().status(now)
    }

    fn spawn_heartbeat(&self) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, ctf heartbeat disabled");
            return None;
        };
        let shared = self.shared.clone();
        Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                shared.tick(shared.clock.now_ms());
            }
        }))
    }
}

impl ModeController for CtfController {
    fn on_enter(&mut self, _now: Millis) {
        info!("🚩 ctf mode, {} teams", self.shared.lock().teams.len());
        if self.heartbeat.is_none() {
            self.heartbeat = self.spawn_heartbeat();
        }
    }

    fn on_exit(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    fn on_gate_event(&mut self, event: &GateEvent) {
        let request = {
            let mut st = self.shared.lock();
            let Some(idx) = st.teams.iter().position(|t| t.freq == event.freq) else {
                debug!("gate event for unconfigured {} MHz", event.freq);
                return;
            };
            st.teams[idx].present_since = match event.kind {
                GateEventKind::Enter => Some(event.abs_time_ms),
                GateEventKind::Passed => None,
            };
            if !st.running {
                return;
            }
            st.evaluate(idx, event.abs_time_ms).map(|req| (req, st.status(event.abs_time_ms)))
        };

        if let Some((req, status)) = request {
            self.shared.publisher.publish(Outbound::CtfPresentation(req));
            self.shared.publisher.publish(Outbound::CtfStatus(status));
        }
    }

    fn on_tick(&mut self, now: Millis) {
        if let Some(status) = self.shared.expire(now) {
            self.shared.publisher.publish(Outbound::CtfStatus(status));
        }
    }
}

impl Drop for CtfController {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}
