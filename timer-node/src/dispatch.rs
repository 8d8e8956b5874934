//! # dispatch
//!
//! The async half of the node. Engine events and control requests meet in
//! one task, so the active game mode and the configuration are only ever
//! touched from here.
//!
//! ## Flow
//! ```text
//!  sampling thread ──EngineEvent──▶ Dispatcher ──Outbound──▶ observers
//!         ▲                            │   ▲
//!         └───────ScannerCommand───────┘   └── Control (CLI, controller API)
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sft_types::Millis;

use crate::clock::Clock;
use crate::config::{ConfigStore, NodeConfig};
use crate::engine::{EngineEvent, ScannerCommand};
use crate::mode::ActiveMode;
use crate::outbound::{Outbound, Publisher};

const MODE_TICK: Duration = Duration::from_secs(1);

/// Requests from outside the sampling path.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Replace the whole configuration; resets every channel.
    Reconfigure(NodeConfig),
    StartCalibration,
    ClearLaps,
    PlayerConnect { addr: IpAddr, name: String },
    PlayerLap { addr: IpAddr, id: u32, rssi: i32, duration_ms: Millis },
    CtfStart { duration_ms: Millis },
    CtfStop,
}

pub struct Dispatcher {
    cfg: NodeConfig,
    store: Arc<dyn ConfigStore>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    scanner: mpsc::Sender<ScannerCommand>,
    mode: ActiveMode,
}

impl Dispatcher {
    pub fn new(
        cfg: NodeConfig,
        store: Arc<dyn ConfigStore>,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
        scanner: mpsc::Sender<ScannerCommand>,
    ) -> Self {
        let mode = ActiveMode::new(&cfg, publisher.clone(), clock.clone());
        Self { cfg, store, publisher, clock, scanner, mode }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    pub fn mode(&self) -> &ActiveMode {
        &self.mode
    }

    /// Configure the scanner and enter the configured mode.
    pub async fn start(&mut self) {
        self.send_scanner(ScannerCommand::Configure(self.cfg.snapshot())).await;
        let now = self.clock.now_ms();
        self.mode.controller().on_enter(now);
    }

    /// Serve until the engine's event queue closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>, mut control: mpsc::Receiver<Control>) {
        self.start().await;
        let mut ticker = tokio::time::interval(MODE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => break,
                },
                Some(ctl) = control.recv() => self.handle_control(ctl).await,
                _ = ticker.tick() => self.tick(),
            }
        }
        self.mode.controller().on_exit();
        info!("dispatcher stopped");
    }

    /// Periodic housekeeping of the active mode.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        self.mode.controller().on_tick(now);
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Gate(gate) => {
                self.mode.controller().on_gate_event(&gate);
                self.publisher.publish(Outbound::Gate(gate));
            }
            EngineEvent::Telemetry(batch) => {
                self.mode.controller().on_telemetry(&batch);
                self.publisher.publish(Outbound::Telemetry(batch));
            }
            EngineEvent::CalibrationComplete { freq, peak } => {
                info!("✅ {} MHz calibrated, peak {}", freq, peak);
                if self.cfg.set_peak(freq, peak) {
                    if let Err(e) = self.store.save(&self.cfg) {
                        warn!("calibrated peak not persisted: {e}");
                    }
                }
                self.mode.controller().on_calibration_complete(freq, peak);
                self.publisher.publish(Outbound::CalibrationComplete { freq, peak });
            }
        }
    }

    pub async fn handle_control(&mut self, control: Control) {
        let now = self.clock.now_ms();
        let game_mode = self.mode.game_mode();
        match control {
            Control::Reconfigure(cfg) => self.reconfigure(cfg, now).await,
            Control::StartCalibration => {
                self.send_scanner(ScannerCommand::StartCalibration).await;
                if let ActiveMode::Race(race) = &mut self.mode {
                    race.start_calibration();
                }
            }
            Control::ClearLaps => match &mut self.mode {
                ActiveMode::Race(race) => race.clear_laps(),
                _ => debug!("clear laps ignored outside race mode"),
            },
            Control::PlayerConnect { addr, name } => match &mut self.mode {
                ActiveMode::Race(race) => {
                    if !race.player_connect(addr, &name) {
                        warn!("player {} from {} rejected", name, addr);
                    }
                }
                _ => debug!("player connect ignored outside race mode"),
            },
            Control::PlayerLap { addr, id, rssi, duration_ms } => match &mut self.mode {
                ActiveMode::Race(race) => {
                    race.player_lap(addr, id, rssi, duration_ms, now);
                }
                _ => debug!("player lap ignored outside race mode"),
            },
            Control::CtfStart { duration_ms } => match &mut self.mode {
                ActiveMode::Ctf(ctf) => ctf.start(duration_ms, now),
                _ => warn!("ctf start ignored: node is in {:?} mode", game_mode),
            },
            Control::CtfStop => match &mut self.mode {
                ActiveMode::Ctf(ctf) => ctf.stop(now),
                _ => warn!("ctf stop ignored: node is in {:?} mode", game_mode),
            },
        }
    }

    async fn reconfigure(&mut self, cfg: NodeConfig, now: Millis) {
        if let Err(e) = cfg.validate() {
            warn!("configuration rejected: {e}");
            return;
        }
        if let Err(e) = self.store.save(&cfg) {
            warn!("configuration not persisted: {e}");
        }

        self.mode.controller().on_exit();
        self.cfg = cfg;
        self.send_scanner(ScannerCommand::Configure(self.cfg.snapshot())).await;
        self.mode = ActiveMode::new(&self.cfg, self.publisher.clone(), self.clock.clone());
        self.mode.controller().on_enter(now);
        info!("🔧 reconfigured: {:?} mode", self.cfg.game_mode);
    }

    async fn send_scanner(&self, cmd: ScannerCommand) {
        if self.scanner.send(cmd).await.is_err() {
            warn!("sampling loop gone, scanner command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemoryStore;
    use sft_types::{ChannelConfig, GameMode, GateEvent, GateEventKind};
    use std::net::Ipv4Addr;
    use tokio::sync::broadcast;

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<MemoryStore>,
        scanner_rx: mpsc::Receiver<ScannerCommand>,
        out: broadcast::Receiver<Outbound>,
        clock: ManualClock,
    }

    fn harness(cfg: NodeConfig) -> Harness {
        let store = Arc::new(MemoryStore::new(cfg.clone()));
        let publisher = Publisher::new();
        let out = publisher.subscribe();
        let (tx, scanner_rx) = mpsc::channel(8);
        let manual = ManualClock::starting_at(0);
        let clock: Arc<dyn Clock> = Arc::new(manual.clone());
        let dispatcher = Dispatcher::new(cfg, store.clone(), publisher, clock, tx);
        Harness { dispatcher, store, scanner_rx, out, clock: manual }
    }

    fn drain(rx: &mut broadcast::Receiver<Outbound>) -> Vec<Outbound> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn start_configures_scanner() {
        let mut h = harness(NodeConfig::default());
        h.dispatcher.start().await;
        let cmd = h.scanner_rx.try_recv().unwrap();
        assert_eq!(cmd, ScannerCommand::Configure(NodeConfig::default().snapshot()));
    }

    #[tokio::test]
    async fn calibration_result_is_persisted() {
        let mut h = harness(NodeConfig::default());
        h.dispatcher.handle_event(EngineEvent::CalibrationComplete { freq: 5917, peak: 1020 });
        assert_eq!(h.store.load().channels[0].peak, 1020);
        assert_eq!(h.dispatcher.config().channels[0].peak, 1020);
        assert!(drain(&mut h.out).contains(&Outbound::CalibrationComplete { freq: 5917, peak: 1020 }));
    }

    #[tokio::test]
    async fn gate_events_reach_mode_and_observers() {
        let mut h = harness(NodeConfig::default());
        for at in [1_000, 13_000] {
            h.dispatcher.handle_event(EngineEvent::Gate(GateEvent {
                freq: 5917,
                rssi: 900,
                abs_time_ms: at,
                kind: GateEventKind::Passed,
            }));
        }
        let out = drain(&mut h.out);
        assert_eq!(out.iter().filter(|m| matches!(m, Outbound::Gate(_))).count(), 2);
        assert_eq!(out.iter().filter(|m| matches!(m, Outbound::LapRecorded(_))).count(), 1);
    }

    #[tokio::test]
    async fn invalid_reconfigure_is_rejected() {
        let mut h = harness(NodeConfig::default());
        let bad = NodeConfig {
            channels: vec![ChannelConfig { offset_enter: 50, offset_leave: 70, ..ChannelConfig::with_freq(5800) }],
            ..Default::default()
        };
        h.dispatcher.handle_control(Control::Reconfigure(bad)).await;
        assert_eq!(h.dispatcher.config(), &NodeConfig::default());
        assert!(h.scanner_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconfigure_switches_mode() {
        let mut h = harness(NodeConfig::default());
        let ctf = NodeConfig { game_mode: GameMode::Ctf, ..Default::default() };
        h.dispatcher.handle_control(Control::Reconfigure(ctf.clone())).await;
        assert_eq!(h.dispatcher.mode().game_mode(), GameMode::Ctf);
        assert_eq!(h.store.load(), ctf);
        assert_eq!(h.scanner_rx.try_recv().unwrap(), ScannerCommand::Configure(ctf.snapshot()));

        h.dispatcher.handle_control(Control::CtfStart { duration_ms: 30_000 }).await;
        assert!(drain(&mut h.out).iter().any(|m| matches!(m, Outbound::CtfStatus(s) if s.running)));
        h.dispatcher.handle_control(Control::Reconfigure(NodeConfig::default())).await;
    }

    #[tokio::test]
    async fn tick_ends_expired_ctf_match() {
        let mut h = harness(NodeConfig { game_mode: GameMode::Ctf, ..Default::default() });
        h.dispatcher.handle_control(Control::CtfStart { duration_ms: 1_000 }).await;
        drain(&mut h.out);

        h.dispatcher.tick();
        assert!(drain(&mut h.out).is_empty());

        h.clock.advance(1_500);
        h.dispatcher.tick();
        let out = drain(&mut h.out);
        assert!(matches!(out.as_slice(), [Outbound::CtfStatus(s)] if !s.running && s.time_left_ms == 0));
    }

    #[tokio::test]
    async fn remote_player_flow() {
        let mut h = harness(NodeConfig::default());
        let addr = IpAddr::V4(Ipv4Addr::new(192, 168, 4, 7));
        h.dispatcher.handle_control(Control::PlayerConnect { addr, name: "kim".into() }).await;
        h.dispatcher
            .handle_control(Control::PlayerLap { addr, id: 1, rssi: 880, duration_ms: 14_000 })
            .await;
        let laps: Vec<_> = drain(&mut h.out)
            .into_iter()
            .filter_map(|m| match m {
                Outbound::LapRecorded(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(laps.len(), 1);
        assert_eq!(laps[0].player, "kim");
    }

    #[tokio::test]
    async fn calibration_command_reaches_scanner() {
        let mut h = harness(NodeConfig::default());
        h.dispatcher.handle_control(Control::StartCalibration).await;
        assert_eq!(h.scanner_rx.try_recv().unwrap(), ScannerCommand::StartCalibration);
    }
}
