//! # engine
//!
//! The sampling loop: the only owner of the receiver, the channels and their
//! telemetry.
//!
//! ## Architecture
//! The loop runs on its own OS thread and never awaits anything. Each
//! iteration it:
//!   1. applies pending [`ScannerCommand`]s (configuration is a hard reset)
//!   2. lets the scanner sample the tuned channel
//!   3. posts gate events and telemetry to the dispatch side, each with a
//!      bounded timeout; an event that cannot be delivered in time is dropped
//!   4. sleeps the rest of its period
//!
//! A once-per-second timer logs how many samples were actually taken.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, warn};

use sft_types::{ConfigSnapshot, GateEvent, Millis, TelemetryBatch};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::receiver::Receiver;
use crate::scanner::{ChannelScanner, ScanOutput};
use crate::timer::{process_timers, Timer, TimerControl};

/// Statistics line period
const STATS_PERIOD_MS: Millis = 1000;

// ── Messages ──────────────────────────────────────────────────────────────────

/// Dispatch side → sampling loop
#[derive(Debug, Clone, PartialEq)]
pub enum ScannerCommand {
    Configure(ConfigSnapshot),
    StartCalibration,
}

/// Sampling loop → dispatch side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Gate(GateEvent),
    Telemetry(TelemetryBatch),
    CalibrationComplete { freq: u16, peak: i32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostError {
    #[error("event queue full for {0:?}")]
    Timeout(Duration),
    #[error("event queue closed")]
    Closed,
}

/// Where the sampling loop delivers its events.
pub trait EventSink: Send {
    /// Deliver `event`, waiting at most `timeout` for room.
    fn post(&mut self, event: EngineEvent, timeout: Duration) -> Result<(), PostError>;
}

/// Collects events in memory.
impl EventSink for Vec<EngineEvent> {
    fn post(&mut self, event: EngineEvent, _timeout: Duration) -> Result<(), PostError> {
        self.push(event);
        Ok(())
    }
}

/// Bounded tokio queue towards the dispatch task.
pub struct QueueSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for QueueSink {
    fn post(&mut self, event: EngineEvent, timeout: Duration) -> Result<(), PostError> {
        let deadline = Instant::now() + timeout;
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(PostError::Closed),
                Err(TrySendError::Full(back)) => {
                    if Instant::now() >= deadline {
                        return Err(PostError::Timeout(timeout));
                    }
                    event = back;
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

// ── Sampling Engine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Housekeeping {
    Stats,
}

pub struct SamplingEngine<R, S> {
    scanner: ChannelScanner<R>,
    sink: S,
    commands: mpsc::Receiver<ScannerCommand>,
    clock: Arc<dyn Clock>,
    settings: EngineConfig,
    pace: Timer,
    housekeeping: [Timer<Housekeeping>; 1],
    reads: u32,
    dropped: u32,
}

impl<R: Receiver, S: EventSink> SamplingEngine<R, S> {
    pub fn new(
        receiver: R,
        sink: S,
        commands: mpsc::Receiver<ScannerCommand>,
        clock: Arc<dyn Clock>,
        settings: EngineConfig,
    ) -> Self {
        let now = clock.now_ms();
        let mut stats = Timer::new();
        stats.start(now, STATS_PERIOD_MS, Some(Housekeeping::Stats));

        Self {
            scanner: ChannelScanner::new(receiver, settings.dwell_ticks),
            sink,
            commands,
            clock,
            settings,
            pace: Timer::new(),
            housekeeping: [stats],
            reads: 0,
            dropped: 0,
        }
    }

    /// One loop iteration. Returns how long to sleep before the next one.
    pub fn step(&mut self) -> Duration {
        let now = self.clock.now_ms();
        self.pace.start(now, self.settings.loop_period_ms, None);

        self.drain_commands();

        let out = self.scanner.tick(now);
        if out.sampled.is_some() {
            self.reads += 1;
        }
        self.deliver(out);

        let now = self.clock.now_ms();
        let reads = &mut self.reads;
        let dropped = &mut self.dropped;
        process_timers(&mut self.housekeeping, now, |job, overshoot| match job {
            Housekeeping::Stats => {
                let window = STATS_PERIOD_MS + overshoot;
                debug!(
                    "rssi reads {}/{}ms ({:.2}/ms), {} events dropped",
                    reads,
                    window,
                    *reads as f64 / window as f64,
                    dropped
                );
                *reads = 0;
                *dropped = 0;
                TimerControl::Restart
            }
        });

        Duration::from_millis(self.pace.remaining(now))
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(ScannerCommand::Configure(snapshot)) => self.scanner.configure(&snapshot),
                Ok(ScannerCommand::StartCalibration) => self.scanner.start_calibration(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn deliver(&mut self, out: ScanOutput) {
        let event_timeout = Duration::from_millis(self.settings.event_post_timeout_ms);
        let telemetry_timeout = Duration::from_millis(self.settings.telemetry_post_timeout_ms);

        if let Some(detection) = out.detection {
            let event = detection.event;
            if let Err(e) = self.sink.post(EngineEvent::Gate(event), event_timeout) {
                self.dropped += 1;
                warn!("gate event {:?} on {} MHz dropped: {e}", event.kind, event.freq);
            }
            if let Some(peak) = detection.calibrated_peak {
                let done = EngineEvent::CalibrationComplete { freq: event.freq, peak };
                if let Err(e) = self.sink.post(done, event_timeout) {
                    self.dropped += 1;
                    warn!("calibration result for {} MHz dropped: {e}", event.freq);
                }
            }
        }

        if let Some(batch) = out.telemetry {
            let freq = batch.freq;
            if let Err(e) = self.sink.post(EngineEvent::Telemetry(batch), telemetry_timeout) {
                self.dropped += 1;
                debug!("telemetry batch for {} MHz dropped: {e}", freq);
            }
        }
    }

    /// Run until `shutdown` is raised.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!("📡 sampling loop started ({} ms period)", self.settings.loop_period_ms);
        while !shutdown.load(Ordering::Relaxed) {
            let wait = self.step();
            if !wait.is_zero() {
                thread::sleep(wait);
            }
        }
        info!("sampling loop stopped");
    }

    pub fn scanner(&self) -> &ChannelScanner<R> {
        &self.scanner
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<R, S> SamplingEngine<R, S>
where
    R: Receiver + 'static,
    S: EventSink + 'static,
{
    /// Move the loop onto its own named thread.
    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("sampling".into())
            .spawn(move || self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::receiver::ReceiverError;
    use sft_types::{ChannelConfig, GateEventKind};
    use std::collections::VecDeque;

    struct Script(VecDeque<i32>);

    impl Receiver for Script {
        fn tune(&mut self, _freq: u16) -> Result<(), ReceiverError> {
            Ok(())
        }

        fn read_sample(&mut self) -> Result<i32, ReceiverError> {
            self.0.pop_front().ok_or_else(|| ReceiverError::Read("script exhausted".into()))
        }
    }

    fn calibrating_snapshot() -> ConfigSnapshot {
        ConfigSnapshot {
            channels: vec![ChannelConfig {
                freq: 5800,
                filter: 100,
                calib_max_lap_count: 1,
                calib_min_rssi_peak: 600,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn calibration_result_is_posted() {
        let clock = ManualClock::starting_at(0);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let samples = [450, 950, 950, 900, 500, 450].into_iter().collect();
        let mut engine = SamplingEngine::new(
            Script(samples),
            Vec::new(),
            cmd_rx,
            Arc::new(clock.clone()),
            EngineConfig::default(),
        );

        cmd_tx.try_send(ScannerCommand::Configure(calibrating_snapshot())).unwrap();
        cmd_tx.try_send(ScannerCommand::StartCalibration).unwrap();

        for _ in 0..6 {
            engine.step();
            clock.advance(1000);
        }

        let events = engine.sink();
        let kinds: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Gate(g) => Some(g.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![GateEventKind::Enter, GateEventKind::Passed]);
        assert!(events.contains(&EngineEvent::CalibrationComplete { freq: 5800, peak: 950 }));
        assert!(!engine.scanner().channels()[0].is_calibrating());
    }

    #[test]
    fn step_reports_remaining_period() {
        let clock = ManualClock::starting_at(0);
        let (_tx, rx) = mpsc::channel(1);
        let mut engine = SamplingEngine::new(Script(VecDeque::new()), Vec::new(), rx, Arc::new(clock), EngineConfig::default());
        assert_eq!(engine.step(), Duration::from_millis(5));
    }

    #[test]
    fn full_queue_drops_after_timeout() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = QueueSink::new(tx);
        let ev = EngineEvent::CalibrationComplete { freq: 5800, peak: 1 };
        assert!(sink.post(ev.clone(), Duration::from_millis(5)).is_ok());
        assert_eq!(
            sink.post(ev, Duration::from_millis(5)),
            Err(PostError::Timeout(Duration::from_millis(5)))
        );
    }

    #[test]
    fn closed_queue_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = QueueSink::new(tx);
        let ev = EngineEvent::CalibrationComplete { freq: 5800, peak: 1 };
        assert_eq!(sink.post(ev, Duration::from_millis(5)), Err(PostError::Closed));
    }
}
