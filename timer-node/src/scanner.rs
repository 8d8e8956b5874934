//! # scanner
//!
//! Owns the receiver and the per-frequency channel state, and decides which
//! frequency is tuned.
//!
//! ## Round robin
//! Every `dwell_ticks` sampling ticks the scanner moves on to the next
//! configured frequency. The dwell is counted in ticks, not wall time, so it
//! scales with the real loop rate. With a single channel there is nothing to
//! rotate and the receiver is tuned once.
//!
//! ## Tuning failures
//! A failed tune leaves no channel selected: the following ticks read
//! nothing and detect nothing. The next dwell change tries the next channel
//! in line, so one bad frequency never stalls the rotation.

use sft_types::{ConfigSnapshot, Millis, TelemetryBatch};
use tracing::{debug, info, warn};

use crate::detector::{Channel, Detection};
use crate::receiver::Receiver;
use crate::telemetry::TelemetryBatcher;

/// What one sampling tick produced.
#[derive(Debug, Default)]
pub struct ScanOutput {
    /// Frequency sampled this tick, `None` when nothing was tuned or the read failed
    pub sampled: Option<u16>,
    pub detection: Option<Detection>,
    pub telemetry: Option<TelemetryBatch>,
}

pub struct ChannelScanner<R> {
    receiver: R,
    channels: Vec<Channel>,
    batchers: Vec<TelemetryBatcher>,
    /// Channel currently tuned
    current: Option<usize>,
    /// Position in the rotation, kept across tuning failures
    cursor: usize,
    dwell_ticks: u32,
    dwell_count: u32,
}

impl<R: Receiver> ChannelScanner<R> {
    pub fn new(receiver: R, dwell_ticks: u32) -> Self {
        Self {
            receiver,
            channels: Vec::new(),
            batchers: Vec::new(),
            current: None,
            cursor: 0,
            dwell_ticks: dwell_ticks.max(1),
            dwell_count: 0,
        }
    }

    /// Replace all channel state with `snapshot`. Calibration progress,
    /// occupancy and telemetry of every channel start over.
    pub fn configure(&mut self, snapshot: &ConfigSnapshot) {
        let listed = snapshot.channels.iter().filter(|c| c.is_configured()).count();

        self.channels = snapshot.configured().map(Channel::from_config).collect();
        self.batchers = self.channels.iter().map(|c| TelemetryBatcher::new(c.freq)).collect();
        if self.channels.len() < listed {
            warn!(
                "{} configured frequencies ignored (duplicate or beyond capacity)",
                listed - self.channels.len()
            );
        }

        let freqs: Vec<u16> = self.channels.iter().map(|c| c.freq).collect();
        info!("scanner configured: {:?}", freqs);

        self.current = None;
        self.cursor = 0;
        self.dwell_count = 0;
        if !self.channels.is_empty() {
            self.select(0);
        }
    }

    pub fn start_calibration(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.start_calibration();
        }
        info!("calibration started on {} channels", self.channels.len());
    }

    /// One sampling tick at `now`.
    pub fn tick(&mut self, now: Millis) -> ScanOutput {
        let mut out = ScanOutput::default();

        if let Some(idx) = self.current {
            match self.receiver.read_sample() {
                Ok(raw) => {
                    let ch = &mut self.channels[idx];
                    out.sampled = Some(ch.freq);
                    out.detection = ch.process(raw, now);
                    out.telemetry = self.batchers[idx].collect(now, ch.smoothed(), ch.raw(), ch.is_occupied());
                }
                Err(e) => debug!("sample skipped: {e}"),
            }
        }

        self.dwell_count += 1;
        if self.dwell_count >= self.dwell_ticks {
            self.dwell_count = 0;
            if self.channels.len() > 1 || (self.current.is_none() && !self.channels.is_empty()) {
                let next = (self.cursor + 1) % self.channels.len();
                self.select(next);
            }
        }

        out
    }

    fn select(&mut self, idx: usize) {
        self.cursor = idx;
        let freq = self.channels[idx].freq;
        match self.receiver.tune(freq) {
            Ok(()) => self.current = Some(idx),
            Err(e) => {
                warn!("tuning {} MHz failed: {e}", freq);
                self.current = None;
            }
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn current_freq(&self) -> Option<u16> {
        self.current.map(|i| self.channels[i].freq)
    }

    pub fn receiver(&self) -> &R {
        &self.receiver
    }
}
