//! # telemetry
//!
//! Per-channel RSSI history for LED and UI observers.
//!
//! One point is kept every [`TELEMETRY_INTERVAL_MS`]; in between, a higher
//! sample raises the most recent point instead of adding one. An occupancy
//! change always adds a point. A batch is handed out once it is full or
//! spans [`TELEMETRY_WINDOW_MS`]; the batcher starts over either way, so a
//! slow observer costs data, never sampling time.

use std::mem;

use sft_types::{Millis, TelemetryBatch, TelemetryPoint, TELEMETRY_BATCH_MAX};

/// Minimum spacing of throttled points
pub const TELEMETRY_INTERVAL_MS: Millis = 100;
/// Time span after which a batch is sent out
pub const TELEMETRY_WINDOW_MS: Millis = 300;

#[derive(Debug, Clone)]
pub struct TelemetryBatcher {
    freq: u16,
    points: Vec<TelemetryPoint>,
    next_emit: Millis,
    last_occupied: bool,
}

impl TelemetryBatcher {
    pub fn new(freq: u16) -> Self {
        Self {
            freq,
            points: Vec::with_capacity(TELEMETRY_BATCH_MAX),
            next_emit: 0,
            last_occupied: false,
        }
    }

    /// Offer one sample. Returns a finished batch when one is due.
    pub fn collect(&mut self, now: Millis, smoothed: i32, raw: i32, occupied: bool) -> Option<TelemetryBatch> {
        if now >= self.next_emit || occupied != self.last_occupied {
            let batch = if self.is_due() { Some(self.take()) } else { None };

            self.points.push(TelemetryPoint { abs_time_ms: now, smoothed, raw, occupied });
            self.next_emit = now + TELEMETRY_INTERVAL_MS;
            self.last_occupied = occupied;
            return batch;
        }

        if let Some(last) = self.points.last_mut() {
            if smoothed > last.smoothed {
                last.smoothed = smoothed;
                last.raw = raw;
            }
        }
        None
    }

    fn is_due(&self) -> bool {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => {
                self.points.len() >= TELEMETRY_BATCH_MAX
                    || last.abs_time_ms - first.abs_time_ms >= TELEMETRY_WINDOW_MS
            }
            _ => false,
        }
    }

    fn take(&mut self) -> TelemetryBatch {
        TelemetryBatch {
            freq: self.freq,
            points: mem::replace(&mut self.points, Vec::with_capacity(TELEMETRY_BATCH_MAX)),
        }
    }

    pub fn pending(&self) -> &[TelemetryPoint] {
        &self.points
    }
}
