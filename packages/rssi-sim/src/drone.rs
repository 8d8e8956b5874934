//! drone.rs — Drone flight model
//!
//! Each simulated drone flies laps on one video frequency. Its signal at the
//! gate receiver is modelled as a Gaussian bell centred on the moment the
//! drone passes the gate:
//!
//! ```text
//!   signal(t) = peak · exp(−(t − t_pass)² / (2 · width²))
//! ```
//!
//! Lap times are drawn from a normal distribution and floored at
//! `lap_min_ms`, which keeps consecutive bells well separated.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use sft_types::Millis;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Mean lap time (ms)
    pub lap_mean_ms: f64,
    /// Standard deviation of the lap time (ms)
    pub lap_sd_ms: f64,
    /// No lap is ever faster than this (ms)
    pub lap_min_ms: f64,
    /// Bell width (one standard deviation, ms)
    pub pass_width_ms: f64,
    /// Signal rise over the noise floor at the gate (mV)
    pub peak_over_floor: f64,
    /// Relative spread of the per-pass peak
    pub peak_jitter: f64,
    /// Time of the first gate pass after boot (ms)
    pub first_pass_ms: Millis,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            lap_mean_ms: 12_000.0,
            lap_sd_ms: 1_500.0,
            lap_min_ms: 4_000.0,
            pass_width_ms: 250.0,
            peak_over_floor: 600.0,
            peak_jitter: 0.05,
            first_pass_ms: 3_000,
        }
    }
}

// ── Drone ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Drone {
    pub freq: u16,
    cfg: FlightConfig,
    /// Centre of the current (or next) gate pass
    pass_at: Millis,
    /// Bell height of the current pass
    pass_peak: f64,
    /// Completed gate passes
    passes: u32,
}

impl Drone {
    pub fn new(freq: u16, cfg: FlightConfig) -> Self {
        Self {
            freq,
            pass_at: cfg.first_pass_ms,
            pass_peak: cfg.peak_over_floor,
            passes: 0,
            cfg,
        }
    }

    /// Signal contribution over the noise floor at `now`.
    pub fn signal<R: Rng>(&mut self, now: Millis, rng: &mut R) -> f64 {
        // Roll the schedule past bells that have fully decayed.
        let tail = (self.cfg.pass_width_ms * 4.0) as Millis;
        while now > self.pass_at + tail {
            self.pass_at += self.draw_lap_ms(rng);
            self.pass_peak = self.draw_peak(rng);
            self.passes += 1;
        }

        let dt = now as f64 - self.pass_at as f64;
        let w = self.cfg.pass_width_ms.max(1.0);
        self.pass_peak * (-(dt * dt) / (2.0 * w * w)).exp()
    }

    pub fn next_pass_ms(&self) -> Millis {
        self.pass_at
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    fn draw_lap_ms<R: Rng>(&self, rng: &mut R) -> Millis {
        let z: f64 = rng.sample(StandardNormal);
        let lap = self.cfg.lap_mean_ms + z * self.cfg.lap_sd_ms;
        lap.max(self.cfg.lap_min_ms).max(1.0) as Millis
    }

    fn draw_peak<R: Rng>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        (self.cfg.peak_over_floor * (1.0 + z * self.cfg.peak_jitter)).max(0.0)
    }
}
