//! radio.rs — Simulated RX5808 module
//!
//! Owns one [`Drone`] per simulated pilot and answers the same two questions
//! the real module does: which frequency is tuned, and what voltage does the
//! RSSI pin show right now.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

use sft_types::Millis;

use crate::drone::{Drone, FlightConfig};
use crate::scenarios::ScenarioConfig;

/// ADC full scale of the RSSI pin (mV)
const FULL_SCALE_MV: f64 = 3_300.0;

pub struct SimRadio {
    drones: Vec<Drone>,
    scenario: ScenarioConfig,
    tuned: Option<u16>,
    rng: StdRng,
    reads: u64,
}

impl SimRadio {
    /// One drone per frequency; the drones start staggered by a second so
    /// their first passes do not coincide.
    pub fn new(freqs: &[u16], flight: &FlightConfig, scenario: ScenarioConfig, seed: u64) -> Self {
        let drones = freqs
            .iter()
            .enumerate()
            .map(|(i, &freq)| {
                let cfg = FlightConfig {
                    first_pass_ms: flight.first_pass_ms + i as Millis * 1_000,
                    ..flight.clone()
                };
                Drone::new(freq, cfg)
            })
            .collect();

        Self {
            drones,
            scenario,
            tuned: None,
            rng: StdRng::seed_from_u64(seed),
            reads: 0,
        }
    }

    pub fn tune(&mut self, freq: u16) {
        if self.tuned != Some(freq) {
            debug!("sim radio tuned to {} MHz", freq);
        }
        self.tuned = Some(freq);
    }

    pub fn tuned(&self) -> Option<u16> {
        self.tuned
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn drones(&self) -> &[Drone] {
        &self.drones
    }

    /// RSSI voltage at `now`, `None` when the read fails.
    pub fn sample(&mut self, now: Millis) -> Option<i32> {
        self.reads += 1;

        if self.scenario.dropout_rate > 0.0 && self.rng.gen_bool(self.scenario.dropout_rate.min(1.0)) {
            return None;
        }

        let tuned = self.tuned;
        let crosstalk = self.scenario.crosstalk;
        let rng = &mut self.rng;

        // Every drone is advanced so schedules stay independent of tuning.
        let mut signal = 0.0;
        for drone in self.drones.iter_mut() {
            let s = drone.signal(now, rng);
            if Some(drone.freq) == tuned {
                signal += s;
            } else {
                signal += s * crosstalk;
            }
        }

        if self.scenario.ripple_mv > 0.0 && signal > 1.0 {
            let phase = now as f64 / self.scenario.ripple_period_ms.max(1.0) * std::f64::consts::TAU;
            signal += self.scenario.ripple_mv * phase.sin();
        }

        let noise: f64 = self.rng.sample::<f64, _>(StandardNormal) * self.scenario.noise_sd;
        let mv = (self.scenario.noise_floor + signal + noise).clamp(0.0, FULL_SCALE_MV);
        Some(mv.round() as i32)
    }
}
