//! # spectrum
//!
//! Spectrum mode turns the LED strip into a signal meter: each telemetry
//! batch lights a share of the strip proportional to how far its average
//! smoothed RSSI sits between the noise floor and the channel's peak.

use std::collections::HashMap;

use sft_types::{GateEvent, Millis, TelemetryBatch};
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::mode::ModeController;
use crate::outbound::{Outbound, Publisher};

/// RSSI reading of an idle receiver
pub const GROUND_RSSI: i32 = 500;

/// LEDs to light for `avg` on a strip of `led_num`, given the channel `peak`.
///
/// Zero when the peak is unknown or not above the floor.
pub fn lit_leds(avg: i32, peak: i32, led_num: u16) -> u16 {
    if peak <= GROUND_RSSI || avg <= GROUND_RSSI {
        return 0;
    }
    let percent = (avg - GROUND_RSSI) as i64 * 100 / (peak - GROUND_RSSI) as i64;
    let lit = led_num as i64 * percent / 100;
    lit.clamp(0, led_num as i64) as u16
}

pub struct SpectrumController {
    peaks: HashMap<u16, i32>,
    led_num: u16,
    publisher: Publisher,
}

impl SpectrumController {
    pub fn new(cfg: &NodeConfig, publisher: Publisher) -> Self {
        let peaks = cfg.snapshot().configured().map(|c| (c.freq, c.peak as i32)).collect();
        Self { peaks, led_num: cfg.led_num, publisher }
    }
}

impl ModeController for SpectrumController {
    fn on_enter(&mut self, _now: Millis) {
        info!("🌈 spectrum mode on {} LEDs", self.led_num);
    }

    fn on_gate_event(&mut self, _event: &GateEvent) {}

    fn on_telemetry(&mut self, batch: &TelemetryBatch) {
        let Some(&peak) = self.peaks.get(&batch.freq) else {
            return;
        };
        if peak == 0 {
            debug!("{} MHz has no peak yet", batch.freq);
            return;
        }
        let Some(avg) = batch.average_smoothed() else {
            return;
        };
        let lit = lit_leds(avg, peak, self.led_num);
        self.publisher.publish(Outbound::SpectrumLevel { freq: batch.freq, lit_leds: lit });
    }

    fn on_calibration_complete(&mut self, freq: u16, peak: i32) {
        self.peaks.insert(freq, peak);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sft_types::{ChannelConfig, TelemetryPoint};

    #[test]
    fn level_scale() {
        assert_eq!(lit_leds(700, 900, 24), 12);
        assert_eq!(lit_leds(900, 900, 24), 24);
        assert_eq!(lit_leds(1200, 900, 24), 24);
        assert_eq!(lit_leds(450, 900, 24), 0);
        assert_eq!(lit_leds(800, 500, 24), 0);
        assert_eq!(lit_leds(800, 0, 24), 0);
    }

    fn batch(freq: u16, values: &[i32]) -> TelemetryBatch {
        TelemetryBatch {
            freq,
            points: values
                .iter()
                .enumerate()
                .map(|(i, &v)| TelemetryPoint { abs_time_ms: i as Millis, smoothed: v, raw: v, occupied: false })
                .collect(),
        }
    }

    #[test]
    fn telemetry_drives_level() {
        let cfg = NodeConfig {
            led_num: 10,
            channels: vec![ChannelConfig { peak: 1000, ..ChannelConfig::with_freq(5800) }],
            ..Default::default()
        };
        let publisher = Publisher::new();
        let mut rx = publisher.subscribe();
        let mut spectrum = SpectrumController::new(&cfg, publisher);

        spectrum.on_telemetry(&batch(5800, &[700, 800, 900]));
        spectrum.on_telemetry(&batch(5917, &[900]));
        assert_eq!(rx.try_recv().unwrap(), Outbound::SpectrumLevel { freq: 5800, lit_leds: 6 });
        assert!(rx.try_recv().is_err());

        spectrum.on_calibration_complete(5800, 700);
        spectrum.on_telemetry(&batch(5800, &[700]));
        assert_eq!(rx.try_recv().unwrap(), Outbound::SpectrumLevel { freq: 5800, lit_leds: 10 });
    }
}
