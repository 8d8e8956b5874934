//! # receiver
//!
//! The physical RF receiver as the sampling loop sees it: tune to a
//! frequency, read one RSSI sample.
//!
//! ## RX5808 tuning
//! The module's synthesizer takes a 25-bit SPI frame (LSB first). The
//! frequency word is `flsb = (freq − 479) / 2`, split into a 5-bit low part
//! and the remaining high part and packed into the frame bytes the module
//! expects. Only the 5300–6000 MHz band is accepted.

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use rssi_sim::SimRadio;

use crate::clock::Clock;

/// Lowest frequency the module tunes to (MHz)
pub const BAND_MIN_MHZ: u16 = 5300;
/// Highest frequency the module tunes to (MHz)
pub const BAND_MAX_MHZ: u16 = 6000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceiverError {
    #[error("frequency {0} MHz outside the 5300-6000 MHz band")]
    OutOfBand(u16),
    #[error("tuning to {freq} MHz failed: {reason}")]
    Tune { freq: u16, reason: String },
    #[error("RSSI read failed: {0}")]
    Read(String),
}

/// A tunable RSSI source. Errors are transient: the caller skips the tick.
pub trait Receiver: Send {
    fn tune(&mut self, freq: u16) -> Result<(), ReceiverError>;
    fn read_sample(&mut self) -> Result<i32, ReceiverError>;
}

impl<R: Receiver + ?Sized> Receiver for Box<R> {
    fn tune(&mut self, freq: u16) -> Result<(), ReceiverError> {
        (**self).tune(freq)
    }

    fn read_sample(&mut self) -> Result<i32, ReceiverError> {
        (**self).read_sample()
    }
}

// ── RX5808 Register Word ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rx5808Word {
    pub freq: u16,
    pub flsb: u32,
}

impl Rx5808Word {
    pub fn for_frequency(freq: u16) -> Result<Self, ReceiverError> {
        if !(BAND_MIN_MHZ..=BAND_MAX_MHZ).contains(&freq) {
            return Err(ReceiverError::OutOfBand(freq));
        }
        Ok(Self { freq, flsb: (freq as u32 - 479) / 2 })
    }

    /// The four SPI transmit bytes; the frame is 25 bits long.
    pub fn bytes(&self) -> [u8; 4] {
        let high = (self.flsb >> 5) as u8;
        let low = (self.flsb & 0x1F) as u8;
        [
            low.wrapping_mul(32).wrapping_add(17),
            high.wrapping_mul(16).wrapping_add(low / 8),
            high / 16,
            0,
        ]
    }
}

// ── Simulated Receiver ────────────────────────────────────────────────────────

/// [`Receiver`] backed by the RSSI simulator. Tuning builds the same SPI
/// frame the hardware driver sends and keeps the last one.
pub struct SimulatedReceiver {
    radio: SimRadio,
    clock: Arc<dyn Clock>,
    frame: Option<[u8; 4]>,
}

impl SimulatedReceiver {
    pub fn new(radio: SimRadio, clock: Arc<dyn Clock>) -> Self {
        Self { radio, clock, frame: None }
    }

    pub fn radio(&self) -> &SimRadio {
        &self.radio
    }

    /// SPI frame of the last successful tune.
    pub fn last_frame(&self) -> Option<[u8; 4]> {
        self.frame
    }
}

impl Receiver for SimulatedReceiver {
    fn tune(&mut self, freq: u16) -> Result<(), ReceiverError> {
        let word = Rx5808Word::for_frequency(freq)?;
        let frame = word.bytes();
        trace!(freq, ?frame, "rx5808 tune");
        self.frame = Some(frame);
        self.radio.tune(word.freq);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<i32, ReceiverError> {
        self.radio
            .sample(self.clock.now_ms())
            .ok_or_else(|| ReceiverError::Read("adc oneshot read failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use rssi_sim::{preset, FlightConfig, ScenarioType};

    #[test]
    fn word_for_5800() {
        let w = Rx5808Word::for_frequency(5800).unwrap();
        assert_eq!(w.flsb, 2660);
        assert_eq!(w.bytes(), [145, 48, 5, 0]);
    }

    #[test]
    fn band_edges() {
        assert!(Rx5808Word::for_frequency(5300).is_ok());
        assert!(Rx5808Word::for_frequency(6000).is_ok());
        assert_eq!(Rx5808Word::for_frequency(2400), Err(ReceiverError::OutOfBand(2400)));
        assert_eq!(Rx5808Word::for_frequency(6001), Err(ReceiverError::OutOfBand(6001)));
    }

    #[test]
    fn simulated_receiver_rejects_out_of_band() {
        let clock = ManualClock::starting_at(0);
        let radio = SimRadio::new(&[5800], &FlightConfig::default(), preset(ScenarioType::Clean), 1);
        let mut rx = SimulatedReceiver::new(radio, Arc::new(clock.clone()));

        assert!(rx.tune(7000).is_err());
        assert_eq!(rx.radio().tuned(), None);
        assert_eq!(rx.last_frame(), None);

        rx.tune(5800).unwrap();
        assert_eq!(rx.last_frame(), Some([145, 48, 5, 0]));
        clock.set(3_000);
        let at_gate = rx.read_sample().unwrap();
        assert!(at_gate > 900, "{}", at_gate);
    }
}
