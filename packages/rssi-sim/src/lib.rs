//! # rssi-sim
//!
//! Simulated RX5808 receiver for running the gate timer without hardware.
//!
//! Drones fly laps on their video frequencies; the simulated module reports
//! the RSSI voltage of whichever frequency is tuned. Fault scenarios add the
//! conditions a real gate sees: read noise, ripple, dropped reads and
//! cross-talk between channels.
//!
//! Everything is seeded, so a run with the same seed, scenario and sample
//! times is reproducible.

pub mod drone;
pub mod radio;
pub mod scenarios;

pub use drone::{Drone, FlightConfig};
pub use radio::SimRadio;
pub use scenarios::{preset, preset_by_name, ScenarioConfig, ScenarioType};
