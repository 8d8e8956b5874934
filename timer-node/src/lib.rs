//! # timer-node
//!
//! Gate detection and game-state engine of a drone-race gate timer.
//!
//! The node listens to up to eight video-transmitter frequencies through one
//! RSSI receiver, turns signal-strength peaks into gate events and feeds them
//! to the active game mode (race, capture the flag or spectrum).
//!
//! ## Layout
//! - sampling side (own thread): [`receiver`], [`scanner`], [`detector`],
//!   [`telemetry`], [`engine`]
//! - dispatch side (tokio): [`dispatch`], [`mode`], [`race`], [`ctf`],
//!   [`spectrum`], [`outbound`], [`forward`]
//! - shared: [`clock`], [`timer`], [`config`], [`ledger`], [`osd`]

pub mod clock;
pub mod config;
pub mod ctf;
pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod forward;
pub mod ledger;
pub mod mode;
pub mod osd;
pub mod outbound;
pub mod race;
pub mod receiver;
pub mod scanner;
pub mod spectrum;
pub mod telemetry;
pub mod timer;
