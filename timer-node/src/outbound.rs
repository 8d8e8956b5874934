//! # outbound
//!
//! Everything the node tells its collaborators (LED strip, overlay, UI,
//! controller node) goes over one broadcast bus. Delivery is best effort: a
//! send with no subscriber is not an error, and a subscriber that falls
//! behind loses the oldest messages.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sft_types::{CtfPresentationRequest, CtfStatus, GateEvent, LapRecorded, TelemetryBatch};

use crate::osd::OverlayText;

/// Capacity of the broadcast ring
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Gate(GateEvent),
    Telemetry(TelemetryBatch),
    LapRecorded(LapRecorded),
    OverlayText(OverlayText),
    CtfStatus(CtfStatus),
    CtfPresentation(CtfPresentationRequest),
    SpectrumLevel { freq: u16, lit_leds: u16 },
    CalibrationComplete { freq: u16, peak: i32 },
}

#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<Outbound>,
}

impl Publisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, msg: Outbound) {
        // Err only means nobody listens right now
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.tx.subscribe()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Log every outbound message. Telemetry is only logged at debug level.
pub fn spawn_log_observer(publisher: &Publisher) -> JoinHandle<()> {
    let mut rx = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Outbound::Telemetry(batch)) => {
                    debug!("telemetry {} MHz: {} points", batch.freq, batch.points.len());
                }
                Ok(Outbound::LapRecorded(rec)) => {
                    info!(
                        "🏁 {} lap {}: {} ms (Δ {:+} ms, rssi {})",
                        rec.player, rec.lap.id, rec.lap.duration_ms, rec.delta_ms, rec.lap.rssi
                    );
                }
                Ok(Outbound::CtfStatus(status)) => {
                    debug!("ctf status: {:?} captured {:?}", status.current, status.captured_ms);
                }
                Ok(msg) => info!("{:?}", msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("log observer lagged, {n} messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sft_types::GateEventKind;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let p = Publisher::new();
        p.publish(Outbound::SpectrumLevel { freq: 5800, lit_leds: 3 });
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let p = Publisher::new();
        let mut rx = p.subscribe();
        let gate = GateEvent { freq: 5800, rssi: 900, abs_time_ms: 10, kind: GateEventKind::Enter };
        p.publish(Outbound::Gate(gate));
        p.publish(Outbound::CalibrationComplete { freq: 5800, peak: 950 });
        assert_eq!(rx.recv().await.unwrap(), Outbound::Gate(gate));
        assert_eq!(rx.recv().await.unwrap(), Outbound::CalibrationComplete { freq: 5800, peak: 950 });
    }

    #[test]
    fn wire_tagging() {
        let v = serde_json::to_value(Outbound::SpectrumLevel { freq: 5800, lit_leds: 7 }).unwrap();
        assert_eq!(v["type"], "spectrum_level");
        assert_eq!(v["lit_leds"], 7);
    }
}
