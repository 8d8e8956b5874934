//! # forward
//!
//! Child nodes report every recorded lap to their controller node over
//! HTTP. Forwarding is fire and forget: a failed post is logged and the lap
//! stays local.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sft_types::LapRecorded;

use crate::outbound::{Outbound, Publisher};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("building HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("posting lap to {url}: {source}")]
    Post { url: String, source: reqwest::Error },
    #[error("controller answered {status} for {url}")]
    Status { url: String, status: reqwest::StatusCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LapPayload {
    pub player: String,
    pub lap: LapBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LapBody {
    pub id: u32,
    pub rssi: i32,
    pub duration: u64,
}

/// Body of `POST /api/v1/player/lap`.
pub fn lap_payload(rec: &LapRecorded) -> LapPayload {
    LapPayload {
        player: rec.player.clone(),
        lap: LapBody {
            id: rec.lap.id,
            rssi: rec.lap.rssi,
            duration: rec.lap.duration_ms,
        },
    }
}

pub struct HttpLapForwarder {
    client: Client,
    url: String,
}

impl HttpLapForwarder {
    /// `ctrl_addr` is the controller's `host:port`.
    pub fn new(ctrl_addr: &str) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self { client, url: lap_url(ctrl_addr) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn forward(&self, rec: &LapRecorded) -> Result<(), ForwardError> {
        let res = self
            .client
            .post(&self.url)
            .json(&lap_payload(rec))
            .send()
            .await
            .map_err(|source| ForwardError::Post { url: self.url.clone(), source })?;

        let status = res.status();
        if !status.is_success() {
            return Err(ForwardError::Status { url: self.url.clone(), status });
        }
        debug!("lap {} of {} forwarded", rec.lap.id, rec.player);
        Ok(())
    }

    /// Forward every [`Outbound::LapRecorded`] published from now on.
    pub fn spawn(self, publisher: &Publisher) -> JoinHandle<()> {
        let mut rx = publisher.subscribe();
        info!("forwarding laps to {}", self.url);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Outbound::LapRecorded(rec)) => {
                        if let Err(e) = self.forward(&rec).await {
                            warn!("{e}");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("lap forwarder lagged, {n} messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn lap_url(ctrl_addr: &str) -> String {
    let base = ctrl_addr.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/api/v1/player/lap")
    } else {
        format!("http://{base}/api/v1/player/lap")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sft_types::{Lap, PlayerIdentity};

    #[test]
    fn payload_shape() {
        let rec = LapRecorded {
            player: "ace".into(),
            identity: PlayerIdentity::Local { freq: 5800 },
            lap: Lap { id: 4, rssi: 950, duration_ms: 12_345, abs_time_ms: 99_000 },
            delta_ms: -200,
        };
        let v = serde_json::to_value(lap_payload(&rec)).unwrap();
        assert_eq!(v, serde_json::json!({"player": "ace", "lap": {"id": 4, "rssi": 950, "duration": 12345}}));
    }

    #[test]
    fn url_from_ctrl_addr() {
        assert_eq!(lap_url("192.168.4.1:80"), "http://192.168.4.1:80/api/v1/player/lap");
        assert_eq!(lap_url("http://ctrl.local/"), "http://ctrl.local/api/v1/player/lap");
    }

    #[tokio::test]
    async fn unreachable_controller_is_an_error_not_a_panic() {
        // port 9 on loopback: nothing listens, the connect fails fast
        let fwd = HttpLapForwarder::new("127.0.0.1:9").unwrap();
        let rec = LapRecorded {
            player: "ace".into(),
            identity: PlayerIdentity::Local { freq: 5800 },
            lap: Lap { id: 1, rssi: 900, duration_ms: 1, abs_time_ms: 1 },
            delta_ms: 0,
        };
        assert!(fwd.forward(&rec).await.is_err());
    }
}
