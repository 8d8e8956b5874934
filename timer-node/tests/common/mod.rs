#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;

use sft_types::{ChannelConfig, ConfigSnapshot, GateEvent, Millis};
use timer_node::clock::{Clock, ManualClock};
use timer_node::config::EngineConfig;
use timer_node::engine::{EngineEvent, SamplingEngine, ScannerCommand};
use timer_node::receiver::{Receiver, ReceiverError};

/// Receiver that replays a fixed list of samples and remembers every tune.
#[derive(Default)]
pub struct ScriptedReceiver {
    pub samples: VecDeque<i32>,
    /// Returned once the script is exhausted
    pub idle: i32,
    pub tuned: Vec<u16>,
    pub broken: HashSet<u16>,
}

impl ScriptedReceiver {
    pub fn new(samples: &[i32]) -> Self {
        Self { samples: samples.iter().copied().collect(), ..Default::default() }
    }
}

impl Receiver for ScriptedReceiver {
    fn tune(&mut self, freq: u16) -> Result<(), ReceiverError> {
        if self.broken.contains(&freq) {
            return Err(ReceiverError::Tune { freq, reason: "scripted failure".into() });
        }
        self.tuned.push(freq);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<i32, ReceiverError> {
        Ok(self.samples.pop_front().unwrap_or(self.idle))
    }
}

pub struct Rig<R: Receiver> {
    pub engine: SamplingEngine<R, Vec<EngineEvent>>,
    pub clock: ManualClock,
    pub commands: mpsc::Sender<ScannerCommand>,
}

impl<R: Receiver> Rig<R> {
    pub fn new(receiver: R, clock: ManualClock, snapshot: ConfigSnapshot) -> Self {
        let (commands, rx) = mpsc::channel(8);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let engine = SamplingEngine::new(receiver, Vec::new(), rx, shared, EngineConfig::default());
        commands.try_send(ScannerCommand::Configure(snapshot)).unwrap();
        Self { engine, clock, commands }
    }

    /// One engine step, then move the clock on by `advance_ms`.
    pub fn step(&mut self, advance_ms: Millis) {
        self.engine.step();
        self.clock.advance(advance_ms);
    }

    pub fn gate_events(&self) -> Vec<GateEvent> {
        self.engine
            .sink()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Gate(g) => Some(*g),
                _ => None,
            })
            .collect()
    }
}

pub fn snapshot(channels: Vec<ChannelConfig>) -> ConfigSnapshot {
    ConfigSnapshot { channels, ..Default::default() }
}

/// Unsmoothed channel with the given peak and the default 80/70 offsets.
pub fn sharp_channel(freq: u16, peak: u16) -> ChannelConfig {
    ChannelConfig { peak, filter: 100, ..ChannelConfig::with_freq(freq) }
}
