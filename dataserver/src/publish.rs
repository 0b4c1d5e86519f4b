//! Outbound roster events
//!
//! Every accepted roster mutation is published as an [`Envelope`] on the
//! `datafeed` topic and then signaled to the snapshot writer. Publishing is
//! fire-and-forget: a failing bus is logged and never blocks or retries.

use crate::config::EventBusConfig;
use crate::errors::{DataServerError, Result};
use crate::snapshot::SnapshotSignal;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DATAFEED_TOPIC: &str = "datafeed";

/// Events waiting for delivery before new ones are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 10_000;

/// Most records sent in one produce request
const MAX_BATCH: usize = 500;

/// Event type tag carried in every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    AddClient,
    UpdatePosition,
    UpdateControllerData,
    UpdateFlightPlan,
    RemoveClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: MessageType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Destination for roster events. Implementations must not block.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()>;
}

/// Used when no event bus is configured
pub struct LogBus;

impl EventBus for LogBus {
    fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        debug!(
            "{} event on {}: {}",
            serde_json::to_string(&envelope.message_type)?,
            topic,
            envelope.data
        );
        Ok(())
    }
}

/// Hands envelopes to an in-process channel
pub struct ChannelBus {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelBus { tx }, rx)
    }
}

impl EventBus for ChannelBus {
    fn publish(&self, _topic: &str, envelope: &Envelope) -> Result<()> {
        self.tx
            .send(envelope.clone())
            .map_err(|e| DataServerError::EventBusError(e.to_string()))
    }
}

/// Posts envelopes to a Kafka REST proxy (`POST <url>/topics/<topic>`).
///
/// `publish` only queues; a background task does the HTTP delivery so the
/// roster never waits on the network. The queue is bounded: when delivery
/// falls behind, new events are dropped and counted.
pub struct RestProxyBus {
    tx: mpsc::Sender<(String, Envelope)>,
    dropped: AtomicU64,
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: Vec<ProduceRecord<'a>>,
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    value: &'a Envelope,
}

impl RestProxyBus {
    /// Spawns the delivery task. Must be called within a tokio runtime.
    pub fn start(config: &EventBusConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let (bus, rx) = Self::queue(EVENT_QUEUE_CAPACITY);
        tokio::spawn(deliver(client, config.clone(), rx));
        Ok(bus)
    }

    fn queue(capacity: usize) -> (Self, mpsc::Receiver<(String, Envelope)>) {
        let (tx, rx) = mpsc::channel(capacity);
        let bus = RestProxyBus {
            tx,
            dropped: AtomicU64::new(0),
        };
        (bus, rx)
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventBus for RestProxyBus {
    fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        match self.tx.try_send((topic.to_string(), envelope.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!("Event queue full, {} events dropped so far", dropped);
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(DataServerError::EventBusError(
                "delivery task stopped".to_string(),
            )),
        }
    }
}

fn group_by_topic(batch: &[(String, Envelope)]) -> BTreeMap<&str, Vec<ProduceRecord<'_>>> {
    let mut grouped: BTreeMap<&str, Vec<ProduceRecord<'_>>> = BTreeMap::new();
    for (topic, envelope) in batch {
        grouped
            .entry(topic.as_str())
            .or_default()
            .push(ProduceRecord { value: envelope });
    }
    grouped
}

async fn deliver(
    client: reqwest::Client,
    config: EventBusConfig,
    mut rx: mpsc::Receiver<(String, Envelope)>,
) {
    let base_url = config.url.trim_end_matches('/').to_string();
    let mut batch = Vec::with_capacity(MAX_BATCH);

    while rx.recv_many(&mut batch, MAX_BATCH).await > 0 {
        for (topic, records) in group_by_topic(&batch) {
            let count = records.len();
            let result = client
                .post(format!("{}/topics/{}", base_url, topic))
                .basic_auth(&config.username, Some(&config.password))
                .header("Content-Type", "application/vnd.kafka.json.v2+json")
                .json(&ProduceRequest { records })
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match result {
                Ok(_) => debug!("Delivered {} events to {}", count, topic),
                Err(e) => error!("Failed to publish {} events to {}: {}", count, topic, e),
            }
        }
        batch.clear();
    }
    warn!("Event delivery task stopped");
}

/// Event bus handle plus snapshot signal, shared by everything that mutates
/// the roster
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
    snapshots: SnapshotSignal,
}

impl Publisher {
    pub fn new(bus: Arc<dyn EventBus>, snapshots: SnapshotSignal) -> Self {
        Publisher { bus, snapshots }
    }

    /// Publishes one event. Failures are logged and otherwise ignored.
    pub fn event<T: Serialize>(&self, message_type: MessageType, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode {:?} event: {}", message_type, e);
                return;
            }
        };

        let envelope = Envelope {
            message_type,
            data,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.bus.publish(DATAFEED_TOPIC, &envelope) {
            error!("Failed to publish {:?} event: {}", message_type, e);
        }
    }

    /// Marks the snapshot as out of date
    pub fn signal(&self) {
        self.snapshots.signal();
    }
}
