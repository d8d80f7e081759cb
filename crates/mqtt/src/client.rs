use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, atomic::{AtomicBool, AtomicU64, Ordering}};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hassprint_core::transport::{PublishOptions, Publisher, Subscriber, TimestampedPublisher, TransportError};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

const QOS: QoS = QoS::AtLeastOnce;

#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Publish { topic: String, payload: Vec<u8> },
    PubAck(u16),
}

#[derive(Debug, Clone)]
struct Pending {
    topic: String,
    payload: Vec<u8>,
    retain: bool,
}

#[derive(Debug)]
struct PendingQueue {
    items: VecDeque<Pending>,
    capacity: usize,
}

impl PendingQueue {
    fn new(capacity: usize) -> Self {
        Self { items: VecDeque::new(), capacity }
    }

    fn push(&mut self, item: Pending) {
        if self.capacity == 0 {
            warn!(topic = %item.topic, "Publish queue disabled; dropping message");
            return;
        }
        if self.items.len() >= self.capacity {
            if let Some(dropped) = self.items.pop_front() {
                warn!(topic = %dropped.topic, "Publish queue full; dropping oldest message");
            }
        }
        self.items.push_back(item);
    }

    /// Puts unsent messages back ahead of anything queued since; the oldest
    /// go first when that overflows the capacity.
    fn requeue_front(&mut self, unsent: Vec<Pending>) {
        for item in unsent.into_iter().rev() {
            self.items.push_front(item);
        }
        while self.items.len() > self.capacity {
            if let Some(dropped) = self.items.pop_front() {
                warn!(topic = %dropped.topic, "Publish queue full; dropping oldest message");
            }
        }
    }
}

/// Sends `batch` in order and stops at the first failure. Returns what was
/// not sent, the failed message first.
async fn flush_batch<F, Fut, E>(batch: Vec<Pending>, mut send: F) -> Vec<Pending>
where
    F: FnMut(Pending) -> Fut,
    Fut: Future<Output = Result<(), (Pending, E)>>,
    E: std::fmt::Debug,
{
    let mut rest = batch.into_iter();
    while let Some(msg) = rest.next() {
        if let Err((msg, err)) = send(msg).await {
            warn!(?err, topic = %msg.topic, "Failed to flush queued message; requeueing");
            let mut unsent = vec![msg];
            unsent.extend(rest);
            return unsent;
        }
    }
    Vec::new()
}

#[derive(Clone)]
pub struct MqttService {
    client: Arc<Mutex<AsyncClient>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    pending: Arc<Mutex<PendingQueue>>,
    config: Arc<MqttConfig>,
    generation: Arc<AtomicU64>,
    // Keeps the event loop task tied to the service's lifetime
    _loop_handle: Arc<JoinHandle<()>>,
}

impl MqttService {
    pub async fn connect(config: MqttConfig) -> Result<Self, ClientError> {
        let (client, eventloop) = build_client(&config)?;
        let ready = Arc::new(AtomicBool::new(false));
        let (tx, _) = broadcast::channel(256);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));
        let pending = Arc::new(Mutex::new(PendingQueue::new(config.queue_capacity)));
        let client_shared = Arc::new(Mutex::new(client));
        let config = Arc::new(config);
        let generation = Arc::new(AtomicU64::new(0));

        let shared = LoopShared {
            client: client_shared.clone(),
            ready: ready.clone(),
            events_tx: tx.clone(),
            subscriptions: subscriptions.clone(),
            pending: pending.clone(),
            config: config.clone(),
            generation: generation.clone(),
        };
        let loop_handle = tokio::spawn(run_eventloop(eventloop, shared));

        Ok(Self {
            client: client_shared,
            ready,
            events_tx: tx,
            subscriptions,
            pending,
            config,
            generation,
            _loop_handle: Arc::new(loop_handle),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> broadcast::Receiver<MqttEvent> {
        self.events_tx.subscribe()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.items.len()
    }

    pub async fn publish_with(&self, topic: &str, payload: Vec<u8>, opts: PublishOptions) -> Result<(), TransportError> {
        {
            // Readiness flips under this lock once the backlog is flushed
            let mut pending = self.pending.lock().await;
            if !self.is_ready() {
                if !opts.queue_if_disconnected {
                    return Err(TransportError::NotConnected);
                }
                debug!(topic, "MQTT not connected; queueing message");
                pending.push(Pending { topic: topic.to_string(), payload, retain: opts.retain });
                return Ok(());
            }
        }
        let client = self.client.lock().await;
        client
            .publish(topic, QOS, opts.retain, payload)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    pub async fn subscribe_with_qos(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        // Tracked first so a subscription made while offline is restored on connect
        self.subscriptions.write().await.insert(topic.to_string(), qos);
        if !self.is_ready() {
            debug!(topic, "MQTT not connected; subscription deferred");
            return Ok(());
        }
        let client = self.client.lock().await;
        client.subscribe(topic, qos).await
    }

    /// Marks the node offline and closes the session cleanly. A clean
    /// disconnect does not trigger the broker's last will.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if let Some(availability) = &self.config.availability {
            let client = self.client.lock().await;
            if let Err(err) = client
                .publish(&availability.topic, QOS, true, availability.offline.clone())
                .await
            {
                warn!(?err, "Failed to publish offline availability");
            }
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::Relaxed);
        let client = self.client.lock().await;
        client.disconnect().await
    }
}

#[async_trait]
impl Publisher for MqttService {
    async fn publish(&self, topic: &str, payload: Vec<u8>, opts: PublishOptions) -> Result<(), TransportError> {
        self.publish_with(topic, payload, opts).await
    }
}

#[async_trait]
impl TimestampedPublisher for MqttService {
    async fn publish_with_timestamp(&self, topic: &str, payload: Value, opts: PublishOptions) -> Result<(), TransportError> {
        let stamped = with_timestamp(payload, epoch_secs());
        let bytes = serde_json::to_vec(&stamped)?;
        self.publish_with(topic, bytes, opts).await
    }
}

#[async_trait]
impl Subscriber for MqttService {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscribe_with_qos(topic, QOS)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }
}

/// Adds `_timestamp` (epoch seconds) to object payloads; other JSON values
/// are wrapped as `{"_value": ..., "_timestamp": ...}`.
pub fn with_timestamp(payload: Value, ts: u64) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("_timestamp".to_string(), Value::from(ts));
            Value::Object(map)
        }
        other => serde_json::json!({ "_value": other, "_timestamp": ts }),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn build_client(config: &MqttConfig) -> Result<(AsyncClient, EventLoop), ClientError> {
    let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    if let (Some(u), Some(p)) = (&config.username, &config.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if let Some(availability) = &config.availability {
        opts.set_last_will(LastWill::new(
            availability.topic.clone(),
            availability.offline.clone(),
            QOS,
            true,
        ));
    }
    opts.set_request_channel_capacity(64);
    Ok(AsyncClient::new(opts, 64))
}

#[derive(Clone)]
struct LoopShared {
    client: Arc<Mutex<AsyncClient>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    pending: Arc<Mutex<PendingQueue>>,
    config: Arc<MqttConfig>,
    // Bumped on every disconnect; a flush started under an older value is stale.
    generation: Arc<AtomicU64>,
}

impl LoopShared {
    fn mark_disconnected(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(MqttEvent::Disconnected);
    }

    // Runs off the event loop task: requests only drain while the loop polls.
    async fn on_connected(self, generation: u64) {
        {
            let client = self.client.lock().await;
            if let Some(availability) = &self.config.availability {
                if let Err(err) = client
                    .publish(&availability.topic, QOS, true, availability.online.clone())
                    .await
                {
                    warn!(?err, "Failed to publish online availability");
                }
            }

            let subs = self.subscriptions.read().await;
            for (topic, qos) in subs.iter() {
                debug!("Restoring subscription to {}", topic);
                if let Err(err) = client.subscribe(topic, *qos).await {
                    warn!(?err, "Failed to restore subscription to {}", topic);
                }
            }
        }

        loop {
            let batch: Vec<Pending> = {
                let mut pending = self.pending.lock().await;
                if self.generation.load(Ordering::SeqCst) != generation {
                    debug!("Connection lost during flush; backlog kept for the next session");
                    return;
                }
                if pending.items.is_empty() {
                    self.ready.store(true, Ordering::SeqCst);
                    // A disconnect racing the store above wins.
                    if self.generation.load(Ordering::SeqCst) != generation {
                        self.ready.store(false, Ordering::SeqCst);
                        return;
                    }
                    break;
                }
                pending.items.drain(..).collect()
            };
            info!(count = batch.len(), "Flushing queued MQTT messages");
            let unsent = {
                let guard = self.client.lock().await;
                let client: &AsyncClient = &guard;
                flush_batch(batch, move |msg| {
                    async move {
                        client
                            .publish(msg.topic.clone(), QOS, msg.retain, msg.payload.clone())
                            .await
                            .map_err(|err| (msg, err))
                    }
                })
                .await
            };
            if !unsent.is_empty() {
                self.pending.lock().await.requeue_front(unsent);
                return;
            }
        }

        let _ = self.events_tx.send(MqttEvent::Connected);
    }
}

async fn run_eventloop(mut eventloop: EventLoop, shared: LoopShared) {
    let mut backoff_secs = 1u64;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("MQTT connected");
                let generation = shared.generation.load(Ordering::SeqCst);
                tokio::spawn(shared.clone().on_connected(generation));
                backoff_secs = 1;
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let topic = p.topic.to_string();
                let payload = p.payload.to_vec();
                let _ = shared.events_tx.send(MqttEvent::Publish { topic, payload });
            }
            Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                let _ = shared.events_tx.send(MqttEvent::PubAck(ack.pkid));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                warn!("MQTT disconnect requested");
                shared.mark_disconnected();
            }
            Ok(other) => {
                debug!(?other, "MQTT event");
            }
            Err(e) => {
                error!(error = ?e, "MQTT error; will attempt reconnect");
                shared.mark_disconnected();

                let wait = backoff_secs.min(30);
                sleep(Duration::from_secs(wait)).await;
                backoff_secs = (backoff_secs * 2).min(60);

                match build_client(&shared.config) {
                    Ok((new_client, new_eventloop)) => {
                        eventloop = new_eventloop;
                        {
                            let mut client_guard = shared.client.lock().await;
                            *client_guard = new_client;
                        }
                        info!("MQTT client and eventloop rebuilt, attempting reconnection");
                        continue;
                    }
                    Err(err) => {
                        error!(?err, "Failed to rebuild MQTT client; retrying");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(topic: &str) -> Pending {
        Pending { topic: topic.to_string(), payload: b"x".to_vec(), retain: true }
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let mut q = PendingQueue::new(2);
        q.push(pending("a"));
        q.push(pending("b"));
        q.push(pending("c"));
        let topics: Vec<_> = q.items.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, ["b", "c"]);
    }

    #[test]
    fn requeued_messages_go_back_in_front() {
        let mut q = PendingQueue::new(3);
        q.push(pending("late"));
        q.requeue_front(vec![pending("a"), pending("b")]);
        let topics: Vec<_> = q.items.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, ["a", "b", "late"]);

        q.requeue_front(vec![pending("z")]);
        let topics: Vec<_> = q.items.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, ["a", "b", "late"]);
    }

    #[tokio::test]
    async fn interrupted_flush_returns_the_rest() {
        let batch = vec![pending("a"), pending("b"), pending("c"), pending("d")];
        let mut sent = Vec::new();
        let unsent = flush_batch(batch, |msg| {
            let fail = msg.topic == "c";
            if !fail {
                sent.push(msg.topic.clone());
            }
            async move { if fail { Err((msg, "channel closed")) } else { Ok(()) } }
        })
        .await;
        assert_eq!(sent, ["a", "b"]);
        let topics: Vec<_> = unsent.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, ["c", "d"]);
    }

    #[tokio::test]
    async fn complete_flush_leaves_nothing() {
        let unsent = flush_batch(vec![pending("a")], |_msg| async { Ok::<(), (Pending, &str)>(()) }).await;
        assert!(unsent.is_empty());
    }

    #[test]
    fn zero_capacity_queue_keeps_nothing() {
        let mut q = PendingQueue::new(0);
        q.push(pending("a"));
        assert!(q.items.is_empty());
    }

    #[test]
    fn timestamp_is_added_to_objects() {
        let v = with_timestamp(serde_json::json!({"state": "Printing"}), 1_700_000_000);
        assert_eq!(v["_timestamp"], 1_700_000_000u64);
        assert_eq!(v["state"], "Printing");
    }

    #[test]
    fn non_objects_are_wrapped() {
        let v = with_timestamp(serde_json::json!(42), 7);
        assert_eq!(v, serde_json::json!({"_value": 42, "_timestamp": 7}));
    }
}
