//! Fan-out Bus (§4.6): one `broadcast` entry point that reaches every
//! local subscriber of a session and, in multi-instance mode, every peer
//! instance's subscribers too.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::OUTBOUND_BUFFER_CAP_BYTES;
use crate::store::Store;

/// A frame queued on a subscriber's outbound channel: either payload bytes
/// to write as a text frame, or an instruction to close the socket (§4.6
/// buffer-overflow eviction sends a real WebSocket close frame, not just a
/// registry removal).
#[derive(Clone)]
pub enum OutboundFrame {
    /// Already-serialized outbound JSON.
    Data(Arc<[u8]>),
    /// Close the connection with this code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable close reason.
        reason: &'static str,
    },
}

/// One local subscriber of a session's broadcast stream. Owned by the
/// connection task in [`crate::network::server`]; the Bus only holds a
/// handle to enqueue onto it.
pub struct Subscriber {
    /// Opaque id, unique within this process, identifying the connection.
    pub id: u64,
    /// Outbound channel to the connection's writer task.
    pub sender: mpsc::UnboundedSender<OutboundFrame>,
    /// Bytes currently enqueued but not yet written to the socket. The
    /// writer task decrements this as it drains the channel.
    pub buffered_bytes: Arc<AtomicUsize>,
}

#[derive(Serialize, Deserialize)]
struct StampedMessage {
    instance_id: String,
    payload: String,
}

/// Local + cross-instance event fan-out for all sessions.
pub struct FanOutBus {
    subscribers: DashMap<String, Vec<Subscriber>>,
    remote_wired: DashSet<String>,
    store: Arc<dyn Store>,
    instance_id: String,
}

impl FanOutBus {
    /// Construct a bus backed by `store`, stamping outgoing cross-instance
    /// messages with `instance_id`.
    pub fn new(store: Arc<dyn Store>, instance_id: String) -> Self {
        Self { subscribers: DashMap::new(), remote_wired: DashSet::new(), store, instance_id }
    }

    /// Attach a subscriber to `session_id`'s stream.
    pub fn register(&self, session_id: &str, subscriber: Subscriber) {
        self.subscribers.entry(session_id.to_string()).or_default().push(subscriber);
    }

    /// Detach a subscriber by id, e.g. on disconnect.
    pub fn unregister(&self, session_id: &str, subscriber_id: u64) {
        if let Some(mut entry) = self.subscribers.get_mut(session_id) {
            entry.retain(|s| s.id != subscriber_id);
        }
    }

    /// Number of local subscribers currently attached to `session_id`.
    pub fn local_subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers.get(session_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Ensure this instance relays peer broadcasts for `session_id` to its
    /// own local subscribers. Idempotent; call on first local subscriber.
    pub async fn ensure_remote_relay(self: &Arc<Self>, session_id: &str) {
        if !self.remote_wired.insert(session_id.to_string()) {
            return;
        }
        let bus = self.clone();
        let channel = format!("broadcast:{session_id}");
        let session_id = session_id.to_string();
        let handler: crate::store::SubscriptionHandler = Arc::new(move |bytes| {
            let bus = bus.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                bus.handle_remote_message(&session_id, bytes).await;
            });
        });
        if let Err(err) = self.store.subscribe(&channel, handler).await {
            warn!(error = %err, %channel, "failed to subscribe to peer broadcast channel");
        }
    }

    async fn handle_remote_message(&self, session_id: &str, bytes: Vec<u8>) {
        let Ok(stamped) = serde_json::from_slice::<StampedMessage>(&bytes) else {
            warn!(%session_id, "dropping malformed peer broadcast message");
            return;
        };
        if stamped.instance_id == self.instance_id {
            return;
        }
        self.fan_out_locally(session_id, OutboundFrame::Data(stamped.payload.into_bytes().into()));
    }

    /// Broadcast `payload` (already-serialized outbound JSON) to every
    /// local subscriber of `session_id`, then relay to peers.
    pub async fn broadcast(&self, session_id: &str, payload: Vec<u8>) {
        let payload: Arc<[u8]> = payload.into();
        self.fan_out_locally(session_id, OutboundFrame::Data(payload.clone()));

        let stamped = StampedMessage {
            instance_id: self.instance_id.clone(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
        };
        match serde_json::to_vec(&stamped) {
            Ok(bytes) => {
                let channel = format!("broadcast:{session_id}");
                if let Err(err) = self.store.publish(&channel, &bytes).await {
                    warn!(error = %err, %channel, "broadcast publish failed; local subscribers already notified");
                }
            }
            Err(err) => warn!(error = %err, "failed to stamp outbound broadcast"),
        }
    }

    fn fan_out_locally(&self, session_id: &str, frame: OutboundFrame) {
        let Some(mut entry) = self.subscribers.get_mut(session_id) else {
            return;
        };
        let payload_len = match &frame {
            OutboundFrame::Data(bytes) => bytes.len(),
            OutboundFrame::Close { .. } => 0,
        };
        let mut overflowed = Vec::new();
        for subscriber in entry.value() {
            let projected = subscriber.buffered_bytes.load(Ordering::SeqCst) + payload_len;
            if projected > OUTBOUND_BUFFER_CAP_BYTES {
                let _ = subscriber.sender.send(OutboundFrame::Close { code: 1008, reason: "buffer overflow" });
                overflowed.push(subscriber.id);
                continue;
            }
            subscriber.buffered_bytes.fetch_add(payload_len, Ordering::SeqCst);
            if subscriber.sender.send(frame.clone()).is_err() {
                overflowed.push(subscriber.id);
            }
        }
        if !overflowed.is_empty() {
            entry.value_mut().retain(|s| !overflowed.contains(&s.id));
            crate::metrics::record_buffer_overflow();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn subscriber(id: u64) -> (Subscriber, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Subscriber { id, sender: tx, buffered_bytes: Arc::new(AtomicUsize::new(0)) }, rx)
    }

    #[tokio::test]
    async fn local_subscribers_receive_broadcast_payloads() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = FanOutBus::new(store, "inst-a".to_string());
        let (sub, mut rx) = subscriber(1);
        bus.register("ABCDEF", sub);
        bus.broadcast("ABCDEF", b"{\"type\":\"tick\"}".to_vec()).await;
        match rx.recv().await.unwrap() {
            OutboundFrame::Data(bytes) => assert_eq!(&*bytes, b"{\"type\":\"tick\"}"),
            OutboundFrame::Close { .. } => panic!("expected a data frame"),
        }
    }

    #[tokio::test]
    async fn unregistered_subscriber_receives_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = FanOutBus::new(store, "inst-a".to_string());
        let (sub, mut rx) = subscriber(1);
        bus.register("ABCDEF", sub);
        bus.unregister("ABCDEF", 1);
        bus.broadcast("ABCDEF", b"hello".to_vec()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn buffer_over_cap_drops_the_subscriber() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = FanOutBus::new(store, "inst-a".to_string());
        let (sub, mut rx) = subscriber(1);
        sub.buffered_bytes.store(OUTBOUND_BUFFER_CAP_BYTES, Ordering::SeqCst);
        bus.register("ABCDEF", sub);
        bus.broadcast("ABCDEF", b"more".to_vec()).await;
        assert_eq!(bus.local_subscriber_count("ABCDEF"), 0);
        match rx.recv().await.unwrap() {
            OutboundFrame::Close { code, .. } => assert_eq!(code, 1008),
            OutboundFrame::Data(_) => panic!("expected a close frame on overflow"),
        }
    }
}
