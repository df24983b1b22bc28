//! Publish/subscribe fan-out indexed by channel and ticker.
//!
//! Each connection owns a bounded outbound queue. A broadcast encodes its
//! envelope once and pushes the same text to every target; a full or closed
//! queue disconnects that one connection and the broadcast carries on.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bistlab_core::data::normalize_ticker;
use bistlab_core::{Classified, Clock, ErrorKind};

pub type ConnectionId = Uuid;

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Price,
    Signal,
    Alert,
    Notification,
    Screener,
    /// Receives every channel.
    All,
}

/// Outbound message. `timestamp` is RFC 3339 UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: Channel,
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Inbound client message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Subscribe {
        #[serde(default)]
        channels: Vec<Channel>,
        #[serde(default)]
        tickers: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        channels: Vec<Channel>,
        #[serde(default)]
        tickers: Vec<String>,
    },
    Ping,
    GetStats,
}

/// What a connection listens to. An empty ticker set means every ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub channels: BTreeSet<Channel>,
    pub tickers: BTreeSet<String>,
}

impl Subscription {
    pub fn new(
        channels: impl IntoIterator<Item = Channel>,
        tickers: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            tickers: tickers
                .into_iter()
                .map(|t| normalize_ticker(t.as_ref()))
                .collect(),
        }
    }

    pub fn listens_to(&self, channel: Channel) -> bool {
        self.channels.contains(&channel) || self.channels.contains(&Channel::All)
    }

    pub fn wants_ticker(&self, ticker: &str) -> bool {
        self.tickers.is_empty() || self.tickers.contains(ticker)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubStats {
    pub connections: usize,
    pub by_channel: BTreeMap<Channel, usize>,
    pub by_ticker: BTreeMap<String, usize>,
    pub messages_sent: u64,
    pub connections_dropped: u64,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("malformed client message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Classified for HubError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

// ─── Connection ─────────────────────────────────────────────────────

/// Receiving half handed to the transport. Messages arrive as encoded JSON
/// in the order the hub enqueued them; `None` means the hub dropped us.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: Option<String>,
    receiver: mpsc::Receiver<Arc<str>>,
}

impl Connection {
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }

    /// Drain and decode everything queued right now.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(text) = self.try_recv() {
            if let Ok(env) = serde_json::from_str(&text) {
                out.push(env);
            }
        }
        out
    }
}

struct Peer {
    sender: mpsc::Sender<Arc<str>>,
    subscription: Subscription,
    user_id: Option<String>,
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct Index {
    peers: HashMap<ConnectionId, Peer>,
    by_channel: HashMap<Channel, HashSet<ConnectionId>>,
    by_ticker: HashMap<String, HashSet<ConnectionId>>,
}

impl Index {
    fn link(&mut self, id: ConnectionId, sub: &Subscription) {
        for ch in &sub.channels {
            self.by_channel.entry(*ch).or_default().insert(id);
        }
        for t in &sub.tickers {
            self.by_ticker.entry(t.clone()).or_default().insert(id);
        }
    }

    fn unlink(&mut self, id: ConnectionId, sub: &Subscription) {
        for ch in &sub.channels {
            if let Some(set) = self.by_channel.get_mut(ch) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_channel.remove(ch);
                }
            }
        }
        for t in &sub.tickers {
            if let Some(set) = self.by_ticker.get_mut(t) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_ticker.remove(t);
                }
            }
        }
    }

    /// Connections that should see `(channel, ticker)`: the channel's set
    /// (plus `ALL`) narrowed by each peer's ticker filter.
    fn targets(&self, channel: Channel, ticker: Option<&str>) -> Vec<ConnectionId> {
        let mut ids: HashSet<ConnectionId> = HashSet::new();
        for ch in [channel, Channel::All] {
            if let Some(set) = self.by_channel.get(&ch) {
                ids.extend(set.iter().copied());
            }
        }
        if let Some(t) = ticker {
            ids.retain(|id| {
                self.peers
                    .get(id)
                    .is_some_and(|p| p.subscription.wants_ticker(t))
            });
        }
        let mut ids: Vec<ConnectionId> = ids.into_iter().collect();
        ids.sort();
        ids
    }
}

// ─── Hub ────────────────────────────────────────────────────────────

pub struct Hub {
    clock: Arc<dyn Clock>,
    queue_capacity: usize,
    index: RwLock<Index>,
    demand: Notify,
    messages_sent: AtomicU64,
    dropped: AtomicU64,
}

impl Hub {
    pub fn new(clock: Arc<dyn Clock>, queue_capacity: usize) -> Self {
        Self {
            clock,
            queue_capacity: queue_capacity.max(1),
            index: RwLock::new(Index::default()),
            demand: Notify::new(),
            messages_sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn encode(&self, channel: Channel, event: &str, data: Value) -> Option<Arc<str>> {
        let envelope = Envelope {
            channel,
            event: event.to_string(),
            data,
            timestamp: self.clock.now(),
        };
        match serde_json::to_string(&envelope) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                warn!(event, error = %e, "envelope not encodable, dropped");
                None
            }
        }
    }

    /// Register a connection and greet it with a `connected` notification.
    pub fn connect(
        &self,
        channels: impl IntoIterator<Item = Channel>,
        tickers: impl IntoIterator<Item = impl AsRef<str>>,
        user_id: Option<String>,
    ) -> Connection {
        let id = Uuid::new_v4();
        let subscription = Subscription::new(channels, tickers);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        {
            let mut index = self.index.write();
            index.link(id, &subscription);
            index.peers.insert(
                id,
                Peer {
                    sender,
                    subscription: subscription.clone(),
                    user_id: user_id.clone(),
                    last_seen: self.clock.now(),
                },
            );
        }
        info!(
            connection = %id,
            user = user_id.as_deref().unwrap_or("-"),
            channels = ?subscription.channels,
            tickers = subscription.tickers.len(),
            "client connected"
        );
        self.reply(
            id,
            "connected",
            json!({ "connection_id": id, "subscription": subscription }),
        );
        self.demand.notify_one();
        Connection {
            id,
            user_id,
            receiver,
        }
    }

    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut index = self.index.write();
        match index.peers.remove(&id) {
            Some(peer) => {
                index.unlink(id, &peer.subscription);
                info!(connection = %id, "client disconnected");
                true
            }
            None => false,
        }
    }

    fn drop_peers(&self, ids: &[ConnectionId], reason: &str) {
        if ids.is_empty() {
            return;
        }
        let mut index = self.index.write();
        for id in ids {
            if let Some(peer) = index.peers.remove(id) {
                index.unlink(*id, &peer.subscription);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(connection = %id, reason, "connection dropped");
            }
        }
    }

    /// Push pre-encoded text to the given peers. Returns how many accepted it.
    fn deliver(&self, ids: &[ConnectionId], text: &Arc<str>) -> usize {
        let mut full = Vec::new();
        let mut closed = Vec::new();
        let mut delivered = 0;
        {
            let index = self.index.read();
            for id in ids {
                let Some(peer) = index.peers.get(id) else { continue };
                match peer.sender.try_send(Arc::clone(text)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => full.push(*id),
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        self.messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.drop_peers(&full, "outbound queue full");
        self.drop_peers(&closed, "receiver closed");
        delivered
    }

    fn reply(&self, id: ConnectionId, event: &str, data: Value) -> bool {
        match self.encode(Channel::Notification, event, data) {
            Some(text) => self.deliver(&[id], &text) == 1,
            None => false,
        }
    }

    /// Send to every connection listening on `channel` (and `ticker`, when
    /// given). Returns the number of connections reached.
    pub fn broadcast(
        &self,
        channel: Channel,
        ticker: Option<&str>,
        event: &str,
        data: Value,
    ) -> usize {
        let ticker = ticker.map(normalize_ticker);
        let targets = self.index.read().targets(channel, ticker.as_deref());
        if targets.is_empty() {
            return 0;
        }
        let Some(text) = self.encode(channel, event, data) else {
            return 0;
        };
        let reached = self.deliver(&targets, &text);
        debug!(?channel, ticker = ticker.as_deref().unwrap_or("-"), event, reached, "broadcast");
        reached
    }

    /// Handle one inbound text frame from `id`.
    pub fn handle_message(&self, id: ConnectionId, text: &str) -> Result<(), HubError> {
        self.touch(id)?;
        let action: ClientAction = match serde_json::from_str(text) {
            Ok(a) => a,
            Err(e) => {
                self.reply(id, "error", json!({ "message": e.to_string() }));
                return Err(HubError::Malformed(e));
            }
        };
        match action {
            ClientAction::Subscribe { channels, tickers } => {
                let sub = self.update(id, |sub| {
                    sub.channels.extend(channels);
                    sub.tickers.extend(tickers.iter().map(|t| normalize_ticker(t)));
                })?;
                self.demand.notify_one();
                self.reply(id, "subscribed", json!(sub));
            }
            ClientAction::Unsubscribe { channels, tickers } => {
                let sub = self.update(id, |sub| {
                    for ch in &channels {
                        sub.channels.remove(ch);
                    }
                    for t in &tickers {
                        sub.tickers.remove(&normalize_ticker(t));
                    }
                })?;
                self.reply(id, "unsubscribed", json!(sub));
            }
            ClientAction::Ping => {
                self.reply(id, "pong", json!({}));
            }
            ClientAction::GetStats => {
                let stats = self.stats();
                self.reply(id, "stats", json!(stats));
            }
        }
        Ok(())
    }

    fn touch(&self, id: ConnectionId) -> Result<(), HubError> {
        let now = self.clock.now();
        let mut index = self.index.write();
        let peer = index
            .peers
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        peer.last_seen = now;
        Ok(())
    }

    fn update(
        &self,
        id: ConnectionId,
        change: impl FnOnce(&mut Subscription),
    ) -> Result<Subscription, HubError> {
        let mut index = self.index.write();
        let old = index
            .peers
            .get(&id)
            .map(|p| p.subscription.clone())
            .ok_or(HubError::UnknownConnection(id))?;
        let mut new = old.clone();
        change(&mut new);
        index.unlink(id, &old);
        index.link(id, &new);
        if let Some(peer) = index.peers.get_mut(&id) {
            peer.subscription = new.clone();
        }
        Ok(new)
    }

    /// Tickers with at least one listener on `channel`. Listeners without a
    /// ticker filter do not count; they never start a polling loop.
    pub fn watched_tickers(&self, channel: Channel) -> BTreeSet<String> {
        let index = self.index.read();
        index
            .by_ticker
            .iter()
            .filter(|(_, ids)| {
                ids.iter().any(|id| {
                    index
                        .peers
                        .get(id)
                        .is_some_and(|p| p.subscription.listens_to(channel))
                })
            })
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn has_subscribers(&self, channel: Channel, ticker: &str) -> bool {
        self.watched_tickers(channel).contains(ticker)
    }

    /// Disconnect everyone who named `ticker` on `channel`, telling them why.
    pub fn disconnect_subscribers(&self, channel: Channel, ticker: &str, message: &str) -> usize {
        let ids: Vec<ConnectionId> = {
            let index = self.index.read();
            index
                .by_ticker
                .get(ticker)
                .map(|set| {
                    set.iter()
                        .copied()
                        .filter(|id| {
                            index
                                .peers
                                .get(id)
                                .is_some_and(|p| p.subscription.listens_to(channel))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        for id in &ids {
            self.reply(
                *id,
                "error",
                json!({ "ticker": ticker, "channel": channel, "message": message }),
            );
        }
        self.drop_peers(&ids, message);
        ids.len()
    }

    /// Send `heartbeat` to notification listeners silent for at least `idle`.
    /// Returns how many were pinged.
    pub fn send_heartbeats(&self, idle: Duration) -> usize {
        let now = self.clock.now();
        let quiet: Vec<ConnectionId> = {
            let index = self.index.read();
            let mut ids: Vec<ConnectionId> = index
                .peers
                .iter()
                .filter(|(_, p)| {
                    p.subscription.listens_to(Channel::Notification) && now - p.last_seen >= idle
                })
                .map(|(id, _)| *id)
                .collect();
            ids.sort();
            ids
        };
        if quiet.is_empty() {
            return 0;
        }
        let Some(text) = self.encode(Channel::Notification, "heartbeat", json!({})) else {
            return 0;
        };
        let sent = self.deliver(&quiet, &text);
        let mut index = self.index.write();
        for id in &quiet {
            if let Some(peer) = index.peers.get_mut(id) {
                peer.last_seen = now;
            }
        }
        sent
    }

    pub fn subscription(&self, id: ConnectionId) -> Option<Subscription> {
        self.index
            .read()
            .peers
            .get(&id)
            .map(|p| p.subscription.clone())
    }

    pub fn user_of(&self, id: ConnectionId) -> Option<String> {
        self.index.read().peers.get(&id).and_then(|p| p.user_id.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.index.read().peers.len()
    }

    pub fn stats(&self) -> HubStats {
        let index = self.index.read();
        HubStats {
            connections: index.peers.len(),
            by_channel: index
                .by_channel
                .iter()
                .map(|(ch, ids)| (*ch, ids.len()))
                .collect(),
            by_ticker: index
                .by_ticker
                .iter()
                .map(|(t, ids)| (t.clone(), ids.len()))
                .collect(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            connections_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Resolves after a subscription was added since the last call.
    pub async fn demand_changed(&self) {
        self.demand.notified().await;
    }
}
