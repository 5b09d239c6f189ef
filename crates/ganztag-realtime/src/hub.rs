//! [`Hub`]: topic-routed, non-blocking pub/sub.
//!
//! The registry is guarded by a read/write lock. Membership changes take the
//! write lock; [`Hub::broadcast`] takes the read lock and performs one
//! `try_send` per matching client, so a full buffer costs the producer nothing
//! and only that client loses the event.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicU64, Ordering},
  },
};

use ganztag_core::{
  Id,
  event::{Event, Topic},
};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-client buffer, in events.
pub const DEFAULT_CLIENT_BUFFER: usize = 32;

// ─── Client identity and counters ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
  fn new() -> Self { Self(Uuid::new_v4()) }
}

impl std::fmt::Display for ClientId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

#[derive(Debug, Default)]
struct Counters {
  delivered: AtomicU64,
  dropped:   AtomicU64,
}

/// Point-in-time view of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStats {
  pub client_id: ClientId,
  pub staff_id:  Id,
  pub topics:    Vec<Topic>,
  pub delivered: u64,
  pub dropped:   u64,
}

/// Point-in-time view of the whole hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
  pub client_count: usize,
  pub topic_count:  usize,
  pub delivered:    u64,
  pub dropped:      u64,
  pub clients:      Vec<ClientStats>,
}

// ─── Registration ────────────────────────────────────────────────────────────

/// The receiving half of a registration.
///
/// Dropping it does not unregister the client; call [`Hub::unregister`].
#[derive(Debug)]
pub struct Subscription {
  pub id:       ClientId,
  pub receiver: mpsc::Receiver<Arc<Event>>,
}

struct Client {
  staff_id: Id,
  topics:   Vec<Topic>,
  sender:   mpsc::Sender<Arc<Event>>,
  counters: Arc<Counters>,
}

#[derive(Default)]
struct Registry {
  clients:  HashMap<ClientId, Client>,
  by_topic: HashMap<Topic, HashSet<ClientId>>,
}

// ─── Hub ─────────────────────────────────────────────────────────────────────

pub struct Hub {
  registry:  RwLock<Registry>,
  buffer:    usize,
  delivered: AtomicU64,
  dropped:   AtomicU64,
}

impl Default for Hub {
  fn default() -> Self { Self::new(DEFAULT_CLIENT_BUFFER) }
}

impl Hub {
  /// Create a hub whose clients each buffer up to `buffer` events.
  pub fn new(buffer: usize) -> Self {
    Self {
      registry:  RwLock::new(Registry::default()),
      buffer:    buffer.max(1),
      delivered: AtomicU64::new(0),
      dropped:   AtomicU64::new(0),
    }
  }

  /// Record a client and its topic set in one step.
  pub fn register(&self, staff_id: Id, topics: Vec<Topic>) -> Subscription {
    let (sender, receiver) = mpsc::channel(self.buffer);
    let id = ClientId::new();

    let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
    for topic in &topics {
      registry.by_topic.entry(topic.clone()).or_default().insert(id);
    }
    registry.clients.insert(id, Client {
      staff_id,
      topics,
      sender,
      counters: Arc::default(),
    });
    debug!(client_id = %id, staff_id, clients = registry.clients.len(), "client registered");

    Subscription { id, receiver }
  }

  /// Remove a client. Returns `false` if it was not registered.
  pub fn unregister(&self, id: ClientId) -> bool {
    let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
    let Some(client) = registry.clients.remove(&id) else {
      return false;
    };
    for topic in &client.topics {
      if let Some(members) = registry.by_topic.get_mut(topic) {
        members.remove(&id);
        if members.is_empty() {
          registry.by_topic.remove(topic);
        }
      }
    }
    debug!(client_id = %id, staff_id = client.staff_id, "client unregistered");
    true
  }

  /// Enqueue `event` for every client subscribed to its topic.
  ///
  /// Never blocks. Returns the number of clients the event was queued for.
  pub fn broadcast(&self, event: Event) -> usize {
    let event = Arc::new(event);
    let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
    let Some(members) = registry.by_topic.get(event.topic_key()) else {
      return 0;
    };

    let mut queued = 0;
    for id in members {
      let Some(client) = registry.clients.get(id) else { continue };
      match client.sender.try_send(Arc::clone(&event)) {
        Ok(()) => {
          client.counters.delivered.fetch_add(1, Ordering::Relaxed);
          self.delivered.fetch_add(1, Ordering::Relaxed);
          queued += 1;
        }
        Err(TrySendError::Full(_)) => {
          client.counters.dropped.fetch_add(1, Ordering::Relaxed);
          self.dropped.fetch_add(1, Ordering::Relaxed);
          warn!(client_id = %id, event = %event.kind(), "client buffer full; event dropped");
        }
        // The connection is going away; its guard will unregister it.
        Err(TrySendError::Closed(_)) => {}
      }
    }
    queued
  }

  /// Publish a batch in order; returns the total number queued.
  pub fn broadcast_all(&self, events: impl IntoIterator<Item = Event>) -> usize {
    events.into_iter().map(|event| self.broadcast(event)).sum()
  }

  pub fn client_stats(&self, id: ClientId) -> Option<ClientStats> {
    let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
    registry.clients.get(&id).map(|c| snapshot(id, c))
  }

  pub fn stats(&self) -> HubStats {
    let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
    let mut clients: Vec<ClientStats> =
      registry.clients.iter().map(|(id, c)| snapshot(*id, c)).collect();
    clients.sort_by_key(|c| (c.staff_id, c.client_id.0));
    HubStats {
      client_count: registry.clients.len(),
      topic_count: registry.by_topic.len(),
      delivered: self.delivered.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      clients,
    }
  }
}

fn snapshot(id: ClientId, client: &Client) -> ClientStats {
  ClientStats {
    client_id: id,
    staff_id:  client.staff_id,
    topics:    client.topics.clone(),
    delivered: client.counters.delivered.load(Ordering::Relaxed),
    dropped:   client.counters.dropped.load(Ordering::Relaxed),
  }
}
