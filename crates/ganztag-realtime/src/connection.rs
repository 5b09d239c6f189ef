//! One SSE connection as a stream of frames.
//!
//! The stream registers with the hub, opens with a `connected` frame
//! describing the subscription, then waits on server shutdown, the next hub
//! event and the heartbeat tick. A client with no topics never touches the hub and only
//! receives heartbeats.
//!
//! The HTTP layer drops the stream when the client disconnects. The hub
//! registration lives inside the stream, so dropping it unregisters the
//! client.

use std::{convert::Infallible, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::Stream;
use ganztag_core::{Id, subscription::Subscriptions};
use serde_json::{Value, json};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  frame,
  hub::{ClientId, Hub, Subscription},
};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  pub heartbeat_interval: Duration,
  /// Cancelled on server shutdown; ends every open stream.
  pub shutdown:           CancellationToken,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
      shutdown:           CancellationToken::new(),
    }
  }
}

/// Body of the initial `connected` frame.
pub fn connected_payload(subs: &Subscriptions) -> Value {
  json!({
    "status":                   "ready",
    "supervised_group_count":   subs.active_group_ids.len(),
    "active_group_ids":         subs.active_group_ids,
    "educational_group_topics": subs.educational_group_topics,
    "subscribed_topic_count":   subs.all_topics.len(),
  })
}

/// Unregisters its client when dropped.
struct Registration {
  hub: Arc<Hub>,
  id:  ClientId,
}

impl Drop for Registration {
  fn drop(&mut self) { self.hub.unregister(self.id); }
}

enum Step {
  Frame(Bytes),
  Skip,
  Stop,
}

fn heartbeat_ticker(period: Duration) -> Interval {
  let period = period.max(Duration::from_millis(1));
  let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  ticker
}

/// Build the frame stream for `staff_id` subscribed to `subs`.
pub fn event_stream(
  hub: Arc<Hub>,
  staff_id: Id,
  subs: Subscriptions,
  options: ConnectionOptions,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
  async_stream::stream! {
    // Register before the connected frame goes out, so anything published
    // after the client sees it is delivered.
    let registered = (!subs.is_empty()).then(|| {
      let Subscription { id, receiver } = hub.register(staff_id, subs.all_topics.clone());
      (Registration { hub: Arc::clone(&hub), id }, receiver)
    });

    match frame::named("connected", &connected_payload(&subs)) {
      Ok(connected) => yield Ok(connected),
      Err(e) => warn!(staff_id, error = %e, "failed to encode connected frame"),
    }

    let mut ticker = heartbeat_ticker(options.heartbeat_interval);

    match registered {
      None => {
        debug!(staff_id, "no topics; heartbeat-only stream");
        loop {
          let step = tokio::select! {
            () = options.shutdown.cancelled() => Step::Stop,
            _ = ticker.tick() => Step::Frame(frame::heartbeat()),
          };
          match step {
            Step::Frame(bytes) => yield Ok(bytes),
            Step::Skip => {}
            Step::Stop => break,
          }
        }
      }
      Some((registration, mut receiver)) => {
        let id = registration.id;
        loop {
          let step = tokio::select! {
            () = options.shutdown.cancelled() => Step::Stop,
            received = receiver.recv() => match received {
              Some(event) => match frame::event(&event) {
                Ok(bytes) => Step::Frame(bytes),
                Err(e) => {
                  warn!(client_id = %id, error = %e, "failed to encode event");
                  Step::Skip
                }
              },
              None => Step::Stop,
            },
            _ = ticker.tick() => Step::Frame(frame::heartbeat()),
          };
          match step {
            Step::Frame(bytes) => yield Ok(bytes),
            Step::Skip => {}
            Step::Stop => break,
          }
        }
        debug!(client_id = %id, staff_id, "stream closed");
        drop(registration);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use futures_util::StreamExt as _;
  use ganztag_core::event::{Event, EventKind, Topic};

  use super::*;

  fn subs(groups: &[Id], edu: &[Id]) -> Subscriptions {
    let active_group_ids = groups.to_vec();
    let educational_group_topics: Vec<Topic> = edu.iter().copied().map(Topic::educational).collect();
    let all_topics = groups
      .iter()
      .copied()
      .map(Topic::group)
      .chain(educational_group_topics.iter().cloned())
      .collect();
    Subscriptions { active_group_ids, educational_group_topics, all_topics }
  }

  fn options(heartbeat_ms: u64) -> ConnectionOptions {
    ConnectionOptions {
      heartbeat_interval: Duration::from_millis(heartbeat_ms),
      shutdown:           CancellationToken::new(),
    }
  }

  fn text(bytes: &Bytes) -> &str { std::str::from_utf8(bytes).unwrap() }

  #[tokio::test]
  async fn first_frame_is_connected() {
    let hub = Arc::new(Hub::default());
    let mut stream = Box::pin(event_stream(hub, 1, subs(&[100, 200], &[4]), options(60_000)));

    let first = stream.next().await.unwrap().unwrap();
    let first = text(&first);
    assert!(first.starts_with("event: connected\n"));

    let data: Value = serde_json::from_str(first.lines().nth(1).unwrap().trim_start_matches("data: ")).unwrap();
    assert_eq!(data["status"], "ready");
    assert_eq!(data["supervised_group_count"], 2);
    assert_eq!(data["active_group_ids"], json!([100, 200]));
    assert_eq!(data["educational_group_topics"], json!(["edu:4"]));
    assert_eq!(data["subscribed_topic_count"], 3);
  }

  #[tokio::test]
  async fn empty_subscription_only_heartbeats() {
    let hub = Arc::new(Hub::default());
    let mut stream = Box::pin(event_stream(Arc::clone(&hub), 1, subs(&[], &[]), options(10)));

    stream.next().await.unwrap().unwrap();
    let beat = stream.next().await.unwrap().unwrap();
    assert_eq!(text(&beat), ": heartbeat\n\n");
    assert_eq!(hub.stats().client_count, 0);
  }

  #[tokio::test]
  async fn forwards_matching_events() {
    let hub = Arc::new(Hub::default());
    let mut stream = Box::pin(event_stream(Arc::clone(&hub), 1, subs(&[100], &[]), options(60_000)));
    stream.next().await.unwrap().unwrap();
    assert_eq!(hub.stats().client_count, 1);

    hub.broadcast(Event::new(EventKind::StudentCheckin, Topic::group(200), json!({}), Utc::now()));
    hub.broadcast(Event::new(EventKind::StudentCheckin, Topic::group(100), json!({"student_id": 3}), Utc::now()));

    let frame = stream.next().await.unwrap().unwrap();
    let frame = text(&frame);
    assert!(frame.starts_with("event: student_checkin\n"));
    assert!(frame.contains(r#""student_id":3"#));
  }

  #[tokio::test]
  async fn events_right_after_connected_are_delivered() {
    let hub = Arc::new(Hub::default());
    let mut stream = Box::pin(event_stream(Arc::clone(&hub), 1, subs(&[], &[4]), options(60_000)));
    stream.next().await.unwrap().unwrap();

    let delivered = hub.broadcast(Event::new(EventKind::StudentCheckout, Topic::educational(4), json!({}), Utc::now()));
    assert_eq!(delivered, 1);
    let frame = stream.next().await.unwrap().unwrap();
    assert!(text(&frame).starts_with("event: student_checkout\n"));
  }

  #[tokio::test]
  async fn heartbeats_while_subscribed() {
    let hub = Arc::new(Hub::default());
    let mut stream = Box::pin(event_stream(hub, 1, subs(&[100], &[]), options(10)));
    stream.next().await.unwrap().unwrap();

    let beat = stream.next().await.unwrap().unwrap();
    assert_eq!(text(&beat), ": heartbeat\n\n");
  }

  #[tokio::test]
  async fn dropping_the_stream_unregisters() {
    let hub = Arc::new(Hub::default());
    let mut stream = Box::pin(event_stream(Arc::clone(&hub), 1, subs(&[100], &[]), options(60_000)));
    stream.next().await.unwrap().unwrap();
    assert_eq!(hub.stats().client_count, 1);

    drop(stream);
    assert_eq!(hub.stats().client_count, 0);
  }

  #[tokio::test]
  async fn shutdown_ends_the_stream() {
    let hub = Arc::new(Hub::default());
    let opts = options(60_000);
    let shutdown = opts.shutdown.clone();
    let mut stream = Box::pin(event_stream(Arc::clone(&hub), 1, subs(&[100], &[]), opts));
    stream.next().await.unwrap().unwrap();

    shutdown.cancel();
    assert!(stream.next().await.is_none());
    assert_eq!(hub.stats().client_count, 0);
  }
}
