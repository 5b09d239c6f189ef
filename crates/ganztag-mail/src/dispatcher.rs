//! Background delivery with retries.
//!
//! [`Dispatcher::dispatch`] takes ownership of the request and moves it into
//! a spawned task, so nothing the caller does afterwards can race the send.
//! Each attempt reports to the optional callback; the task is detached from
//! the originating request and outlives it.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{Mailer, Message};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_BACKOFF: [Duration; 3] = [
  Duration::from_secs(60),
  Duration::from_secs(5 * 60),
  Duration::from_secs(15 * 60),
];

/// What a delivery is about; echoed back in every report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryMetadata {
  #[serde(rename = "type")]
  pub kind:         String,
  pub reference_id: i64,
  pub token:        Option<String>,
  pub recipient:    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
  Sent,
  Failed,
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
  pub metadata: DeliveryMetadata,
  pub attempt:  u32,
  pub status:   DeliveryStatus,
  pub error:    Option<String>,
  /// No further attempt follows this one.
  #[serde(rename = "final")]
  pub is_final: bool,
}

pub type DeliveryCallback = Arc<dyn Fn(DeliveryReport) + Send + Sync>;

pub struct DispatchRequest {
  pub message:      Message,
  pub metadata:     DeliveryMetadata,
  pub callback:     Option<DeliveryCallback>,
  pub max_attempts: Option<u32>,
  pub backoff:      Option<Vec<Duration>>,
}

impl DispatchRequest {
  pub fn new(message: Message, metadata: DeliveryMetadata) -> Self {
    Self { message, metadata, callback: None, max_attempts: None, backoff: None }
  }

  pub fn with_callback(mut self, callback: DeliveryCallback) -> Self {
    self.callback = Some(callback);
    self
  }
}

#[derive(Clone)]
pub struct Dispatcher {
  mailer:       Arc<dyn Mailer>,
  max_attempts: u32,
  backoff:      Vec<Duration>,
}

impl Dispatcher {
  pub fn new(mailer: Arc<dyn Mailer>) -> Self {
    Self {
      mailer,
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      backoff: DEFAULT_BACKOFF.to_vec(),
    }
  }

  /// Override the defaults used when a request does not set its own.
  pub fn with_defaults(mut self, max_attempts: u32, backoff: Vec<Duration>) -> Self {
    self.max_attempts = max_attempts.max(1);
    self.backoff = backoff;
    self
  }

  /// Schedule delivery on a background task.
  pub fn dispatch(&self, request: DispatchRequest) -> JoinHandle<()> {
    let mailer = Arc::clone(&self.mailer);
    let max_attempts = request.max_attempts.unwrap_or(self.max_attempts).max(1);
    let backoff = request.backoff.clone().unwrap_or_else(|| self.backoff.clone());
    tokio::spawn(deliver(mailer, request, max_attempts, backoff))
  }
}

async fn deliver(mailer: Arc<dyn Mailer>, request: DispatchRequest, max_attempts: u32, backoff: Vec<Duration>) {
  let DispatchRequest { message, metadata, callback, .. } = request;
  let report = |attempt: u32, status, error: Option<String>, is_final| {
    if let Some(callback) = &callback {
      callback(DeliveryReport { metadata: metadata.clone(), attempt, status, error, is_final });
    }
  };

  for attempt in 1..=max_attempts {
    match mailer.send(&message).await {
      Ok(()) => {
        info!(kind = %metadata.kind, reference_id = metadata.reference_id, attempt, "email delivered");
        report(attempt, DeliveryStatus::Sent, None, true);
        return;
      }
      Err(e) => {
        let is_final = attempt == max_attempts || !e.is_retryable();
        warn!(
          kind = %metadata.kind,
          reference_id = metadata.reference_id,
          recipient = %metadata.recipient,
          attempt,
          max_attempts,
          error = %e,
          "email delivery failed",
        );
        report(attempt, DeliveryStatus::Failed, Some(e.to_string()), is_final);
        if is_final {
          return;
        }
        let index = (attempt as usize - 1).min(backoff.len().saturating_sub(1));
        if let Some(delay) = backoff.get(index) {
          tokio::time::sleep(*delay).await;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
  };

  use futures_util::{FutureExt as _, future::BoxFuture};
  use serde_json::json;

  use super::*;
  use crate::{Error, MockMailer, Result};

  /// Fails the first `failures` sends, then succeeds.
  struct FlakyMailer {
    failures: u32,
    calls:    AtomicU32,
  }

  impl Mailer for FlakyMailer {
    fn send<'a>(&'a self, _message: &'a Message) -> BoxFuture<'a, Result<()>> {
      async move {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
          Err(Error::Transport("connection refused".into()))
        } else {
          Ok(())
        }
      }
      .boxed()
    }
  }

  fn message() -> Message {
    Message {
      from:          "Ganztag <noreply@localhost>".into(),
      to:            "eltern@example.org".into(),
      subject:       "Abholung".into(),
      template_name: "checkout_notification.html".into(),
      content_data:  json!({"student_name": "Mia Klein"}),
    }
  }

  fn metadata() -> DeliveryMetadata {
    DeliveryMetadata {
      kind:         "checkout_notification".into(),
      reference_id: 42,
      token:        None,
      recipient:    "eltern@example.org".into(),
    }
  }

  fn recorder() -> (DeliveryCallback, Arc<Mutex<Vec<DeliveryReport>>>) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let callback: DeliveryCallback = Arc::new(move |r: DeliveryReport| sink.lock().unwrap().push(r));
    (callback, reports)
  }

  fn dispatcher(mailer: Arc<dyn Mailer>) -> Dispatcher {
    Dispatcher::new(mailer).with_defaults(DEFAULT_MAX_ATTEMPTS, vec![Duration::ZERO])
  }

  #[tokio::test]
  async fn retries_until_sent() {
    let mailer = Arc::new(FlakyMailer { failures: 2, calls: AtomicU32::new(0) });
    let (callback, reports) = recorder();

    dispatcher(mailer.clone())
      .dispatch(DispatchRequest::new(message(), metadata()).with_callback(callback))
      .await
      .unwrap();

    let seen: Vec<_> = reports
      .lock()
      .unwrap()
      .iter()
      .map(|r| (r.attempt, r.status, r.is_final))
      .collect();
    assert_eq!(seen, [
      (1, DeliveryStatus::Failed, false),
      (2, DeliveryStatus::Failed, false),
      (3, DeliveryStatus::Sent, true),
    ]);
    assert_eq!(mailer.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn gives_up_after_max_attempts() {
    let mailer = Arc::new(FlakyMailer { failures: u32::MAX, calls: AtomicU32::new(0) });
    let (callback, reports) = recorder();

    let mut request = DispatchRequest::new(message(), metadata()).with_callback(callback);
    request.max_attempts = Some(2);
    dispatcher(mailer.clone()).dispatch(request).await.unwrap();

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == DeliveryStatus::Failed));
    assert!(!reports[0].is_final);
    assert!(reports[1].is_final);
    assert_eq!(reports[1].error.as_deref(), Some("smtp error: connection refused"));
    assert_eq!(mailer.calls.load(Ordering::SeqCst), 2);
  }

  struct BadAddressMailer;

  impl Mailer for BadAddressMailer {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<()>> {
      let address = message.to.clone();
      async move { Err(Error::InvalidAddress { address, reason: "missing domain".into() }) }.boxed()
    }
  }

  #[tokio::test]
  async fn permanent_errors_are_not_retried() {
    let (callback, reports) = recorder();
    dispatcher(Arc::new(BadAddressMailer))
      .dispatch(DispatchRequest::new(message(), metadata()).with_callback(callback))
      .await
      .unwrap();

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_final);
  }

  #[tokio::test]
  async fn sends_a_snapshot_of_the_message() {
    let mock = Arc::new(MockMailer::new());
    let mut original = message();
    let handle = dispatcher(mock.clone()).dispatch(DispatchRequest::new(original.clone(), metadata()));
    original.to = "someone-else@example.org".into();
    handle.await.unwrap();

    assert_eq!(mock.sent()[0].to, "eltern@example.org");
  }

  #[test]
  fn report_serialises_final_flag() {
    let report = DeliveryReport {
      metadata: metadata(),
      attempt:  1,
      status:   DeliveryStatus::Sent,
      error:    None,
      is_final: true,
    };
    let json = serde_json::to_value(report).unwrap();
    assert_eq!(json["final"], true);
    assert_eq!(json["status"], "sent");
    assert_eq!(json["metadata"]["type"], "checkout_notification");
  }
}
