//! Background executor for scheduled checkouts.
//!
//! Every poll period the worker executes all due pending checkouts, one
//! transaction each. A failure is logged and leaves the checkout pending for
//! the next tick.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, Utc};
use ganztag_core::{
  scheduled::{ExecutedCheckout, execute_checkout},
  session::ScheduledCheckout,
  store::ActiveStore,
};
use ganztag_mail::{DeliveryMetadata, DeliveryReport, DeliveryStatus, DispatchRequest, Dispatcher, Message};
use ganztag_realtime::Hub;
use serde_json::json;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const NOTIFICATION_TEMPLATE: &str = "checkout_notification.html";

pub struct CheckoutWorker<S> {
  pub store:        Arc<S>,
  pub hub:          Arc<Hub>,
  pub dispatcher:   Dispatcher,
  pub mail_from:    String,
  pub school_name:  String,
  pub local_offset: FixedOffset,
  pub period:       Duration,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct Tick {
  pub executed:      usize,
  pub failed:        usize,
  /// Deliveries still in flight.
  pub notifications: Vec<JoinHandle<()>>,
}

impl<S> CheckoutWorker<S>
where
  S: ActiveStore + 'static,
{
  pub async fn run(self, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(self.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = self.period.as_secs(), "scheduled checkout worker started");

    loop {
      tokio::select! {
        () = shutdown.cancelled() => break,
        _ = ticker.tick() => {
          let tick = self.run_once(Utc::now()).await;
          if tick.executed + tick.failed > 0 {
            info!(executed = tick.executed, failed = tick.failed, "scheduled checkouts processed");
          }
        }
      }
    }
    info!("scheduled checkout worker stopped");
  }

  /// Execute every checkout due at `now`.
  pub async fn run_once(&self, now: DateTime<Utc>) -> Tick {
    let due = match self.store.read(move |tx| tx.find_due_scheduled_checkouts(now)).await {
      Ok(due) => due,
      Err(e) => {
        warn!(error = %e, "failed to load due scheduled checkouts");
        return Tick::default();
      }
    };
    debug!(count = due.len(), "due scheduled checkouts");

    let mut tick = Tick::default();
    for checkout in due {
      let id = checkout.id;
      match self.store.transact(None, move |tx| execute_checkout(tx, id, now)).await {
        Ok(done) => {
          tick.executed += 1;
          self.hub.broadcast_all(done.events.clone());
          tick.notifications.extend(self.notify(&checkout, &done, now));
        }
        Err(e) => {
          tick.failed += 1;
          warn!(checkout_id = id, error = %e, "scheduled checkout failed");
        }
      }
    }
    tick
  }

  fn notify(&self, checkout: &ScheduledCheckout, done: &ExecutedCheckout, at: DateTime<Utc>) -> Option<JoinHandle<()>> {
    let Some(to) = done.guardian_email.clone() else {
      debug!(checkout_id = done.checkout_id, "no guardian email; skipping notification");
      return None;
    };

    let message = Message {
      from:          self.mail_from.clone(),
      to:            to.clone(),
      subject:       format!("Abholung: {}", done.student_name),
      template_name: NOTIFICATION_TEMPLATE.into(),
      content_data:  json!({
        "student_name":   done.student_name,
        "room_name":      done.room_name.as_deref().unwrap_or("-"),
        "checked_out_at": at.with_timezone(&self.local_offset).format("%d.%m.%Y %H:%M").to_string(),
        "reason":         checkout.reason.as_deref().unwrap_or("-"),
        "school_name":    self.school_name,
      }),
    };
    let metadata = DeliveryMetadata {
      kind:         "checkout_notification".into(),
      reference_id: done.checkout_id,
      token:        None,
      recipient:    to,
    };

    let request = DispatchRequest::new(message, metadata).with_callback(Arc::new(|report: DeliveryReport| {
      if report.is_final && report.status == DeliveryStatus::Failed {
        error!(
          reference_id = report.metadata.reference_id,
          attempts = report.attempt,
          error = report.error.as_deref().unwrap_or(""),
          "checkout notification undeliverable",
        );
      }
    }));
    Some(self.dispatcher.dispatch(request))
  }
}
