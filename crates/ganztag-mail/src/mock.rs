//! A mailer that only logs.

use std::sync::{Mutex, PoisonError};

use futures_util::{FutureExt as _, future::BoxFuture};
use tracing::info;

use crate::{Mailer, Message, Result};

/// Logs every message and always succeeds. Keeps a copy of what it was asked
/// to send.
#[derive(Debug, Default)]
pub struct MockMailer {
  sent: Mutex<Vec<Message>>,
}

impl MockMailer {
  pub fn new() -> Self { Self::default() }

  pub fn sent(&self) -> Vec<Message> {
    self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

impl Mailer for MockMailer {
  fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<()>> {
    async move {
      info!(
        to = %message.to,
        subject = %message.subject,
        template = %message.template_name,
        "mock mailer: email not sent",
      );
      self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(message.clone());
      Ok(())
    }
    .boxed()
  }
}
