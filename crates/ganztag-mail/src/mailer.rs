//! The transport contract.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// An email before rendering.
///
/// `content_data` is a JSON object whose top-level values are substituted
/// into the template named by `template_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  /// `"Name <address>"` or a bare address.
  pub from:          String,
  pub to:            String,
  pub subject:       String,
  pub template_name: String,
  pub content_data:  Value,
}

/// Delivers one message. Implementations must be shareable across tasks.
pub trait Mailer: Send + Sync {
  fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<()>>;
}
