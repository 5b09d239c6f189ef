//! Error type for `ganztag-mail`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("email template not found: {0}")]
  TemplateNotFound(String),

  #[error("invalid email address {address:?}: {reason}")]
  InvalidAddress { address: String, reason: String },

  #[error("failed to build email: {0}")]
  Build(String),

  #[error("smtp error: {0}")]
  Transport(String),

  #[error("failed to read templates: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to walk templates directory: {0}")]
  Walk(#[from] walkdir::Error),
}

impl Error {
  /// Whether another attempt could succeed.
  ///
  /// A missing template is retryable: templates can be deployed while a
  /// delivery is still backing off.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::TemplateNotFound(_) | Error::Transport(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
