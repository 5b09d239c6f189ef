//! Outbound email for ganztag.
//!
//! A [`Mailer`] delivers one rendered [`Message`]. The [`Dispatcher`] wraps a
//! mailer with background retries and per-attempt callbacks, so request
//! handlers and workers never wait on SMTP.
//!
//! Two mailers ship here: [`SmtpMailer`] (lettre) and [`MockMailer`], which
//! only logs and is used when no SMTP host is configured.

pub mod dispatcher;
pub mod error;
pub mod mailer;
pub mod mock;
pub mod smtp;
pub mod templates;

pub use dispatcher::{
  DeliveryCallback, DeliveryMetadata, DeliveryReport, DeliveryStatus, DispatchRequest, Dispatcher,
};
pub use error::{Error, Result};
pub use mailer::{Mailer, Message};
pub use mock::MockMailer;
pub use smtp::{SmtpConfig, SmtpMailer};
pub use templates::Templates;
