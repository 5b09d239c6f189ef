//! SMTP delivery through lettre.
//!
//! Port 465 uses implicit TLS; any other port upgrades with STARTTLS.

use std::sync::Arc;

use futures_util::{FutureExt as _, future::BoxFuture};
use lettre::{
  AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
  message::{Mailbox, header::ContentType},
  transport::smtp::authentication::Credentials,
};
use tracing::debug;

use crate::{Error, Mailer, Message, Result, Templates};

pub const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
  pub host:     String,
  pub port:     u16,
  pub username: Option<String>,
  pub password: Option<String>,
}

pub struct SmtpMailer {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  templates: Arc<Templates>,
}

impl SmtpMailer {
  pub fn new(config: &SmtpConfig, templates: Arc<Templates>) -> Result<Self> {
    let builder = if config.port == IMPLICIT_TLS_PORT {
      AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
    }
    .map_err(|e| Error::Transport(format!("SMTP relay error: {e}")))?
    .port(config.port);

    let builder = match (&config.username, &config.password) {
      (Some(user), Some(password)) => builder.credentials(Credentials::new(user.clone(), password.clone())),
      _ => builder,
    };

    Ok(Self { transport: builder.build(), templates })
  }

  fn build(&self, message: &Message) -> Result<lettre::Message> {
    let body = self.templates.render(&message.template_name, &message.content_data)?;
    lettre::Message::builder()
      .from(mailbox(&message.from)?)
      .to(mailbox(&message.to)?)
      .subject(message.subject.clone())
      .header(ContentType::TEXT_HTML)
      .body(body)
      .map_err(|e| Error::Build(e.to_string()))
  }
}

fn mailbox(address: &str) -> Result<Mailbox> {
  address.parse().map_err(|e: lettre::address::AddressError| Error::InvalidAddress {
    address: address.to_owned(),
    reason:  e.to_string(),
  })
}

impl Mailer for SmtpMailer {
  fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<()>> {
    async move {
      let email = self.build(message)?;
      self
        .transport
        .send(email)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
      debug!(to = %message.to, template = %message.template_name, "email sent");
      Ok(())
    }
    .boxed()
  }
}
