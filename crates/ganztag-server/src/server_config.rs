//! Server configuration.
//!
//! Read from an optional TOML file overlaid by unprefixed environment
//! variables, so `CORS_ALLOWED_ORIGINS` sets `cors_allowed_origins`.

use std::{path::{Path, PathBuf}, time::Duration};

use anyhow::{Context as _, bail};
use chrono::FixedOffset;
use ganztag_mail::SmtpConfig;
use serde::Deserialize;

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8080 }
fn default_database_path() -> PathBuf { PathBuf::from("ganztag.db") }
fn default_cors() -> String { "*".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_name() -> String { "Ganztag".into() }
fn default_from_address() -> String { "noreply@localhost".into() }
fn default_templates_dir() -> PathBuf { PathBuf::from("templates") }
fn default_checkin_timeout() -> u64 { 15 }
fn default_heartbeat() -> u64 { 30 }
fn default_schulhof_activity() -> String { "Schulhof".into() }
fn default_poll() -> u64 { 60 }
fn default_school_name() -> String { "Ganztag".into() }

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                           String,
  #[serde(default = "default_port")]
  pub port:                           u16,
  #[serde(default = "default_database_path")]
  pub database_path:                  PathBuf,
  pub jwt_secret:                     String,
  /// Comma-separated origins, or `*`.
  #[serde(default = "default_cors")]
  pub cors_allowed_origins:           String,
  #[serde(default)]
  pub security_logging_enabled:       bool,
  /// Base64 AES key; a random key is generated when unset.
  #[serde(default)]
  pub settings_encryption_key:        Option<String>,

  #[serde(default)]
  pub email_smtp_host:                Option<String>,
  #[serde(default = "default_smtp_port")]
  pub email_smtp_port:                u16,
  #[serde(default)]
  pub email_smtp_user:                Option<String>,
  #[serde(default)]
  pub email_smtp_password:            Option<String>,
  #[serde(default = "default_from_name")]
  pub email_from_name:                String,
  #[serde(default = "default_from_address")]
  pub email_from_address:             String,
  #[serde(default = "default_templates_dir")]
  pub templates_dir:                  PathBuf,
  #[serde(default = "default_school_name")]
  pub school_name:                    String,

  #[serde(default = "default_checkin_timeout")]
  pub checkin_timeout_secs:           u64,
  #[serde(default = "default_heartbeat")]
  pub heartbeat_interval_secs:        u64,
  #[serde(default = "default_schulhof_activity")]
  pub schulhof_activity_name:         String,
  #[serde(default = "default_poll")]
  pub scheduled_checkout_poll_secs:   u64,
  #[serde(default)]
  pub utc_offset_minutes:             i32,

  // Accepted for compatibility; no limiter is installed.
  #[serde(default)]
  pub rate_limit_enabled:             bool,
  #[serde(default)]
  pub rate_limit_requests_per_minute: Option<u32>,
  #[serde(default)]
  pub rate_limit_burst:               Option<u32>,
}

impl ServerConfig {
  /// Load `path` (if it exists) and the process environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let builder = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::default().try_parsing(true));
    Self::from_builder(builder)
  }

  pub fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> anyhow::Result<Self> {
    let cfg: Self = builder
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> anyhow::Result<()> {
    if self.jwt_secret.trim().is_empty() {
      bail!("jwt_secret must not be empty");
    }
    if self.checkin_timeout_secs == 0 {
      bail!("checkin_timeout_secs must be positive");
    }
    self.local_offset()?;
    Ok(())
  }

  pub fn cors_origins(&self) -> Vec<String> {
    self
      .cors_allowed_origins
      .split(',')
      .map(str::trim)
      .filter(|o| !o.is_empty())
      .map(str::to_owned)
      .collect()
  }

  pub fn local_offset(&self) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(self.utc_offset_minutes * 60)
      .with_context(|| format!("utc_offset_minutes out of range: {}", self.utc_offset_minutes))
  }

  /// `"<name> <address>"` for the From header.
  pub fn mail_from(&self) -> String { format!("{} <{}>", self.email_from_name, self.email_from_address) }

  /// SMTP settings, or `None` to use the mock mailer.
  pub fn smtp(&self) -> Option<SmtpConfig> {
    let host = self.email_smtp_host.as_deref().map(str::trim).filter(|h| !h.is_empty())?;
    Some(SmtpConfig {
      host:     host.to_owned(),
      port:     self.email_smtp_port,
      username: self.email_smtp_user.clone(),
      password: self.email_smtp_password.clone(),
    })
  }

  pub fn checkin_timeout(&self) -> Duration { Duration::from_secs(self.checkin_timeout_secs) }

  pub fn heartbeat_interval(&self) -> Duration { Duration::from_secs(self.heartbeat_interval_secs.max(1)) }

  pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.scheduled_checkout_poll_secs.max(1)) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  match (s.strip_prefix("~/"), std::env::var("HOME")) {
    (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
    _ => path.to_path_buf(),
  }
}
