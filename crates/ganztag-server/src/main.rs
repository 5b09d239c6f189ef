//! ganztag server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus the
//! environment, opens the SQLite store, starts the scheduled-checkout worker
//! and serves the device and staff APIs over HTTP.
//!
//! # Credential helpers
//!
//! ```text
//! ganztag --hash-pin          # argon2 PHC string for a supervisor PIN
//! ganztag --hash-device-key   # SHA-256 hex stored for a device API key
//! ```
//!
//! Both read the secret from stdin.

mod server_config;
mod worker;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use ganztag_api::{
  ApiConfig, AppState,
  auth::{AuthConfig, hash_api_key, hash_pin},
  secrets::SettingsCipher,
};
use ganztag_core::checkin::CheckinPolicy;
use ganztag_mail::{Dispatcher, Mailer, MockMailer, SmtpMailer, Templates};
use ganztag_realtime::Hub;
use ganztag_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::{
  server_config::{ServerConfig, expand_tilde},
  worker::CheckoutWorker,
};

#[derive(Parser)]
#[command(author, version, about = "Ganztag RFID check-in server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a PIN entered on stdin and exit.
  #[arg(long)]
  hash_pin: bool,

  /// Print the stored hash for a device API key entered on stdin and exit.
  #[arg(long, conflicts_with = "hash_pin")]
  hash_device_key: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_pin {
    let pin = read_secret("PIN")?;
    let hash = hash_pin(&pin).map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?;
    println!("{hash}");
    return Ok(());
  }
  if cli.hash_device_key {
    let key = read_secret("API key")?;
    println!("{}", hash_api_key(&key));
    return Ok(());
  }

  let cfg = ServerConfig::load(&cli.config)?;

  let database_path = expand_tilde(&cfg.database_path);
  let store = SqliteStore::open(&database_path)
    .await
    .with_context(|| format!("failed to open store at {database_path:?}"))?;
  let store = Arc::new(store);

  let cipher = match cfg.settings_encryption_key.as_deref().filter(|k| !k.trim().is_empty()) {
    Some(key) => SettingsCipher::from_base64(key).context("invalid settings_encryption_key")?,
    None => {
      warn!("no settings encryption key configured; sensitive settings will not survive a restart");
      SettingsCipher::random()
    }
  };

  let templates = Arc::new(Templates::load(&cfg.templates_dir).context("failed to load email templates")?);
  let mailer: Arc<dyn Mailer> = match cfg.smtp() {
    Some(smtp) => {
      info!(host = %smtp.host, port = smtp.port, "using SMTP mailer");
      Arc::new(SmtpMailer::new(&smtp, templates).context("failed to configure SMTP")?)
    }
    None => {
      info!("no SMTP host configured; using mock mailer");
      Arc::new(MockMailer::new())
    }
  };

  if cfg.rate_limit_enabled {
    warn!("rate_limit_enabled is set but no rate limiter is built in; ignoring");
  }

  let local_offset = cfg.local_offset()?;
  let hub = Arc::new(Hub::default());
  let shutdown = CancellationToken::new();

  let worker = CheckoutWorker {
    store: Arc::clone(&store),
    hub: Arc::clone(&hub),
    dispatcher: Dispatcher::new(mailer),
    mail_from: cfg.mail_from(),
    school_name: cfg.school_name.clone(),
    local_offset,
    period: cfg.poll_interval(),
  };
  let worker_task = tokio::spawn(worker.run(shutdown.clone()));

  let state = AppState {
    store,
    hub,
    policy: Arc::new(CheckinPolicy {
      schulhof_activity_name: cfg.schulhof_activity_name.clone(),
      local_offset,
    }),
    auth: Arc::new(AuthConfig::new(&cfg.jwt_secret, cfg.security_logging_enabled)),
    cipher: Arc::new(cipher),
    config: Arc::new(ApiConfig {
      checkin_timeout:    cfg.checkin_timeout(),
      heartbeat_interval: cfg.heartbeat_interval(),
      cors_origins:       cfg.cors_origins(),
    }),
    shutdown: shutdown.clone(),
  };

  let app = ganztag_api::router(state);
  let address = format!("{}:{}", cfg.host, cfg.port);

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("server error")?;

  shutdown.cancel();
  if let Err(e) = worker_task.await {
    warn!(error = %e, "scheduled checkout worker panicked");
  }
  info!("server stopped");
  Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then cancel `token` so open SSE streams end
/// and graceful shutdown can complete.
async fn shutdown_signal(token: CancellationToken) {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      warn!(error = %e, "failed to listen for Ctrl-C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        warn!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => {},
    () = terminate => {},
  }
  info!("shutdown requested");
  token.cancel();
}

/// Read one line from stdin.
fn read_secret(label: &str) -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("{label}: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
