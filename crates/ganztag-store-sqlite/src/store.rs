//! [`SqliteStore`]: the SQLite implementation of [`ActiveStore`].

use std::{path::Path, time::Instant};

use ganztag_core::store::{ActiveStore, ActiveTx};
use tracing::debug;

use crate::{
  Error, Result,
  schema::SCHEMA,
  tx::{SqliteTx, check_deadline},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An occupancy store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection handle is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── ActiveStore impl ────────────────────────────────────────────────────────

impl ActiveStore for SqliteStore {
  type Error = Error;

  async fn transact<T, F>(&self, deadline: Option<Instant>, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn ActiveTx) -> ganztag_core::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let result = {
          let mut view = SqliteTx::new(&tx, deadline);
          f(&mut view)
        };
        // Dropping `tx` without committing rolls it back.
        match result.and_then(|value| check_deadline(deadline).map(|()| value)) {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          Err(e) => {
            debug!(error = %e, "transaction rolled back");
            Ok(Err(e))
          }
        }
      })
      .await?;
    outcome.map_err(Error::Core)
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&dyn ActiveTx) -> ganztag_core::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let view = SqliteTx::new(&tx, None);
        Ok(f(&view))
      })
      .await?;
    outcome.map_err(Error::Core)
  }
}
