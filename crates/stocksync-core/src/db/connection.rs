//! Local store lifecycle and connection management

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;

use super::live::LiveRegistry;
use super::migrations;
use crate::error::{Error, Result};
use crate::models::Collection;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the on-device document store.
///
/// Cloning is cheap; all clones share one `SQLite` connection, so every
/// operation is a single atomic statement or transaction. The store is opened
/// and closed explicitly and passed to the sync engine and UI layer.
///
/// Callers yield while waiting for the connection, but the statement itself
/// runs inline on the calling task. Each one is a short single-row or
/// single-collection statement on a local file, so it holds the worker only
/// briefly; on a `current_thread` runtime other tasks wait for that long.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
    live: Arc<LiveRegistry>,
}

impl LocalStore {
    /// Open a store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let store = Self::from_connection(conn, Some(path.clone()))?;
        tracing::info!("Opened local store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(Some(conn)),
                path,
                live: Arc::new(LiveRegistry::default()),
            }),
        })
    }

    /// Close the store. Live subscriptions end and later calls fail with
    /// [`Error::StoreClosed`]. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let conn = self.inner.conn.lock().await.take();
        self.inner.live.close_all();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, error)| Error::Sqlite(error))?;
            tracing::debug!("Local store closed");
        }
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.inner.conn.lock().await.is_some()
    }

    /// Filesystem location, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub(crate) fn live(&self) -> &Arc<LiveRegistry> {
        &self.inner.live
    }

    /// Run a read-only closure against the connection.
    pub(crate) async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.inner.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        f(conn)
    }

    /// Run a mutating closure; when it reports a change, subscribers of
    /// `collection` are notified before the connection is released.
    pub(crate) async fn write<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&Connection) -> Result<(T, bool)>,
    ) -> Result<T> {
        let guard = self.inner.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        let (value, changed) = f(conn)?;
        if changed {
            self.inner.live.notify(conn, collection);
        }
        Ok(value)
    }
}

/// Configure `SQLite` for an on-device store
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" and reject WAL
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
        .ok();
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
