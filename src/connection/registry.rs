//! Lazily opened, shared database handles keyed by connection id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{redact_dsn, ConnectionDescriptor};
use crate::db::{DatabaseHandle, Dialer, DriverDispatch};
use crate::error::{ExplorerError, Result};

/// One slot per connection id; filled by the first successful dial.
type HandleCell = Arc<OnceCell<DatabaseHandle>>;

/// Resolves connection ids to pooled database handles.
///
/// A handle is dialed on first use and cached for the life of the registry.
/// Concurrent first uses of the same id share a single dial. A failed or
/// cancelled dial caches nothing, so the next call tries again.
pub struct ConnectionRegistry {
    descriptors: Vec<ConnectionDescriptor>,
    dialer: Arc<dyn Dialer>,
    cells: Mutex<HashMap<String, HandleCell>>,
}

impl ConnectionRegistry {
    /// Creates a registry that opens connections with the real drivers.
    pub fn new(descriptors: Vec<ConnectionDescriptor>) -> Self {
        Self::with_dialer(descriptors, Arc::new(DriverDispatch))
    }

    /// Creates a registry with a custom dialer.
    pub fn with_dialer(descriptors: Vec<ConnectionDescriptor>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            descriptors,
            dialer,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// The configured connections, in configuration order.
    pub fn descriptors(&self) -> &[ConnectionDescriptor] {
        &self.descriptors
    }

    /// Returns the handle for `id`, dialing it if this is the first use.
    pub async fn resolve(&self, id: &str, cancel: &CancellationToken) -> Result<DatabaseHandle> {
        // First match wins when ids are duplicated.
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ExplorerError::unknown_connection(id))?;

        let cell = self.cell(id)?;
        if let Some(handle) = cell.get() {
            return Ok(handle.clone());
        }

        let handle = cell
            .get_or_try_init(|| async {
                info!("Opening connection '{}' ({})", id, redact_dsn(&descriptor.dsn));
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => Err(ExplorerError::cancelled()),
                    handle = self.dialer.dial(&descriptor.dsn) => handle,
                }
            })
            .await
            .inspect_err(|e| warn!("Failed to open connection '{id}': {e}"))?;

        Ok(handle.clone())
    }

    /// Whether a handle for `id` has been opened.
    pub fn is_open(&self, id: &str) -> bool {
        self.cells
            .lock()
            .map(|cells| cells.get(id).is_some_and(|cell| cell.initialized()))
            .unwrap_or(false)
    }

    /// Closes every open handle. Subsequent resolves dial again.
    pub async fn close_all(&self) {
        let cells: Vec<(String, HandleCell)> = match self.cells.lock() {
            Ok(mut cells) => cells.drain().collect(),
            Err(_) => return,
        };

        for (id, cell) in cells {
            if let Some(handle) = cell.get() {
                match handle.close().await {
                    Ok(()) => debug!("Closed connection '{id}'"),
                    Err(e) => warn!("Failed to close connection '{id}': {e}"),
                }
            }
        }
    }

    fn cell(&self, id: &str) -> Result<HandleCell> {
        let mut cells = self
            .cells
            .lock()
            .map_err(|_| ExplorerError::internal("connection registry lock poisoned"))?;
        Ok(cells.entry(id.to_string()).or_default().clone())
    }
}
