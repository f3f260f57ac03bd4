//! Telemetry source trait definition

use crate::error::TransportError;
use crate::model::TelemetrySnapshot;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

type SnapshotFn = dyn Fn(Option<TelemetrySnapshot>) + Send + Sync;
type StatusFn = dyn Fn(bool) + Send + Sync;

/// Consumer callbacks registered with a source on connect
///
/// `on_snapshot(None)` tells the consumer to clear its display state.
#[derive(Clone)]
pub struct SourceCallbacks {
    pub on_snapshot: Arc<SnapshotFn>,
    pub on_status: Arc<StatusFn>,
}

impl SourceCallbacks {
    pub fn new<S, C>(on_snapshot: S, on_status: C) -> Self
    where
        S: Fn(Option<TelemetrySnapshot>) + Send + Sync + 'static,
        C: Fn(bool) + Send + Sync + 'static,
    {
        Self {
            on_snapshot: Arc::new(on_snapshot),
            on_status: Arc::new(on_status),
        }
    }

    /// Callbacks that drop everything
    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }

    pub fn snapshot(&self, snapshot: Option<TelemetrySnapshot>) {
        (self.on_snapshot)(snapshot)
    }

    pub fn status(&self, connected: bool) {
        (self.on_status)(connected)
    }
}

impl fmt::Debug for SourceCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCallbacks").finish_non_exhaustive()
    }
}

/// A connection that delivers snapshots in arrival order
///
/// Implementations must uphold:
/// - `connect` resolves once the handshake completes, or fails within a
///   bounded time. A `connect` while another is in flight returns without
///   opening a second connection.
/// - `disconnect` never fails, may be called repeatedly, and deregisters the
///   callbacks before returning.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Get the name of this source (e.g., "websocket", "mock")
    fn name(&self) -> &str;

    /// Open the connection and start delivering to `callbacks`
    async fn connect(
        &self,
        address: &str,
        callbacks: SourceCallbacks,
    ) -> Result<(), TransportError>;

    /// Close the connection and deregister callbacks
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
