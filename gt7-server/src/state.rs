//! Application state management

use crate::config::ServerConfig;
use gt7_core::CarDatabase;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,

    /// Car metadata attached to console snapshots
    pub cars: Arc<CarDatabase>,

    /// Open telemetry WebSocket connections
    connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            cars: Arc::new(CarDatabase::empty()),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_cars(mut self, cars: CarDatabase) -> Self {
        self.cars = Arc::new(cars);
        self
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Count a connection for as long as the returned guard lives
    pub fn track_connection(&self) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard(self.connections.clone())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard_counts() {
        let state = AppState::new();
        let a = state.track_connection();
        let b = state.clone().track_connection();
        assert_eq!(state.connection_count(), 2);
        drop(a);
        assert_eq!(state.connection_count(), 1);
        drop(b);
        assert_eq!(state.connection_count(), 0);
    }
}
