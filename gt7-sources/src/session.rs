//! Session wiring: one source feeding one lap state tracker

use gt7_core::{
    DerivedRaceState, LapStateTracker, SourceCallbacks, TelemetrySnapshot, TelemetrySource,
    TransportError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the lap clock advances between snapshots
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Owns a [`LapStateTracker`] and the single source feeding it
///
/// Snapshots are ingested in arrival order. A disconnect (`None` from the
/// source) resets the tracker. Between snapshots a tick task advances the
/// visible lap clock.
pub struct TelemetrySession {
    tracker: Arc<Mutex<LapStateTracker>>,
    latest: Arc<Mutex<Option<TelemetrySnapshot>>>,
    connected: Arc<AtomicBool>,
    source: tokio::sync::Mutex<Option<Box<dyn TelemetrySource>>>,
    ticker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    tick_interval: Duration,
}

impl TelemetrySession {
    pub fn new() -> Self {
        Self::with_tick_interval(DEFAULT_TICK_INTERVAL)
    }

    pub fn with_tick_interval(tick_interval: Duration) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(LapStateTracker::new())),
            latest: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            source: tokio::sync::Mutex::new(None),
            ticker: Mutex::new(None),
            tick_interval,
        }
    }

    fn callbacks(&self) -> SourceCallbacks {
        let tracker = self.tracker.clone();
        let latest = self.latest.clone();
        let connected = self.connected.clone();
        SourceCallbacks::new(
            move |snapshot| match snapshot {
                Some(snapshot) => {
                    tracker.lock().ingest(&snapshot, Instant::now());
                    *latest.lock() = Some(snapshot);
                }
                None => {
                    tracker.lock().reset();
                    *latest.lock() = None;
                }
            },
            move |up| connected.store(up, Ordering::SeqCst),
        )
    }

    /// Replace the active source. The previous one is fully disconnected
    /// before the new one connects.
    pub async fn switch_source(
        &self,
        source: Box<dyn TelemetrySource>,
        address: &str,
    ) -> Result<(), TransportError> {
        let mut slot = self.source.lock().await;
        if let Some(previous) = slot.take() {
            debug!(source = previous.name(), "disconnecting previous source");
            previous.disconnect().await;
        }
        self.stop_ticker();
        self.reset_state();

        info!(source = source.name(), address, "connecting telemetry source");
        source.connect(address, self.callbacks()).await?;
        *slot = Some(source);
        self.start_ticker();
        Ok(())
    }

    /// Disconnect the source, stop the clock and clear all derived state
    pub async fn close(&self) {
        if let Some(source) = self.source.lock().await.take() {
            source.disconnect().await;
        }
        self.stop_ticker();
        self.reset_state();
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn race_state(&self) -> DerivedRaceState {
        self.tracker.lock().current_state().clone()
    }

    pub fn latest_snapshot(&self) -> Option<TelemetrySnapshot> {
        self.latest.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reset_state(&self) {
        self.tracker.lock().reset();
        *self.latest.lock() = None;
    }

    fn start_ticker(&self) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tracker = self.tracker.clone();
        let period = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tracker.lock().advance_clock(Instant::now()),
                }
            }
        });
        if let Some((old, _)) = self.ticker.lock().replace((cancel, handle)) {
            old.cancel();
        }
    }

    fn stop_ticker(&self) {
        if let Some((cancel, handle)) = self.ticker.lock().take() {
            cancel.cancel();
            handle.abort();
        }
    }
}

impl Default for TelemetrySession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.ticker.get_mut().take() {
            cancel.cancel();
        }
    }
}
