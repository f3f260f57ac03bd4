//! Lap state reconstruction
//!
//! `LapStateTracker` turns a stream of stateless snapshots into a running
//! lap clock, completed-lap records with fuel usage, and restart detection.
//! The snapshot carries no "lap completed" or "race restarted" event, so all
//! of these are inferred from edges on polled values.
//!
//! Every `ingest` runs the same fixed sequence of steps. Later steps read
//! edge state written by earlier ones, so the order must not change:
//!
//! 1. refuel detection
//! 2. race reset (fuel scope)
//! 3. lap completion (fuel scope)
//! 4. loading edge (timing scope)
//! 5. on-track loss (timing scope)
//! 6. lap change while on track (timing scope)
//! 7. pause edges
//! 8. clock advance
//!
//! Fuel and timing keep separate "previous lap" values. A car can leave the
//! track and come back without a lap change; fuel must keep accruing while
//! the visible clock resets.

use crate::model::TelemetrySnapshot;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info};

/// Fuel increase (percentage points) between two snapshots that counts as a refuel
pub const REFUEL_THRESHOLD_PERCENT: f64 = 0.5;

/// Elapsed time published when a lap has just started, so that a fresh lap
/// is distinguishable from "no lap"
pub const LAP_START_EPSILON_MS: f64 = 0.001;

/// Bound on `recent_lap_history`
pub const LAP_HISTORY_LEN: usize = 5;

/// One completed lap
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LapRecord {
    pub fuel_used_percent: f64,
    pub lap_time_ms: i32,
}

/// Chart point for the recent-laps view
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LapHistoryEntry {
    pub lap_index: i32,
    pub lap_time_seconds: f64,
    pub fuel_used_percent: f64,
}

/// Facts derived from the snapshot stream. Produced only by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedRaceState {
    /// Frozen while paused, zeroed on restart or leaving the track
    pub current_lap_elapsed_ms: f64,
    /// Chronological, append-only
    pub completed_laps: Vec<LapRecord>,
    /// Mean over laps with positive fuel usage
    pub average_fuel_per_lap_percent: f64,
    pub average_lap_time_ms: f64,
    /// Last [`LAP_HISTORY_LEN`] laps
    pub recent_lap_history: VecDeque<LapHistoryEntry>,
    /// Fuel level of the latest snapshot
    pub last_fuel_percent: f64,
    /// `last_fuel_percent / average_fuel_per_lap_percent`, 0 without an average
    pub estimated_laps_remaining: f64,
}

impl DerivedRaceState {
    /// A lap with a running clock (elapsed is never exactly zero while active)
    pub fn has_active_lap(&self) -> bool {
        self.current_lap_elapsed_ms > 0.0
    }

    pub fn best_completed_lap_ms(&self) -> Option<i32> {
        self.completed_laps
            .iter()
            .map(|lap| lap.lap_time_ms)
            .filter(|&t| t > 0)
            .min()
    }
}

/// Incremental lap timing and fuel accounting for one session.
///
/// Not safe for concurrent or out-of-order calls; share it behind a mutex.
#[derive(Debug, Clone)]
pub struct LapStateTracker {
    state: DerivedRaceState,

    previous_lap_for_fuel: i32,
    previous_lap_for_timing: i32,

    was_on_track: bool,
    was_paused: bool,
    was_loading: bool,

    previous_fuel_percent: Option<f64>,
    lap_start_fuel_percent: Option<f64>,
    fuel_added_mid_lap_percent: f64,

    accumulated_time_ms: f64,
    last_tick: Option<Instant>,

    // Clock gate from the latest snapshot, for `advance_clock`
    clock_running: bool,
}

impl Default for LapStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LapStateTracker {
    pub fn new() -> Self {
        Self {
            state: DerivedRaceState::default(),
            previous_lap_for_fuel: 0,
            previous_lap_for_timing: 0,
            was_on_track: false,
            was_paused: false,
            was_loading: false,
            previous_fuel_percent: None,
            lap_start_fuel_percent: None,
            fuel_added_mid_lap_percent: 0.0,
            accumulated_time_ms: 0.0,
            last_tick: None,
            clock_running: false,
        }
    }

    /// Latest derived state
    pub fn current_state(&self) -> &DerivedRaceState {
        &self.state
    }

    /// Drop all derived and edge state, as on disconnect
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one snapshot. Must be called in arrival order.
    pub fn ingest(&mut self, snapshot: &TelemetrySnapshot, now: Instant) {
        let fuel = snapshot.fuel_percentage;
        let lap = snapshot.current_lap;

        // Lazily anchor the stopwatch and the fuel baseline on first contact
        self.last_tick.get_or_insert(now);
        self.lap_start_fuel_percent.get_or_insert(fuel);

        self.detect_refuel(fuel);
        self.detect_race_reset(lap, fuel);
        self.detect_lap_completion(snapshot);

        // A negative lap means no session: treat it as off track for timing
        let on_track = snapshot.is_on_track() && snapshot.has_active_session();
        let paused = snapshot.is_paused();
        let loading = snapshot.is_loading();

        if loading && !self.was_loading {
            debug!(lap, "loading screen, resetting lap clock");
            self.reset_timer(now);
        }

        if self.was_on_track && !on_track {
            debug!(lap, "car left the track, resetting lap clock");
            self.reset_timer(now);
        }

        self.was_on_track = on_track;
        self.was_loading = loading;

        if on_track && lap > 0 && lap != self.previous_lap_for_timing {
            self.accumulated_time_ms = 0.0;
            self.state.current_lap_elapsed_ms = LAP_START_EPSILON_MS;
            self.last_tick = Some(now);
            self.previous_lap_for_timing = lap;
        }

        if paused != self.was_paused {
            if paused {
                // Freeze at the moment of pausing
                self.accumulated_time_ms += self.millis_since_tick(now);
            } else {
                self.last_tick = Some(now);
            }
            self.was_paused = paused;
        }

        self.clock_running = on_track && lap > 0 && !paused;
        self.advance_clock(now);

        self.state.last_fuel_percent = fuel;
        self.state.estimated_laps_remaining = if self.state.average_fuel_per_lap_percent > 0.0 {
            fuel / self.state.average_fuel_per_lap_percent
        } else {
            0.0
        };
    }

    /// Advance the visible lap clock without a new snapshot.
    ///
    /// Uses the gate (on track, lap started, not paused) of the last ingested
    /// snapshot. No-op before the first snapshot.
    pub fn advance_clock(&mut self, now: Instant) {
        if !self.clock_running {
            return;
        }
        self.accumulated_time_ms += self.millis_since_tick(now);
        self.last_tick = Some(now);
        self.state.current_lap_elapsed_ms = self.accumulated_time_ms.max(LAP_START_EPSILON_MS);
    }

    fn detect_refuel(&mut self, fuel: f64) {
        if let Some(previous) = self.previous_fuel_percent {
            if fuel > previous + REFUEL_THRESHOLD_PERCENT {
                let added = fuel - previous;
                debug!(added, "refuel detected");
                // Only the latest refuel of a lap is kept
                self.fuel_added_mid_lap_percent = added;
            }
        }
        self.previous_fuel_percent = Some(fuel);
    }

    fn detect_race_reset(&mut self, lap: i32, fuel: f64) {
        if lap != 1 || self.previous_lap_for_fuel <= 1 {
            return;
        }
        info!(
            previous_lap = self.previous_lap_for_fuel,
            "race restart detected, clearing lap history"
        );
        self.state.completed_laps.clear();
        self.state.average_fuel_per_lap_percent = 0.0;
        self.state.average_lap_time_ms = 0.0;
        self.state.recent_lap_history.clear();
        self.lap_start_fuel_percent = Some(fuel);
        self.fuel_added_mid_lap_percent = 0.0;
        self.previous_fuel_percent = Some(fuel);
    }

    fn detect_lap_completion(&mut self, snapshot: &TelemetrySnapshot) {
        let lap = snapshot.current_lap;
        if lap <= 0 || lap == self.previous_lap_for_fuel {
            return;
        }

        let fuel = snapshot.fuel_percentage;
        let start = self.lap_start_fuel_percent.unwrap_or(fuel);
        let fuel_used = (start + self.fuel_added_mid_lap_percent) - fuel;

        if fuel_used > 0.0 {
            let record = LapRecord {
                fuel_used_percent: fuel_used,
                lap_time_ms: snapshot.last_lap_time,
            };
            debug!(
                lap = lap - 1,
                fuel_used,
                lap_time_ms = record.lap_time_ms,
                "lap completed"
            );
            self.state.completed_laps.push(record);
            self.recompute_averages();

            if self.state.recent_lap_history.len() == LAP_HISTORY_LEN {
                self.state.recent_lap_history.pop_front();
            }
            self.state.recent_lap_history.push_back(LapHistoryEntry {
                lap_index: lap - 1,
                lap_time_seconds: snapshot.last_lap_time as f64 / 1000.0,
                fuel_used_percent: fuel_used,
            });
        } else {
            debug!(lap, fuel_used, "lap change without fuel usage, not recorded");
        }

        // Advanced together with the append so a repeated transition never double-counts
        self.previous_lap_for_fuel = lap;
        self.lap_start_fuel_percent = Some(fuel);
        self.fuel_added_mid_lap_percent = 0.0;
    }

    fn recompute_averages(&mut self) {
        let (count, fuel_sum, time_sum) = self
            .state
            .completed_laps
            .iter()
            .filter(|lap| lap.fuel_used_percent > 0.0)
            .fold((0usize, 0.0f64, 0.0f64), |(n, fuel, time), lap| {
                (n + 1, fuel + lap.fuel_used_percent, time + lap.lap_time_ms as f64)
            });

        if count == 0 {
            self.state.average_fuel_per_lap_percent = 0.0;
            self.state.average_lap_time_ms = 0.0;
        } else {
            self.state.average_fuel_per_lap_percent = fuel_sum / count as f64;
            self.state.average_lap_time_ms = time_sum / count as f64;
        }
    }

    fn reset_timer(&mut self, now: Instant) {
        self.accumulated_time_ms = 0.0;
        self.state.current_lap_elapsed_ms = 0.0;
        self.last_tick = Some(now);
        self.previous_lap_for_timing = 0;
    }

    fn millis_since_tick(&self, now: Instant) -> f64 {
        self.last_tick
            .map(|tick| now.saturating_duration_since(tick).as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}
