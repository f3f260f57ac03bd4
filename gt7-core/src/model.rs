//! GT7 telemetry snapshot model
//!
//! Defines the flat `TelemetrySnapshot` record exchanged between the bridge
//! server and its clients. Every snapshot is stateless: it carries absolute
//! values as reported by the game, never deltas or events.
//!
//! Field names follow the JSON wire format (snake_case).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Sentinel `current_lap` value meaning "no active session"
pub const NO_SESSION_LAP: i32 = -1;

/// Wire value of `suggested_gear` when the game has no suggestion
pub const NO_SUGGESTED_GEAR: u8 = 15;

bitflags! {
    /// Simulator state bits, polled on every snapshot.
    ///
    /// Serialized as the raw integer so unknown bits survive a round trip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(from = "u16", into = "u16")]
    pub struct SimulatorFlags: u16 {
        const CAR_ON_TRACK = 1 << 0;
        /// Never set in online modes
        const PAUSED = 1 << 1;
        const LOADING = 1 << 2;
        const IN_GEAR = 1 << 3;
        const HAS_TURBO = 1 << 4;
        const REV_LIMITER = 1 << 5;
        const HANDBRAKE = 1 << 6;
        const LIGHTS = 1 << 7;
        const HIGH_BEAM = 1 << 8;
        const LOW_BEAM = 1 << 9;
        const ASM_ACTIVE = 1 << 10;
        const TCS_ACTIVE = 1 << 11;
    }
}

impl Default for SimulatorFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<u16> for SimulatorFlags {
    fn from(bits: u16) -> Self {
        Self::from_bits_retain(bits)
    }
}

impl From<SimulatorFlags> for u16 {
    fn from(flags: SimulatorFlags) -> Self {
        flags.bits()
    }
}

/// 3D vector as reported by the game
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Car metadata attached by the bridge when known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarInfo {
    pub car_id: i32,
    pub name: String,
    pub maker_id: i32,
    pub maker_name: String,
    pub image_url: String,
}

/// One telemetry reading
///
/// Missing fields fall back to their defaults, so only structurally wrong
/// payloads fail to parse. `current_lap` defaults to [`NO_SESSION_LAP`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySnapshot {
    pub packet_id: i32,

    // === Position and Movement ===
    /// Track position in meters
    pub position: Vector3,
    pub velocity: Vector3,
    /// Pitch / yaw / roll, -1 to 1
    pub rotation: Vector3,
    /// 1.0 is north, 0.0 is south
    pub rel_orientation_to_north: f32,
    /// Rad/s
    pub angular_velocity: Vector3,
    pub body_height: f32,

    // === Engine and Performance ===
    pub engine_rpm: f32,
    /// Litres, 0 to `gas_capacity`
    pub gas_level: f32,
    /// 100 for most cars, 5 for karts, 0 for electric cars
    pub gas_capacity: f32,
    pub speed_mps: f32,
    /// Below 1.0 reads as negative boost in game
    pub turbo_boost: f32,
    pub oil_pressure: f32,
    pub water_temp: f32,
    pub oil_temp: f32,

    // === Tyre surface temperatures (Celsius) ===
    pub tire_temp_fl: f32,
    pub tire_temp_fr: f32,
    pub tire_temp_rl: f32,
    pub tire_temp_rr: f32,

    // === Transmission and Control ===
    pub current_gear: u8,
    pub suggested_gear: u8,
    pub flags: SimulatorFlags,
    /// 0-255
    pub throttle: u8,
    /// 0-255
    pub brake: u8,
    pub clutch: f32,
    pub clutch_engagement: f32,
    pub rpm_after_clutch: f32,
    pub transmission_top_speed: f32,
    pub gear_ratios: Vec<f32>,

    // === Laps and Position ===
    /// Milliseconds, 0 when unset
    pub best_lap_time: i32,
    /// Milliseconds, 0 when unset
    pub last_lap_time: i32,
    /// 1-based; 0 before the start, -1 without a session
    pub current_lap: i32,
    /// 0 in time and drift trials
    pub total_laps: i32,
    pub current_position: i32,
    pub total_positions: i32,

    // === RPM indicators ===
    pub rpm_flashing: f32,
    pub rpm_hit: f32,

    // === Fuel ===
    /// 0.0-100.0, jumps up on refuel
    pub fuel_percentage: f64,
    pub fuel_capacity: f32,
    pub current_fuel: f32,
    /// Litres used since the current lap began
    pub fuel_consumption_lap: f32,

    // === Car ===
    pub car_id: i32,
    pub car_info: Option<CarInfo>,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            packet_id: 0,
            position: Vector3::default(),
            velocity: Vector3::default(),
            rotation: Vector3::default(),
            rel_orientation_to_north: 0.0,
            angular_velocity: Vector3::default(),
            body_height: 0.0,
            engine_rpm: 0.0,
            gas_level: 0.0,
            gas_capacity: 0.0,
            speed_mps: 0.0,
            turbo_boost: 0.0,
            oil_pressure: 0.0,
            water_temp: 0.0,
            oil_temp: 0.0,
            tire_temp_fl: 0.0,
            tire_temp_fr: 0.0,
            tire_temp_rl: 0.0,
            tire_temp_rr: 0.0,
            current_gear: 0,
            suggested_gear: NO_SUGGESTED_GEAR,
            flags: SimulatorFlags::empty(),
            throttle: 0,
            brake: 0,
            clutch: 0.0,
            clutch_engagement: 0.0,
            rpm_after_clutch: 0.0,
            transmission_top_speed: 0.0,
            gear_ratios: Vec::new(),
            best_lap_time: 0,
            last_lap_time: 0,
            current_lap: NO_SESSION_LAP,
            total_laps: 0,
            current_position: 0,
            total_positions: 0,
            rpm_flashing: 0.0,
            rpm_hit: 0.0,
            fuel_percentage: 0.0,
            fuel_capacity: 0.0,
            current_fuel: 0.0,
            fuel_consumption_lap: 0.0,
            car_id: 0,
            car_info: None,
        }
    }
}

impl TelemetrySnapshot {
    /// Parse a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, crate::error::SnapshotError> {
        serde_json::from_str(text).map_err(crate::error::SnapshotError::Malformed)
    }

    pub fn is_on_track(&self) -> bool {
        self.flags.contains(SimulatorFlags::CAR_ON_TRACK)
    }

    pub fn is_paused(&self) -> bool {
        self.flags.contains(SimulatorFlags::PAUSED)
    }

    pub fn is_loading(&self) -> bool {
        self.flags.contains(SimulatorFlags::LOADING)
    }

    /// Time or drift trial rather than a circuit race
    pub fn is_trial(&self) -> bool {
        self.total_laps == 0
    }

    pub fn has_active_session(&self) -> bool {
        self.current_lap >= 0
    }

    /// Lap counter as shown to the driver: "3/5", or "3" in trials
    pub fn lap_label(&self) -> String {
        if self.is_trial() {
            self.current_lap.to_string()
        } else {
            format!("{}/{}", self.current_lap, self.total_laps)
        }
    }

    pub fn suggested_gear(&self) -> Option<u8> {
        (self.suggested_gear != NO_SUGGESTED_GEAR).then_some(self.suggested_gear)
    }

    pub fn speed_kph(&self) -> f32 {
        self.speed_mps * 3.6
    }

    pub fn throttle_ratio(&self) -> f32 {
        self.throttle as f32 / 255.0
    }

    pub fn brake_ratio(&self) -> f32 {
        self.brake as f32 / 255.0
    }
}
