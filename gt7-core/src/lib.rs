//! GT7 Telemetry Core Library
//!
//! This crate provides the snapshot data model, the lap state tracker that
//! derives lap timing and fuel usage from it, GT7 packet decoding, car
//! metadata lookup, and the source trait implemented by the transports.

pub mod cars;
pub mod crypto;
pub mod error;
pub mod format;
pub mod model;
pub mod packet;
pub mod source;
pub mod tracker;
pub mod validate;

pub use cars::CarDatabase;
pub use error::{AddressError, CarDataError, PacketError, SnapshotError, TransportError};
pub use format::{format_elapsed, format_lap_time};
pub use model::{SimulatorFlags, TelemetrySnapshot, Vector3};
pub use packet::{parse_packet, PacketDecoder};
pub use source::{SourceCallbacks, TelemetrySource};
pub use tracker::{DerivedRaceState, LapHistoryEntry, LapRecord, LapStateTracker};
pub use validate::validate_ps_ip;
