//! GT7 simulator packet decoding
//!
//! Turns a decrypted 296-byte "A" packet into a [`TelemetrySnapshot`].
//! All multi-byte values are little-endian.

use crate::cars::CarDatabase;
use crate::crypto::{decrypt_packet, MAGIC};
use crate::error::PacketError;
use crate::model::{SimulatorFlags, TelemetrySnapshot, Vector3};
use std::sync::Arc;
use tracing::trace;

/// Size of the standard packet requested with the "A" heartbeat
pub const PACKET_SIZE: usize = 0x128;

// Field offsets
const OFF_POSITION: usize = 0x04;
const OFF_VELOCITY: usize = 0x10;
const OFF_ROTATION: usize = 0x1C;
const OFF_NORTH: usize = 0x28;
const OFF_ANGULAR_VELOCITY: usize = 0x2C;
const OFF_BODY_HEIGHT: usize = 0x38;
const OFF_ENGINE_RPM: usize = 0x3C;
const OFF_GAS_LEVEL: usize = 0x44;
const OFF_GAS_CAPACITY: usize = 0x48;
const OFF_SPEED: usize = 0x4C;
const OFF_TURBO_BOOST: usize = 0x50;
const OFF_OIL_PRESSURE: usize = 0x54;
const OFF_WATER_TEMP: usize = 0x58;
const OFF_OIL_TEMP: usize = 0x5C;
const OFF_TIRE_TEMP_FL: usize = 0x60;
const OFF_TIRE_TEMP_FR: usize = 0x64;
const OFF_TIRE_TEMP_RL: usize = 0x68;
const OFF_TIRE_TEMP_RR: usize = 0x6C;
const OFF_PACKET_ID: usize = 0x70;
const OFF_LAP_COUNT: usize = 0x74;
const OFF_TOTAL_LAPS: usize = 0x76;
const OFF_BEST_LAP: usize = 0x78;
const OFF_LAST_LAP: usize = 0x7C;
const OFF_POSITION_CURRENT: usize = 0x84;
const OFF_POSITION_TOTAL: usize = 0x86;
const OFF_RPM_FLASHING: usize = 0x88;
const OFF_RPM_HIT: usize = 0x8A;
const OFF_TOP_SPEED: usize = 0x8C;
const OFF_FLAGS: usize = 0x8E;
const OFF_GEAR: usize = 0x90;
const OFF_THROTTLE: usize = 0x91;
const OFF_BRAKE: usize = 0x92;
const OFF_CLUTCH: usize = 0xF4;
const OFF_CLUTCH_ENGAGEMENT: usize = 0xF8;
const OFF_RPM_AFTER_CLUTCH: usize = 0xFC;
const OFF_GEAR_RATIOS: usize = 0x104;
const GEAR_RATIO_COUNT: usize = 8;
const OFF_CAR_ID: usize = 0x124;

fn bytes<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(bytes(buf, offset))
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(bytes(buf, offset))
}

fn read_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes(bytes(buf, offset))
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes(buf, offset))
}

fn read_vec3(buf: &[u8], offset: usize) -> Vector3 {
    Vector3::new(
        read_f32(buf, offset),
        read_f32(buf, offset + 4),
        read_f32(buf, offset + 8),
    )
}

/// Remaining fuel in percent; 0 for cars without a tank
pub fn fuel_percentage(gas_level: f32, gas_capacity: f32) -> f64 {
    if gas_capacity <= 0.0 {
        return 0.0;
    }
    gas_level as f64 / gas_capacity as f64 * 100.0
}

/// Decode a decrypted packet.
///
/// `fuel_consumption_lap` is left at zero; [`PacketDecoder`] fills it in.
pub fn parse_packet(buf: &[u8]) -> Result<TelemetrySnapshot, PacketError> {
    if buf.len() < PACKET_SIZE {
        return Err(PacketError::TooShort { len: buf.len() });
    }
    if u32::from_le_bytes(bytes(buf, 0)) != MAGIC {
        return Err(PacketError::BadMagic);
    }

    let gas_level = read_f32(buf, OFF_GAS_LEVEL);
    let gas_capacity = read_f32(buf, OFF_GAS_CAPACITY);
    let gear = buf[OFF_GEAR];

    Ok(TelemetrySnapshot {
        packet_id: read_i32(buf, OFF_PACKET_ID),

        position: read_vec3(buf, OFF_POSITION),
        velocity: read_vec3(buf, OFF_VELOCITY),
        rotation: read_vec3(buf, OFF_ROTATION),
        rel_orientation_to_north: read_f32(buf, OFF_NORTH),
        angular_velocity: read_vec3(buf, OFF_ANGULAR_VELOCITY),
        body_height: read_f32(buf, OFF_BODY_HEIGHT),

        engine_rpm: read_f32(buf, OFF_ENGINE_RPM),
        gas_level,
        gas_capacity,
        speed_mps: read_f32(buf, OFF_SPEED),
        turbo_boost: read_f32(buf, OFF_TURBO_BOOST),
        oil_pressure: read_f32(buf, OFF_OIL_PRESSURE),
        water_temp: read_f32(buf, OFF_WATER_TEMP),
        oil_temp: read_f32(buf, OFF_OIL_TEMP),

        tire_temp_fl: read_f32(buf, OFF_TIRE_TEMP_FL),
        tire_temp_fr: read_f32(buf, OFF_TIRE_TEMP_FR),
        tire_temp_rl: read_f32(buf, OFF_TIRE_TEMP_RL),
        tire_temp_rr: read_f32(buf, OFF_TIRE_TEMP_RR),

        current_gear: gear & 0x0F,
        suggested_gear: gear >> 4,
        flags: SimulatorFlags::from_bits_retain(read_u16(buf, OFF_FLAGS)),
        throttle: buf[OFF_THROTTLE],
        brake: buf[OFF_BRAKE],
        clutch: read_f32(buf, OFF_CLUTCH),
        clutch_engagement: read_f32(buf, OFF_CLUTCH_ENGAGEMENT),
        rpm_after_clutch: read_f32(buf, OFF_RPM_AFTER_CLUTCH),
        transmission_top_speed: read_i16(buf, OFF_TOP_SPEED) as f32,
        gear_ratios: (0..GEAR_RATIO_COUNT)
            .map(|i| read_f32(buf, OFF_GEAR_RATIOS + i * 4))
            .collect(),

        // -1 means no time set
        best_lap_time: read_i32(buf, OFF_BEST_LAP).max(0),
        last_lap_time: read_i32(buf, OFF_LAST_LAP).max(0),
        current_lap: read_i16(buf, OFF_LAP_COUNT) as i32,
        total_laps: read_i16(buf, OFF_TOTAL_LAPS) as i32,
        current_position: read_i16(buf, OFF_POSITION_CURRENT) as i32,
        total_positions: read_i16(buf, OFF_POSITION_TOTAL) as i32,

        rpm_flashing: read_u16(buf, OFF_RPM_FLASHING) as f32,
        rpm_hit: read_u16(buf, OFF_RPM_HIT) as f32,

        fuel_percentage: fuel_percentage(gas_level, gas_capacity),
        fuel_capacity: gas_capacity,
        current_fuel: gas_level,
        fuel_consumption_lap: 0.0,

        car_id: read_i32(buf, OFF_CAR_ID),
        car_info: None,
    })
}

/// Stateful decoder for one packet stream.
///
/// Tracks the fuel level at the start of the current lap so every snapshot
/// carries the litres used so far in that lap. With a [`CarDatabase`]
/// attached, snapshots also carry `car_info` for known cars.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    lap: Option<i32>,
    lap_start_fuel: f32,
    cars: Option<Arc<CarDatabase>>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cars(cars: Arc<CarDatabase>) -> Self {
        Self {
            cars: Some(cars),
            ..Self::default()
        }
    }

    /// Decrypt and decode a raw UDP payload
    pub fn decode(&mut self, raw: &[u8]) -> Result<TelemetrySnapshot, PacketError> {
        if raw.len() < PACKET_SIZE {
            return Err(PacketError::TooShort { len: raw.len() });
        }
        let plain = decrypt_packet(raw).ok_or(PacketError::BadMagic)?;
        let mut snapshot = parse_packet(&plain)?;
        if let Some(cars) = &self.cars {
            snapshot.car_info = cars.get_car_info(snapshot.car_id).cloned();
        }
        Ok(self.account_fuel(snapshot))
    }

    /// Fill in `fuel_consumption_lap` for an already decoded snapshot
    pub fn account_fuel(&mut self, mut snapshot: TelemetrySnapshot) -> TelemetrySnapshot {
        if self.lap != Some(snapshot.current_lap) {
            trace!(
                lap = snapshot.current_lap,
                fuel = snapshot.current_fuel,
                "new fuel baseline"
            );
            self.lap = Some(snapshot.current_lap);
            self.lap_start_fuel = snapshot.current_fuel;
        }
        snapshot.fuel_consumption_lap = self.lap_start_fuel - snapshot.current_fuel;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt_packet;

    struct PacketBuilder {
        buf: Vec<u8>,
    }

    impl PacketBuilder {
        fn new() -> Self {
            let mut buf = vec![0u8; PACKET_SIZE];
            buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
            Self { buf }
        }

        fn f32(mut self, offset: usize, value: f32) -> Self {
            self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            self
        }

        fn i32(mut self, offset: usize, value: i32) -> Self {
            self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            self
        }

        fn i16(mut self, offset: usize, value: i16) -> Self {
            self.buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            self
        }

        fn u8(mut self, offset: usize, value: u8) -> Self {
            self.buf[offset] = value;
            self
        }

        fn lap(self, lap: i16, fuel: f32) -> Self {
            self.i16(OFF_LAP_COUNT, lap)
                .f32(OFF_GAS_LEVEL, fuel)
                .f32(OFF_GAS_CAPACITY, 100.0)
        }
    }

    #[test]
    fn test_parse_fields() {
        let buf = PacketBuilder::new()
            .f32(OFF_POSITION, 12.5)
            .f32(OFF_ENGINE_RPM, 6500.0)
            .f32(OFF_GAS_LEVEL, 30.0)
            .f32(OFF_GAS_CAPACITY, 60.0)
            .f32(OFF_SPEED, 50.0)
            .f32(OFF_TIRE_TEMP_RR, 88.0)
            .i32(OFF_PACKET_ID, 1234)
            .i16(OFF_LAP_COUNT, 3)
            .i16(OFF_TOTAL_LAPS, 10)
            .i32(OFF_BEST_LAP, 95_123)
            .i32(OFF_LAST_LAP, -1)
            .i16(OFF_POSITION_CURRENT, 2)
            .i16(OFF_POSITION_TOTAL, 16)
            .i16(OFF_FLAGS, 0b101)
            .u8(OFF_GEAR, 0x43)
            .u8(OFF_THROTTLE, 255)
            .u8(OFF_BRAKE, 10)
            .f32(OFF_GEAR_RATIOS + 4, 2.1)
            .i32(OFF_CAR_ID, 3383)
            .buf;

        let snap = parse_packet(&buf).unwrap();
        assert_eq!(snap.position.x, 12.5);
        assert_eq!(snap.engine_rpm, 6500.0);
        assert!((snap.fuel_percentage - 50.0).abs() < 1e-9);
        assert_eq!(snap.speed_mps, 50.0);
        assert_eq!(snap.tire_temp_rr, 88.0);
        assert_eq!(snap.packet_id, 1234);
        assert_eq!(snap.current_lap, 3);
        assert_eq!(snap.total_laps, 10);
        assert_eq!(snap.best_lap_time, 95_123);
        assert_eq!(snap.last_lap_time, 0);
        assert_eq!(snap.current_position, 2);
        assert_eq!(snap.total_positions, 16);
        assert!(snap.is_on_track());
        assert!(snap.is_loading());
        assert_eq!(snap.current_gear, 3);
        assert_eq!(snap.suggested_gear(), Some(4));
        assert_eq!(snap.throttle, 255);
        assert_eq!(snap.gear_ratios.len(), 8);
        assert_eq!(snap.gear_ratios[1], 2.1);
        assert_eq!(snap.car_id, 3383);
    }

    #[test]
    fn test_electric_car_has_zero_fuel_percentage() {
        let buf = PacketBuilder::new().f32(OFF_GAS_LEVEL, 0.0).buf;
        assert_eq!(parse_packet(&buf).unwrap().fuel_percentage, 0.0);
        assert_eq!(fuel_percentage(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_no_session_lap_is_negative() {
        let buf = PacketBuilder::new().i16(OFF_LAP_COUNT, -1).u8(OFF_GEAR, 0xF0).buf;
        let snap = parse_packet(&buf).unwrap();
        assert!(!snap.has_active_session());
        assert_eq!(snap.suggested_gear(), None);
    }

    #[test]
    fn test_short_and_bad_magic() {
        assert_eq!(
            parse_packet(&[0u8; 64]),
            Err(PacketError::TooShort { len: 64 })
        );
        assert_eq!(
            parse_packet(&vec![0u8; PACKET_SIZE]),
            Err(PacketError::BadMagic)
        );
    }

    #[test]
    fn test_decoder_decrypts_and_tracks_lap_fuel() {
        let mut decoder = PacketDecoder::new();

        let first = encrypt_packet(&PacketBuilder::new().lap(1, 40.0).buf, 7);
        let snap = decoder.decode(&first).unwrap();
        assert_eq!(snap.current_lap, 1);
        assert_eq!(snap.fuel_consumption_lap, 0.0);

        let mid = encrypt_packet(&PacketBuilder::new().lap(1, 37.5).buf, 8);
        assert_eq!(decoder.decode(&mid).unwrap().fuel_consumption_lap, 2.5);

        let next = encrypt_packet(&PacketBuilder::new().lap(2, 35.0).buf, 9);
        assert_eq!(decoder.decode(&next).unwrap().fuel_consumption_lap, 0.0);
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = PacketDecoder::new();
        assert_eq!(
            decoder.decode(&vec![0xAB; PACKET_SIZE]),
            Err(PacketError::BadMagic)
        );
        assert_eq!(
            decoder.decode(&[0u8; 10]),
            Err(PacketError::TooShort { len: 10 })
        );
    }

    #[test]
    fn test_decoder_attaches_car_info() {
        let cars = CarDatabase::from_readers(
            "ID,Name\n23,Mazda\n".as_bytes(),
            "ID,ShortName,Maker\n374,RX-7 Spirit R Type A (FD) '02,23\n".as_bytes(),
        )
        .unwrap();
        let mut decoder = PacketDecoder::with_cars(Arc::new(cars));

        let known = encrypt_packet(&PacketBuilder::new().lap(1, 40.0).i32(OFF_CAR_ID, 374).buf, 1);
        let info = decoder.decode(&known).unwrap().car_info.unwrap();
        assert_eq!(info.maker_name, "Mazda");
        assert!(info.image_url.contains("mazda-rx-7"));

        let unknown = encrypt_packet(&PacketBuilder::new().lap(1, 40.0).i32(OFF_CAR_ID, 1).buf, 2);
        assert!(decoder.decode(&unknown).unwrap().car_info.is_none());

        // Without a database nothing is attached
        let mut plain = PacketDecoder::new();
        assert!(plain.decode(&known).unwrap().car_info.is_none());
    }
}
