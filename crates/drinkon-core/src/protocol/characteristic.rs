//! DrinkOn characteristic payloads.
//!
//! Every characteristic has a fixed-length little-endian layout. Decoding
//! rejects any buffer whose length differs from the layout; encoding is the
//! exact inverse and rejects values the layout cannot represent.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::compress::{compress423, decompress423};
use super::constants::*;
use crate::error::CodecError;

/// The characteristics of the DrinkOn service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    Status,
    Info,
    LevelSensor,
    Log,
}

impl CharacteristicKind {
    pub const ALL: [CharacteristicKind; 4] = [
        CharacteristicKind::Status,
        CharacteristicKind::Info,
        CharacteristicKind::LevelSensor,
        CharacteristicKind::Log,
    ];

    pub fn uuid(&self) -> Uuid {
        match self {
            CharacteristicKind::Status => STATUS_CHAR_UUID,
            CharacteristicKind::Info => INFO_CHAR_UUID,
            CharacteristicKind::LevelSensor => LEVEL_SENSOR_CHAR_UUID,
            CharacteristicKind::Log => LOG_CHAR_UUID,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == *uuid)
    }

    /// Fixed payload length in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            CharacteristicKind::Status => STATUS_LEN,
            CharacteristicKind::Info => INFO_LEN,
            CharacteristicKind::LevelSensor => LEVEL_SENSOR_LEN,
            CharacteristicKind::Log => LOG_LEN,
        }
    }

    fn expect_len(&self, data: &[u8]) -> Result<(), CodecError> {
        if data.len() != self.payload_len() {
            return Err(CodecError::MalformedPayload {
                kind: *self,
                expected: self.payload_len(),
                actual: data.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for CharacteristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicKind::Status => write!(f, "Status"),
            CharacteristicKind::Info => write!(f, "Info"),
            CharacteristicKind::LevelSensor => write!(f, "Level Sensor"),
            CharacteristicKind::Log => write!(f, "Log"),
        }
    }
}

/// Scale a bottle quantity to tenths and check it fits `0..=max`.
fn to_tenths(
    value: f32,
    max: u8,
    kind: CharacteristicKind,
    field: &'static str,
) -> Result<u8, CodecError> {
    let scaled = (value * BOTTLE_SCALE).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > f32::from(max) {
        return Err(CodecError::OutOfRange { kind, field });
    }
    Ok(scaled as u8)
}

/// Status characteristic (10 bytes).
///
/// | Offset | Type    | Field                      |
/// |--------|---------|----------------------------|
/// | 0      | u8      | 24 hr goal, tenths of bottle |
/// | 1      | i8      | bottle level %             |
/// | 2..6   | f32 LE  | consumed in last 24 hr     |
/// | 6      | u8      | UI state code              |
/// | 7      | i8      | battery level %            |
/// | 8..10  | u16 LE  | run time, hours            |
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCharacteristic {
    /// Consumption goal per 24 hours, in bottles.
    pub goal_24hr: f32,
    /// Current bottle level, percent.
    pub bottle_level: i8,
    /// Consumed over the previous 24 hours, in bottles.
    pub consumed_24hr: f32,
    pub ui_state_code: u8,
    /// Battery level, percent.
    pub battery_level: i8,
    pub run_time_hours: u16,
    pub captured_at: DateTime<Utc>,
}

impl StatusCharacteristic {
    pub const KIND: CharacteristicKind = CharacteristicKind::Status;

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        Self::KIND.expect_len(data)?;
        let mut cursor = Cursor::new(data);
        let goal_raw = cursor.read_u8()?;
        let bottle_level = cursor.read_i8()?;
        let consumed_24hr = cursor.read_f32::<LittleEndian>()?;
        let ui_state_code = cursor.read_u8()?;
        let battery_level = cursor.read_i8()?;
        let run_time_hours = cursor.read_u16::<LittleEndian>()?;

        if !consumed_24hr.is_finite() {
            return Err(CodecError::InvalidField {
                kind: Self::KIND,
                field: "consumed_24hr",
            });
        }

        Ok(Self {
            goal_24hr: f32::from(goal_raw) / BOTTLE_SCALE,
            bottle_level,
            consumed_24hr,
            ui_state_code,
            battery_level,
            run_time_hours,
            captured_at: Utc::now(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let goal = to_tenths(self.goal_24hr, u8::MAX, Self::KIND, "goal_24hr")?;
        if !self.consumed_24hr.is_finite() {
            return Err(CodecError::OutOfRange {
                kind: Self::KIND,
                field: "consumed_24hr",
            });
        }
        let mut buf = Vec::with_capacity(STATUS_LEN);
        buf.write_u8(goal)?;
        buf.write_i8(self.bottle_level)?;
        buf.write_f32::<LittleEndian>(self.consumed_24hr)?;
        buf.write_u8(self.ui_state_code)?;
        buf.write_i8(self.battery_level)?;
        buf.write_u16::<LittleEndian>(self.run_time_hours)?;
        Ok(buf)
    }
}

/// Raw level sensor reading (4 bytes, i32 LE).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSensorCharacteristic {
    /// Sensor counts.
    pub raw: i32,
    pub captured_at: DateTime<Utc>,
}

impl LevelSensorCharacteristic {
    pub const KIND: CharacteristicKind = CharacteristicKind::LevelSensor;

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        Self::KIND.expect_len(data)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            raw: cursor.read_i32::<LittleEndian>()?,
            captured_at: Utc::now(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(LEVEL_SENSOR_LEN);
        buf.write_i32::<LittleEndian>(self.raw)?;
        Ok(buf)
    }
}

/// Static device information (6 bytes).
///
/// Bytes 0 and 1 are the firmware major and minor numbers, byte 2 the DFU
/// code, bytes 3-4 the model (u16 LE) and byte 5 the hardware revision letter.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoCharacteristic {
    /// "major.minor"
    pub firmware_version: String,
    pub dfu_code: u8,
    pub model_code: u16,
    pub hardware_code: char,
    pub captured_at: DateTime<Utc>,
}

impl InfoCharacteristic {
    pub const KIND: CharacteristicKind = CharacteristicKind::Info;

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        Self::KIND.expect_len(data)?;
        let mut cursor = Cursor::new(data);
        let major = cursor.read_u8()?;
        let minor = cursor.read_u8()?;
        let dfu_code = cursor.read_u8()?;
        let model_code = cursor.read_u16::<LittleEndian>()?;
        let hardware = cursor.read_u8()?;

        if !hardware.is_ascii() {
            return Err(CodecError::InvalidField {
                kind: Self::KIND,
                field: "hardware_code",
            });
        }

        Ok(Self {
            firmware_version: format!("{}.{}", major, minor),
            dfu_code,
            model_code,
            hardware_code: char::from(hardware),
            captured_at: Utc::now(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let out_of_range = |field| CodecError::OutOfRange {
            kind: Self::KIND,
            field,
        };
        let (major, minor) = self
            .firmware_version
            .split_once('.')
            .and_then(|(major, minor)| Some((major.parse::<u8>().ok()?, minor.parse::<u8>().ok()?)))
            .ok_or_else(|| out_of_range("firmware_version"))?;
        if !self.hardware_code.is_ascii() {
            return Err(out_of_range("hardware_code"));
        }

        let mut buf = Vec::with_capacity(INFO_LEN);
        buf.write_u8(major)?;
        buf.write_u8(minor)?;
        buf.write_u8(self.dfu_code)?;
        buf.write_u16::<LittleEndian>(self.model_code)?;
        buf.write_u8(self.hardware_code as u8)?;
        Ok(buf)
    }
}

/// Consumption during one hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogDataPoint {
    /// Hours before now; 0 is the current hour.
    pub hour_offset: u32,
    /// Bottles consumed during that hour.
    pub consumed_bottles: f32,
}

/// Hourly consumption log.
///
/// On the wire a page is 19 bytes: the hour offset of its first sample
/// followed by six 4-in-3 packed groups, 24 samples in tenths of a bottle.
/// A decoded page holds those 24 points; the session concatenates
/// contiguous pages into one longer log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCharacteristic {
    pub points: Vec<LogDataPoint>,
    pub captured_at: DateTime<Utc>,
}

impl LogCharacteristic {
    pub const KIND: CharacteristicKind = CharacteristicKind::Log;

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        Self::KIND.expect_len(data)?;
        let first_offset = u32::from(data[0]);

        let points = data[1..]
            .chunks_exact(3)
            .flat_map(|group| decompress423([group[0], group[1], group[2]]))
            .enumerate()
            .map(|(i, raw)| LogDataPoint {
                hour_offset: first_offset + i as u32,
                consumed_bottles: f32::from(raw) / BOTTLE_SCALE,
            })
            .collect();

        Ok(Self {
            points,
            captured_at: Utc::now(),
        })
    }

    /// Encode a single page. The log must hold exactly 24 contiguous points.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        if self.points.len() != LOG_POINTS_PER_PAGE {
            return Err(CodecError::OutOfRange {
                kind: Self::KIND,
                field: "points",
            });
        }
        let first_offset = self.points[0].hour_offset;
        let first = u8::try_from(first_offset).map_err(|_| CodecError::OutOfRange {
            kind: Self::KIND,
            field: "hour_offset",
        })?;
        let contiguous = self
            .points
            .iter()
            .enumerate()
            .all(|(i, p)| p.hour_offset == first_offset + i as u32);
        if !contiguous {
            return Err(CodecError::InvalidField {
                kind: Self::KIND,
                field: "hour_offset",
            });
        }

        let mut buf = Vec::with_capacity(LOG_LEN);
        buf.push(first);
        for group in self.points.chunks_exact(4) {
            let mut samples = [0u8; 4];
            for (slot, point) in samples.iter_mut().zip(group) {
                *slot = to_tenths(
                    point.consumed_bottles,
                    LOG_SAMPLE_MAX,
                    Self::KIND,
                    "consumed_bottles",
                )?;
            }
            let packed = compress423(samples).ok_or(CodecError::OutOfRange {
                kind: Self::KIND,
                field: "consumed_bottles",
            })?;
            buf.extend_from_slice(&packed);
        }
        Ok(buf)
    }

    pub fn first_hour_offset(&self) -> Option<u32> {
        self.points.first().map(|p| p.hour_offset)
    }

    /// Total bottles consumed across all points.
    pub fn total_consumed(&self) -> f32 {
        self.points.iter().map(|p| p.consumed_bottles).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: [u8; 10] = [50, 84, 0, 0, 0x40, 0x41, 4, 54, 0xD2, 0x04];

    #[test]
    fn test_status_decode() {
        let status = StatusCharacteristic::from_bytes(&STATUS).unwrap();
        assert_eq!(status.goal_24hr, 5.0);
        assert_eq!(status.bottle_level, 84);
        assert_eq!(status.consumed_24hr, f32::from_le_bytes([0, 0, 0x40, 0x41]));
        assert_eq!(status.ui_state_code, 4);
        assert_eq!(status.battery_level, 54);
        assert_eq!(status.run_time_hours, 1234);
    }

    #[test]
    fn test_status_goal_keeps_fraction() {
        let mut data = STATUS;
        data[0] = 25;
        let status = StatusCharacteristic::from_bytes(&data).unwrap();
        assert_eq!(status.goal_24hr, 2.5);
    }

    #[test]
    fn test_status_encode_inverse() {
        let status = StatusCharacteristic::from_bytes(&STATUS).unwrap();
        assert_eq!(status.to_bytes().unwrap(), STATUS.to_vec());
    }

    #[test]
    fn test_status_wrong_length() {
        let err = StatusCharacteristic::from_bytes(&STATUS[..9]).unwrap_err();
        assert_eq!(
            err,
            CodecError::MalformedPayload {
                kind: CharacteristicKind::Status,
                expected: 10,
                actual: 9
            }
        );
    }

    #[test]
    fn test_status_encode_goal_out_of_range() {
        let mut status = StatusCharacteristic::from_bytes(&STATUS).unwrap();
        status.goal_24hr = 30.0;
        assert!(matches!(
            status.to_bytes(),
            Err(CodecError::OutOfRange { field: "goal_24hr", .. })
        ));
    }

    #[test]
    fn test_level_sensor_signed() {
        let level = LevelSensorCharacteristic::from_bytes(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(level.raw, -2);
        let level = LevelSensorCharacteristic::from_bytes(&[0x10, 0x27, 0, 0]).unwrap();
        assert_eq!(level.raw, 10_000);
        assert!(LevelSensorCharacteristic::from_bytes(&[0x10, 0x27, 0]).is_err());
    }

    #[test]
    fn test_info_decode() {
        let info = InfoCharacteristic::from_bytes(&[0, 153, 11, 100, 0, b'F']).unwrap();
        assert_eq!(info.firmware_version, "0.153");
        assert_eq!(info.dfu_code, 11);
        assert_eq!(info.model_code, 100);
        assert_eq!(info.hardware_code, 'F');
        assert_eq!(info.to_bytes().unwrap(), vec![0, 153, 11, 100, 0, b'F']);
    }

    #[test]
    fn test_info_rejects_non_ascii_hardware() {
        let err = InfoCharacteristic::from_bytes(&[1, 2, 3, 4, 5, 0xC3]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "hardware_code", .. }));
    }

    #[test]
    fn test_info_encode_bad_version() {
        let mut info = InfoCharacteristic::from_bytes(&[1, 2, 3, 4, 5, b'A']).unwrap();
        info.firmware_version = "1.300".to_string();
        assert!(info.to_bytes().is_err());
        info.firmware_version = "12".to_string();
        assert!(info.to_bytes().is_err());
    }

    fn log_page(first: u8) -> Vec<u8> {
        let mut page = vec![first];
        page.extend_from_slice(&[0x0A, 0x05, 0x00]);
        page.extend_from_slice(&[0xC1, 0x42, 0x83]);
        page.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        page.extend_from_slice(&[0x00, 0x00, 0x00]);
        page.extend_from_slice(&[0x14, 0x1E, 0x28]);
        page.extend_from_slice(&[0x3F, 0x00, 0x01]);
        page
    }

    #[test]
    fn test_log_decode() {
        let log = LogCharacteristic::from_bytes(&log_page(24)).unwrap();
        assert_eq!(log.points.len(), 24);
        assert_eq!(log.first_hour_offset(), Some(24));
        assert_eq!(log.points[23].hour_offset, 47);

        assert_eq!(log.points[0].consumed_bottles, 1.0);
        assert_eq!(log.points[1].consumed_bottles, 0.5);
        assert_eq!(log.points[2].consumed_bottles, 0.0);
        assert_eq!(log.points[3].consumed_bottles, 0.0);
        // group [0xC1, 0x42, 0x83]: fourth sample = 3 | 4 | 0x20
        assert_eq!(log.points[7].consumed_bottles, 3.9);
        assert_eq!(log.points[8].consumed_bottles, 6.3);
        assert_eq!(log.points[11].consumed_bottles, 6.3);
    }

    #[test]
    fn test_log_reencode_reproduces_page() {
        for first in [0u8, 24, 200] {
            let page = log_page(first);
            let log = LogCharacteristic::from_bytes(&page).unwrap();
            assert_eq!(log.to_bytes().unwrap(), page);
        }
    }

    #[test]
    fn test_log_reencode_every_offset_and_byte() {
        // 31 is odd, so each packed position sees every byte value once.
        for first in 0..=u8::MAX {
            let mut page = vec![first];
            page.extend(
                (0..18u8).map(|j| first.wrapping_mul(31).wrapping_add(j.wrapping_mul(17))),
            );
            let log = LogCharacteristic::from_bytes(&page).unwrap();
            assert_eq!(log.first_hour_offset(), Some(u32::from(first)));
            assert_eq!(log.to_bytes().unwrap(), page, "page {:02X?}", page);
        }
    }

    #[test]
    fn test_log_encode_rejects_unrepresentable_sample() {
        let mut log = LogCharacteristic::from_bytes(&log_page(0)).unwrap();
        log.points[5].consumed_bottles = 6.4;
        assert!(matches!(
            log.to_bytes(),
            Err(CodecError::OutOfRange { field: "consumed_bottles", .. })
        ));
        log.points[5].consumed_bottles = -0.1;
        assert!(log.to_bytes().is_err());
    }

    #[test]
    fn test_log_encode_rejects_gap() {
        let mut log = LogCharacteristic::from_bytes(&log_page(0)).unwrap();
        log.points[10].hour_offset = 99;
        assert!(matches!(
            log.to_bytes(),
            Err(CodecError::InvalidField { field: "hour_offset", .. })
        ));
    }

    #[test]
    fn test_log_wrong_length() {
        assert!(LogCharacteristic::from_bytes(&log_page(0)[..18]).is_err());
    }

    #[test]
    fn test_kind_uuid_lookup() {
        for kind in CharacteristicKind::ALL {
            assert_eq!(CharacteristicKind::from_uuid(&kind.uuid()), Some(kind));
        }
        assert_eq!(CharacteristicKind::from_uuid(&SERVICE_UUID), None);
    }
}
