//! Manufacturer-specific advertisement decoding.
//!
//! DrinkOn bottles broadcast their level and 24 hr consumption in the
//! manufacturer data of their advertisements, so both can be shown
//! without connecting.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::{ADVERT_LEVEL_LEN, ADVERT_MIN_LEN, ADVERT_TYPE_LEVEL, MANUFACTURER_ID};

/// Telemetry carried by a level advertisement.
///
/// Both fields are `None` when the bottle reports a sensor error.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelAdvertisement {
    /// Bottle level, 0.0 to 1.0.
    pub level: Option<f64>,
    /// Consumed in the previous 24 hours, in bottles.
    pub consumed_24hr: Option<f64>,
}

/// A recognised DrinkOn advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advertisement {
    Level(LevelAdvertisement),
}

/// Decode raw manufacturer data.
///
/// Returns `None` for data from other vendors and for unrecognised
/// advertisement types or lengths.
pub fn parse_manufacturer_data(data: &[u8]) -> Option<Advertisement> {
    if data.len() < ADVERT_MIN_LEN {
        return None;
    }
    if LittleEndian::read_u16(&data[0..2]) != MANUFACTURER_ID {
        return None;
    }

    match data[2] {
        ADVERT_TYPE_LEVEL if data.len() == ADVERT_LEVEL_LEN => {
            Some(Advertisement::Level(parse_level(data[3] as i8, data[4] as i8)))
        }
        advert_type => {
            tracing::trace!(
                advert_type = %format!("0x{:02X}", advert_type),
                len = data.len(),
                "Unrecognized advertisement format"
            );
            None
        }
    }
}

fn parse_level(level_raw: i8, consumed_raw: i8) -> LevelAdvertisement {
    if level_raw < 0 || consumed_raw < 0 {
        tracing::debug!(code = level_raw, "Advertised level error code");
        return LevelAdvertisement::default();
    }
    LevelAdvertisement {
        level: Some((f64::from(level_raw) * 0.01).min(1.0)),
        consumed_24hr: Some(f64::from(consumed_raw) * 0.1),
    }
}
