//! Vendor protocol constants for DrinkOn bottles.
//!
//! These identify the DrinkOn GATT service, its characteristics and the
//! manufacturer-specific advertisement format. They are fixed by the
//! bottle firmware and are not configurable.

use uuid::Uuid;

// ============================================================================
// GATT Identifiers
// ============================================================================

/// DrinkOn service base UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xE5BA1000_B46E_7188_A34B_A74651E22E9D);

/// Status characteristic (goal, level, consumption, battery, run time)
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0xE5BA1001_B46E_7188_A34B_A74651E22E9D);

/// Raw level sensor characteristic (readable and notifiable)
pub const LEVEL_SENSOR_CHAR_UUID: Uuid = Uuid::from_u128(0xE5BA1002_B46E_7188_A34B_A74651E22E9D);

/// Static device information characteristic
pub const INFO_CHAR_UUID: Uuid = Uuid::from_u128(0xE5BA1003_B46E_7188_A34B_A74651E22E9D);

/// Hourly consumption log characteristic
pub const LOG_CHAR_UUID: Uuid = Uuid::from_u128(0xE5BA1004_B46E_7188_A34B_A74651E22E9D);

// ============================================================================
// Advertisement
// ============================================================================

/// Element Products company ID assigned by the Bluetooth SIG (little-endian on air).
pub const MANUFACTURER_ID: u16 = 0x070B;

/// Manufacturer-specific advertisement type: bottle level.
pub const ADVERT_TYPE_LEVEL: u8 = 0x11;

/// Minimum manufacturer data length (company ID + type byte).
pub const ADVERT_MIN_LEN: usize = 3;

/// Total manufacturer data length of a level advertisement.
pub const ADVERT_LEVEL_LEN: usize = 5;

// ============================================================================
// Characteristic Payload Sizes
// ============================================================================

pub const STATUS_LEN: usize = 10;
pub const LEVEL_SENSOR_LEN: usize = 4;
pub const INFO_LEN: usize = 6;
pub const LOG_LEN: usize = 19;

/// Packed 3-byte groups in one log page.
pub const LOG_GROUPS: usize = 6;

/// Hourly samples carried by one log page.
pub const LOG_POINTS_PER_PAGE: usize = LOG_GROUPS * 4;

/// Largest raw value a packed 6-bit log sample can hold.
pub const LOG_SAMPLE_MAX: u8 = 0x3F;

/// Fixed-point scale of goal, consumption and log values (tenths of a bottle).
pub const BOTTLE_SCALE: f32 = 10.0;

// ============================================================================
// Timing
// ============================================================================

/// Default maximum time spent in the connecting state.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 4000;
