//! Protocol module - DrinkOn wire formats.

pub mod advertisement;
pub mod characteristic;
pub mod compress;
pub mod constants;

pub use advertisement::{Advertisement, LevelAdvertisement, parse_manufacturer_data};
pub use characteristic::{
    CharacteristicKind, InfoCharacteristic, LevelSensorCharacteristic, LogCharacteristic,
    LogDataPoint, StatusCharacteristic,
};
pub use compress::{compress423, decompress423};
pub use constants::*;
