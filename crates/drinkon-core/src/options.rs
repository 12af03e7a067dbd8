//! Connection option and characteristic read status bit sets.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

macro_rules! bit_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$flag_meta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u8);

        impl $name {
            $($(#[$flag_meta])* pub const $flag: Self = Self(1 << $bit);)*

            const NAMED: &'static [(&'static str, Self)] = &[$((stringify!($flag), Self::$flag)),*];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(&self) -> u8 {
                self.0
            }

            /// Build from raw bits, dropping undefined ones.
            pub const fn from_bits_truncate(bits: u8) -> Self {
                Self(bits & Self::all().0)
            }

            pub const fn all() -> Self {
                Self(0 $(| (1 << $bit))*)
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            /// True when every flag in `other` is set.
            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True when any flag in `other` is set.
            pub const fn intersects(&self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.insert(rhs);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let names: Vec<&str> = Self::NAMED
                    .iter()
                    .filter(|(_, flag)| self.contains(*flag))
                    .map(|(name, _)| *name)
                    .collect();
                write!(f, "{}({})", stringify!($name), names.join(" | "))
            }
        }
    };
}

bit_set! {
    /// What to do with a peripheral once connected.
    ConnectionOptions {
        /// Stay connected after the selected reads complete.
        DISABLE_AUTO_DISCONNECT = 0,
        READ_STATUS = 1,
        READ_INFO = 2,
        READ_LEVEL_SENSOR = 3,
        NOTIFY_LEVEL_SENSOR = 4,
        READ_LOG = 5,
    }
}

impl ConnectionOptions {
    /// Read every characteristic once, then disconnect.
    pub const READ_ALL: Self = Self::READ_STATUS
        .union(Self::READ_INFO)
        .union(Self::READ_LEVEL_SENSOR)
        .union(Self::READ_LOG);

    /// Read status, info and log, then stay connected streaming level sensor values.
    pub const ENABLE_LEVEL_SENSOR_NOTIFICATIONS: Self = Self::READ_STATUS
        .union(Self::READ_INFO)
        .union(Self::NOTIFY_LEVEL_SENSOR)
        .union(Self::READ_LOG)
        .union(Self::DISABLE_AUTO_DISCONNECT);

    /// Level sensor is either read or subscribed to.
    pub const fn wants_level_sensor(&self) -> bool {
        self.intersects(Self::READ_LEVEL_SENSOR.union(Self::NOTIFY_LEVEL_SENSOR))
    }
}

bit_set! {
    /// Characteristics successfully read or enabled during the current connection.
    ///
    /// Info has no flag; it is tracked by whether a value is cached.
    CharacteristicReadStatus {
        STATUS_UPDATED = 0,
        LEVEL_SENSOR_UPDATED = 1,
        LEVEL_SENSOR_NOTIFY_ENABLED = 2,
        LOG_UPDATED = 3,
    }
}
