//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter | Implements  | Connects to                         |
//! |---------|-------------|-------------------------------------|
//! | `ble`   | RadioPort   | Bluedroid GATT server / host sim    |
//! | `time`  | Clock       | ESP32 high-resolution timer         |

pub mod ble;
pub mod time;
