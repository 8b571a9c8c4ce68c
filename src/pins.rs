//! GPIO assignments for the SeiZen board (ESP32 DevKit layout).
//!
//! Single source of truth: drivers reference this module rather than
//! hard-coding pin numbers.

/// On-board blue LED, active HIGH. Driven by the connection indicator.
pub const STATUS_LED_GPIO: i32 = 2;
