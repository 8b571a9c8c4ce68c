//! Application core: pure domain logic, zero I/O.
//!
//! The connection state machine ([`link`]) and the two periodic tasks
//! that read it ([`indicator`], [`publisher`]). All interaction with the
//! BLE stack, GPIO, clock and RNG goes through the **port traits** in
//! [`ports`], keeping this layer testable without real peripherals.

pub mod indicator;
pub mod link;
pub mod ports;
pub mod publisher;
