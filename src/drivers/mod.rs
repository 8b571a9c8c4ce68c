//! Peripheral drivers and task-spawning helpers.

pub mod status_led;
pub mod task_pin;
