//! Placeholder sensor producing uniformly random readings in 0..=1000.
//!
//! Stands in for a real transducer until the hardware lands. Readings are
//! refreshed at most once per `refresh_interval_ms`.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: draws from the hardware RNG (`esp_random`).
//! On host/test: draws from `RandomState` hasher entropy.

use crate::app::link::Value;
use crate::app::ports::{Clock, ValueSource};
use crate::sensors::RefreshTimer;

/// Largest reading the dummy sensor produces.
pub const MAX_READING: u16 = 1000;

pub struct DummySensor<C: Clock> {
    clock: C,
    timer: RefreshTimer,
    value: Value,
}

impl<C: Clock> DummySensor<C> {
    /// The refresh timer starts now; the first fresh value is due one
    /// interval after construction.
    pub fn new(clock: C, refresh_interval_ms: u32) -> Self {
        let timer = RefreshTimer::new(clock.now_ms(), u64::from(refresh_interval_ms));
        Self {
            clock,
            timer,
            value: Value::default(),
        }
    }

    pub fn timer(&self) -> &RefreshTimer {
        &self.timer
    }
}

impl<C: Clock> ValueSource for DummySensor<C> {
    fn should_update(&self) -> bool {
        self.timer.is_due(self.clock.now_ms())
    }

    fn generate(&mut self) -> Value {
        let raw = (random_u32() % (u32::from(MAX_READING) + 1)) as u16;
        self.value = Value::new(raw);
        self.timer.mark(self.clock.now_ms());
        self.value
    }

    fn current(&self) -> Value {
        self.value
    }
}

#[cfg(target_os = "espidf")]
fn random_u32() -> u32 {
    // SAFETY: esp_random reads the hardware RNG register; no preconditions.
    unsafe { esp_idf_svc::sys::esp_random() }
}

/// Simulation stub, non-cryptographic.
#[cfg(not(target_os = "espidf"))]
fn random_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    RandomState::new().build_hasher().finish() as u32
}
