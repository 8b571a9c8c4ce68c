//! Status LED driver.
//!
//! One push-pull GPIO (active HIGH) exposed as an
//! [`embedded_hal::digital::OutputPin`] so the indicator task stays
//! hardware-agnostic.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: configures and drives the pin via raw `gpio_*` sys calls.
//! On host/test: tracks the level in-memory only.

use core::fmt;

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// ESP-IDF error code from a failed `gpio_*` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedError(pub i32);

impl fmt::Display for LedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO call failed (rc={})", self.0)
    }
}

impl embedded_hal::digital::Error for LedError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub struct StatusLed {
    gpio: i32,
    high: bool,
    writes: u32,
}

impl StatusLed {
    /// Configure `gpio` as an output and drive it low.
    #[cfg(target_os = "espidf")]
    pub fn new(gpio: i32) -> Result<Self, LedError> {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << gpio,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: plain config struct; gpio is a board constant.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(LedError(ret));
        }
        let mut led = Self {
            gpio,
            high: false,
            writes: 0,
        };
        led.write(false)?;
        log::info!("StatusLed: GPIO{} configured", gpio);
        Ok(led)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(gpio: i32) -> Result<Self, LedError> {
        Ok(Self {
            gpio,
            high: false,
            writes: 0,
        })
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    pub fn is_on(&self) -> bool {
        self.high
    }

    /// Level changes and re-asserts since construction.
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, high: bool) -> Result<(), LedError> {
        // SAFETY: the pin was configured as an output in `new`.
        let ret = unsafe { gpio_set_level(self.gpio, u32::from(high)) };
        if ret != ESP_OK as i32 {
            return Err(LedError(ret));
        }
        self.high = high;
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, high: bool) -> Result<(), LedError> {
        self.high = high;
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }
}

impl ErrorType for StatusLed {
    type Error = LedError;
}

impl OutputPin for StatusLed {
    fn set_low(&mut self) -> Result<(), LedError> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), LedError> {
        self.write(true)
    }
}

impl embedded_hal::digital::StatefulOutputPin for StatusLed {
    fn is_set_high(&mut self) -> Result<bool, LedError> {
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool, LedError> {
        Ok(!self.high)
    }
}
