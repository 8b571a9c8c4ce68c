//! Connection indicator task.
//!
//! Mirrors the link state onto a single digital output:
//!
//! | Link state   | Output                                     |
//! |--------------|--------------------------------------------|
//! | Connected    | held high, re-checked every poll interval  |
//! | Disconnected | toggles every `blink_interval_ms`          |
//!
//! Blink phases are measured against the clock rather than counted in
//! ticks, and a phase is slept in poll-sized slices, so a connect is
//! picked up within one poll interval even mid-phase.

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, warn};

use crate::app::ports::{Clock, LinkPort};
use crate::supervisor::PeriodicTask;

/// Null-terminated task name handed to the supervisor.
pub const TASK_NAME: &str = "indicator\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorMode {
    /// Nothing driven yet.
    Idle,
    Steady,
    Blinking,
}

pub struct IndicatorTask<P, L, C> {
    pin: P,
    link: L,
    clock: C,
    blink_ms: u64,
    poll_ms: u64,
    mode: IndicatorMode,
    level: Option<bool>,
    phase_start_ms: u64,
}

impl<P, L, C> IndicatorTask<P, L, C>
where
    P: OutputPin,
    L: LinkPort,
    C: Clock,
{
    pub fn new(pin: P, link: L, clock: C, blink_interval_ms: u32, poll_interval_ms: u32) -> Self {
        Self {
            pin,
            link,
            clock,
            blink_ms: u64::from(blink_interval_ms.max(1)),
            poll_ms: u64::from(poll_interval_ms.max(1)),
            mode: IndicatorMode::Idle,
            level: None,
            phase_start_ms: 0,
        }
    }

    pub fn mode(&self) -> IndicatorMode {
        self.mode
    }

    /// Last level successfully written to the pin.
    pub fn level(&self) -> Option<bool> {
        self.level
    }

    fn drive(&mut self, high: bool) {
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        match result {
            Ok(()) => self.level = Some(high),
            Err(e) => warn!("Indicator: pin write failed ({:?})", e),
        }
    }
}

impl<P, L, C> PeriodicTask for IndicatorTask<P, L, C>
where
    P: OutputPin + Send + 'static,
    L: LinkPort + 'static,
    C: Clock + 'static,
{
    fn tick(&mut self) -> Duration {
        if self.link.is_connected() {
            if self.mode != IndicatorMode::Steady || self.level != Some(true) {
                debug!("Indicator: steady");
                self.drive(true);
                self.mode = IndicatorMode::Steady;
            }
            return Duration::from_millis(self.poll_ms);
        }

        let now = self.clock.now_ms();
        if self.mode == IndicatorMode::Blinking {
            if now.saturating_sub(self.phase_start_ms) >= self.blink_ms {
                let next = !self.level.unwrap_or(false);
                self.drive(next);
                self.phase_start_ms = now;
            }
        } else {
            debug!("Indicator: blinking");
            self.mode = IndicatorMode::Blinking;
            self.drive(true);
            self.phase_start_ms = now;
        }

        let elapsed = now.saturating_sub(self.phase_start_ms);
        let remaining = self.blink_ms.saturating_sub(elapsed).max(1);
        Duration::from_millis(remaining.min(self.poll_ms))
    }

    fn on_stop(&mut self) {
        self.drive(false);
        self.mode = IndicatorMode::Idle;
    }
}
