//! Value publisher task.
//!
//! Once per `send_interval_ms`, while a central is connected, asks the
//! value source for a fresh reading (if its refresh interval has run
//! out) and pushes it through the link. Write failures are logged and
//! absorbed; the next due tick retries with a new value.

use core::time::Duration;

use log::{debug, info, warn};

use crate::app::link::Value;
use crate::app::ports::{LinkPort, ValueSource};
use crate::error::LinkError;
use crate::supervisor::PeriodicTask;

/// Null-terminated task name handed to the supervisor.
pub const TASK_NAME: &str = "publisher\0";

/// What a single publisher tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No central (or it dropped mid-tick); nothing pushed.
    Disconnected,
    /// Connected, but the source's refresh interval has not elapsed.
    NotDue,
    Published(Value),
    Failed(LinkError),
}

pub struct PublisherTask<S, L> {
    source: S,
    link: L,
    interval: Duration,
    published: u32,
    failures: u32,
}

impl<S: ValueSource, L: LinkPort> PublisherTask<S, L> {
    pub fn new(source: S, link: L, send_interval_ms: u32) -> Self {
        Self {
            source,
            link,
            interval: Duration::from_millis(u64::from(send_interval_ms.max(1))),
            published: 0,
            failures: 0,
        }
    }

    /// One tick's worth of work without the sleep.
    pub fn publish_once(&mut self) -> PublishOutcome {
        if !self.link.is_connected() {
            debug!("Publisher: waiting for connection");
            return PublishOutcome::Disconnected;
        }
        if !self.source.should_update() {
            return PublishOutcome::NotDue;
        }

        let value = self.source.generate();
        // The central may have dropped while the value was produced.
        if !self.link.is_connected() {
            debug!("Publisher: central left mid-tick, holding {}", value);
            return PublishOutcome::Disconnected;
        }

        match self.link.push_value(&value) {
            Ok(()) => {
                self.published = self.published.wrapping_add(1);
                info!("Publisher: sent {}", value);
                PublishOutcome::Published(value)
            }
            Err(e) => {
                self.failures = self.failures.wrapping_add(1);
                warn!("Publisher: push of {} failed ({})", value, e);
                PublishOutcome::Failed(e)
            }
        }
    }

    pub fn published(&self) -> u32 {
        self.published
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S, L> PeriodicTask for PublisherTask<S, L>
where
    S: ValueSource + 'static,
    L: LinkPort + 'static,
{
    fn tick(&mut self) -> Duration {
        self.publish_once();
        self.interval
    }
}
