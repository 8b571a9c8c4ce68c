//! Periodic task supervisor.
//!
//! Owns every long-running activity in the firmware (connection
//! indicator, value publisher). Each task runs on its own core-pinned
//! thread (FreeRTOS task on target) created by
//! [`spawn_on_core`](crate::drivers::task_pin::spawn_on_core).
//!
//! ```text
//!   start(task, spec) ──▶ TaskSlot { handle, CancelToken, JoinHandle }
//!                              │
//!                              ▼  thread
//!                  loop { pause = task.tick(); token.sleep(pause)? }
//!                              │
//!   stop(handle) ── cancel ────┘  ──▶ join ──▶ slot removed
//! ```
//!
//! Cancellation is cooperative: the token is checked at every tick
//! boundary and wakes a sleeping task immediately, so `stop` returns as
//! soon as the current tick body finishes. Once `stop` returns the task
//! has run its last tick.

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};

use crate::config::TaskConfig;
use crate::drivers::task_pin::{spawn_on_core, Core};
use crate::error::SupervisorError;

/// Smallest stack the supervisor will hand to a task.
pub const MIN_STACK_KB: usize = 2;

/// Task table capacity.
pub const MAX_TASKS: usize = 4;

static NEXT_HANDLE_ID: AtomicU32 = AtomicU32::new(1);

// ═══════════════════════════════════════════════════════════════
//  Task contract
// ═══════════════════════════════════════════════════════════════

/// A unit of periodic work. The supervisor owns the value for the whole
/// life of the task and calls [`tick`](Self::tick) until stopped.
pub trait PeriodicTask: Send + 'static {
    /// Do one iteration and return how long to sleep before the next.
    fn tick(&mut self) -> Duration;

    /// Runs on the task's own thread after the last tick, before
    /// `stop` returns.
    fn on_stop(&mut self) {}
}

/// Scheduling parameters for [`TaskSupervisor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Null-terminated (e.g. `"indicator\0"`); doubles as the task identity.
    pub name: &'static str,
    pub stack_kb: usize,
    pub priority: u8,
    pub core: Core,
}

impl TaskSpec {
    pub const fn new(name: &'static str, config: TaskConfig) -> Self {
        Self {
            name,
            stack_kb: config.stack_kb,
            priority: config.priority,
            core: config.core,
        }
    }

    fn display_name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

/// Opaque reference to a started task. Stale handles are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u32);

// ═══════════════════════════════════════════════════════════════
//  Cancellation
// ═══════════════════════════════════════════════════════════════

/// One-shot stop signal shared between the supervisor and a task thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `pause` or until cancelled, whichever comes first.
    /// Returns `false` once cancelled. The mutex is released for the
    /// whole wait.
    pub fn sleep(&self, pause: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = cvar
            .wait_timeout_while(guard, pause, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*cancelled
    }
}

fn run_periodic<T: PeriodicTask>(mut task: T, token: &CancelToken) {
    while !token.is_cancelled() {
        let pause = task.tick();
        if !token.sleep(pause) {
            break;
        }
    }
    task.on_stop();
}

// ═══════════════════════════════════════════════════════════════
//  Supervisor
// ═══════════════════════════════════════════════════════════════

struct TaskSlot {
    handle: TaskHandle,
    name: &'static str,
    token: CancelToken,
    thread: JoinHandle<()>,
}

impl TaskSlot {
    fn shutdown(self) {
        self.token.cancel();
        if self.thread.join().is_err() {
            warn!("Supervisor: '{}' panicked before stopping", self.name);
        }
        info!("Supervisor: '{}' stopped", self.name);
    }
}

/// Creates, tracks and tears down periodic tasks. Dropping the
/// supervisor stops everything it started.
pub struct TaskSupervisor {
    slots: Vec<TaskSlot>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(MAX_TASKS),
        }
    }

    /// Start `task` on its own thread.
    ///
    /// If a task with the same name is already running, `task` is dropped
    /// and the existing handle is returned. A task whose thread has ended
    /// (it panicked) is reaped first, so it can be started again.
    pub fn start<T: PeriodicTask>(
        &mut self,
        task: T,
        spec: TaskSpec,
    ) -> Result<TaskHandle, SupervisorError> {
        self.reap_finished();

        let name = spec.display_name();
        if let Some(slot) = self.slots.iter().find(|s| s.name == name) {
            debug!("Supervisor: '{}' already running", name);
            return Ok(slot.handle);
        }
        if spec.stack_kb < MIN_STACK_KB {
            error!(
                "Supervisor: '{}' stack {}KB below minimum {}KB",
                name, spec.stack_kb, MIN_STACK_KB
            );
            return Err(SupervisorError::CreateFailed);
        }
        if self.slots.len() >= MAX_TASKS {
            error!("Supervisor: task table full, cannot start '{}'", name);
            return Err(SupervisorError::CreateFailed);
        }

        let token = CancelToken::new();
        let task_token = token.clone();
        let thread = spawn_on_core(spec.core, spec.priority, spec.stack_kb, spec.name, move || {
            run_periodic(task, &task_token);
        })?;

        let handle = TaskHandle(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed));
        self.slots.push(TaskSlot {
            handle,
            name,
            token,
            thread,
        });
        info!("Supervisor: '{}' started", name);
        Ok(handle)
    }

    /// Stop the task behind `handle` and wait for its thread to exit.
    /// Unknown or already-stopped handles are ignored.
    pub fn stop(&mut self, handle: TaskHandle) {
        match self.slots.iter().position(|s| s.handle == handle) {
            Some(idx) => self.slots.remove(idx).shutdown(),
            None => debug!("Supervisor: stop on inactive handle {:?}", handle),
        }
    }

    pub fn stop_all(&mut self) {
        while let Some(slot) = self.slots.pop() {
            slot.shutdown();
        }
    }

    pub fn is_running(&self, handle: TaskHandle) -> bool {
        self.slots
            .iter()
            .any(|s| s.handle == handle && !s.thread.is_finished())
    }

    /// Handle of the live task registered under `name` (with or without
    /// the trailing null).
    pub fn handle_of(&self, name: &str) -> Option<TaskHandle> {
        let name = name.trim_end_matches('\0');
        self.slots
            .iter()
            .find(|s| s.name == name && !s.thread.is_finished())
            .map(|s| s.handle)
    }

    pub fn running_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.thread.is_finished()).count()
    }

    fn reap_finished(&mut self) {
        let mut idx = 0;
        while idx < self.slots.len() {
            if self.slots[idx].thread.is_finished() {
                let slot = self.slots.remove(idx);
                warn!("Supervisor: '{}' exited on its own, reaping", slot.name);
                slot.shutdown();
            } else {
                idx += 1;
            }
        }
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
