//! Core-pinned thread spawning for the ESP32 dual-core.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::Builder::spawn`
//! creates a FreeRTOS task pinned to a specific CPU core with explicit
//! priority and stack size. On non-ESP targets, falls back to a plain
//! thread spawn with the requested stack.
//!
//! # ESP-IDF Threading Model
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` call from
//! the calling thread. This means the config→spawn pair must not be
//! interleaved with other thread creation on the same thread.

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// CPU core identifiers for the ESP32 Xtensa LX6 dual-core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU). Bluedroid and the controller run here.
    Pro = 0,
    /// Core 1 (APP_CPU). Indicator and publisher tasks.
    App = 1,
}

/// Spawn a thread pinned to a specific core with explicit priority and stack.
///
/// `name` must be null-terminated (e.g. `"indicator\0"`); the terminator
/// is stripped for the Rust-side thread name.
///
/// Fails with [`SupervisorError::CreateFailed`] when the pthread config is
/// rejected or FreeRTOS cannot allocate the task.
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>, SupervisorError> {
    if !name.ends_with('\0') {
        log::error!("Task: name {:?} is not null-terminated", name);
        return Err(SupervisorError::CreateFailed);
    }

    // SAFETY: the default config is a plain C struct; `name` is a
    // 'static null-terminated string, so the pointer outlives the call.
    let ret = unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = i32::from(priority);
        cfg.stack_size = (stack_kb * 1024) as _;
        cfg.thread_name = name.as_ptr().cast();
        esp_idf_svc::sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_svc::sys::ESP_OK as i32 {
        log::error!("Task: esp_pthread_set_cfg failed: {}", ret);
        return Err(SupervisorError::CreateFailed);
    }

    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Task: spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .map_err(|e| {
            log::error!("Task: spawning '{}' failed: {}", display_name, e);
            SupervisorError::CreateFailed
        })
}

/// Simulation fallback: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>, SupervisorError> {
    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Task: spawning '{}' (sim, no core pinning, stack={}KB)",
        display_name,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
        .map_err(|e| {
            log::error!("Task: spawning '{}' (sim) failed: {}", display_name, e);
            SupervisorError::CreateFailed
        })
}
