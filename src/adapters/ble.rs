//! BLE radio adapter.
//!
//! Implements [`RadioPort`]: one primary GATT service with a single
//! read+write characteristic, LE Secure Connections pairing, and
//! connectable undirected advertising.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server driven through raw
//!   `esp_idf_svc::sys` calls.
//! - **all other targets**: an in-memory radio paired with a
//!   [`SimCentral`] that plays the remote side in host tests.
//!
//! ## GATT layout
//!
//! | Attribute      | UUID                                   | Perms               |
//! |----------------|----------------------------------------|---------------------|
//! | Service        | `12345678-1234-1234-1234-123456789abc` | primary             |
//! | Value          | `87654321-4321-4321-4321-abcdefabcdef` | Read+Write (enc)    |
//!
//! The advertisement carries the flags and the 128-bit service UUID; the
//! local name goes in the scan response (both together overflow 31 bytes).

use std::sync::Weak;

use log::info;

use crate::app::ports::{LinkEvents, RadioPort};
use crate::config::{PairingConfig, MAX_DEVICE_NAME_LEN};
#[cfg(not(target_os = "espidf"))]
use crate::config::{Passkey, MAX_PASSKEY};
use crate::error::LinkError;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// Largest characteristic value the server stores.
pub const MAX_VALUE_LEN: usize = 64;

/// GATTS application id registered with Bluedroid.
#[cfg(target_os = "espidf")]
const GATTS_APP_ID: u16 = 0x55;

/// Service + characteristic declaration + value.
#[cfg(target_os = "espidf")]
const SERVICE_HANDLE_COUNT: u16 = 4;

const ADV_CONFIG_FLAG: u8 = 1 << 0;
const SCAN_RSP_CONFIG_FLAG: u8 = 1 << 1;

/// Hands the one advertising start to whichever side gets there last: the
/// link asking to advertise, or the GAP handler reporting the final
/// payload SET_COMPLETE.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
struct AdvStartGate {
    /// Payloads still waiting for their SET_COMPLETE event.
    pending: core::sync::atomic::AtomicU8,
    /// A start was requested and nobody has issued it yet.
    deferred: core::sync::atomic::AtomicBool,
}

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
impl AdvStartGate {
    const fn new() -> Self {
        Self {
            pending: core::sync::atomic::AtomicU8::new(0),
            deferred: core::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Both payloads were submitted to the stack.
    fn arm(&self) {
        use core::sync::atomic::Ordering;
        self.pending
            .store(ADV_CONFIG_FLAG | SCAN_RSP_CONFIG_FLAG, Ordering::SeqCst);
    }

    /// Advertising requested. Returns `true` when the caller must start it
    /// now; otherwise the handler will.
    fn request(&self) -> bool {
        use core::sync::atomic::Ordering;
        // Publish the request before looking at the payload flags.
        self.deferred.store(true, Ordering::SeqCst);
        if self.pending.load(Ordering::SeqCst) != 0 {
            return false;
        }
        self.deferred.swap(false, Ordering::SeqCst)
    }

    /// The payload behind `flag` is set. Returns `true` when the handler
    /// must start advertising now.
    fn payload_set(&self, flag: u8) -> bool {
        use core::sync::atomic::Ordering;
        let before = self.pending.fetch_and(!flag, Ordering::SeqCst);
        before & !flag == 0 && self.deferred.swap(false, Ordering::SeqCst)
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF static state
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, PoisonError};

#[cfg(target_os = "espidf")]
use log::{error, warn};

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
/// Zero until ADD_CHAR_EVT reports the value handle.
#[cfg(target_os = "espidf")]
static BLE_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_ADV_GATE: AdvStartGate = AdvStartGate::new();
/// Request encryption with MITM on connect.
#[cfg(target_os = "espidf")]
static BLE_REQUIRE_MITM: AtomicBool = AtomicBool::new(true);

#[cfg(target_os = "espidf")]
static BLE_EVENT_SINK: Mutex<Option<Weak<dyn LinkEvents>>> = Mutex::new(None);

#[cfg(target_os = "espidf")]
struct GattLayout {
    service_uuid: u128,
    characteristic_uuid: u128,
    initial: heapless::Vec<u8, MAX_VALUE_LEN>,
    perm: u16,
}

#[cfg(target_os = "espidf")]
static BLE_GATT_LAYOUT: Mutex<Option<GattLayout>> = Mutex::new(None);

/// Run `f` against the registered link, if it is still alive. The sink
/// lock is released before `f` runs.
#[cfg(target_os = "espidf")]
fn with_event_sink(f: impl FnOnce(&dyn LinkEvents)) {
    let sink = BLE_EVENT_SINK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .and_then(Weak::upgrade);
    match sink {
        Some(sink) => f(&*sink),
        None => warn!("BLE: event dropped, link gone"),
    }
}

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    unsafe {
        t.uuid.uuid128 = uuid.to_le_bytes();
    }
    t
}

#[cfg(target_os = "espidf")]
fn esp_check(ret: esp_idf_svc::sys::esp_err_t, what: &str) -> Result<(), LinkError> {
    if ret == esp_idf_svc::sys::ESP_OK as i32 {
        Ok(())
    } else {
        error!("BLE: {} failed ({})", what, ret);
        Err(LinkError::InitFailed)
    }
}

#[cfg(target_os = "espidf")]
unsafe fn set_sm_param<T>(param: esp_idf_svc::sys::esp_ble_sm_param_t, value: &T) -> esp_idf_svc::sys::esp_err_t {
    // SAFETY: Bluedroid copies `len` bytes out of `value` before returning.
    unsafe {
        esp_idf_svc::sys::esp_ble_gap_set_security_param(
            param,
            (value as *const T).cast_mut().cast(),
            core::mem::size_of::<T>() as u8,
        )
    }
}

#[cfg(target_os = "espidf")]
unsafe fn request_advertising() -> esp_idf_svc::sys::esp_err_t {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe { esp_ble_gap_start_advertising(&mut adv_params) }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT
        | esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RSP_DATA_SET_COMPLETE_EVT => {
            let flag = if event == esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT {
                ADV_CONFIG_FLAG
            } else {
                SCAN_RSP_CONFIG_FLAG
            };
            if BLE_ADV_GATE.payload_set(flag) {
                let ret = unsafe { request_advertising() };
                if ret != ESP_OK as i32 {
                    error!("BLE GAP: deferred advertising start failed ({})", ret);
                }
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status == esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                info!("BLE GAP: advertising started");
            } else {
                error!("BLE GAP: advertising start failed (status={})", status);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => unsafe {
            esp_ble_gap_security_rsp((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), true);
        },
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_NOTIF_EVT => {
            let passkey = unsafe { (*param).ble_security.key_notif.passkey };
            with_event_sink(|sink| sink.on_passkey_display(passkey));
        }
        // Only display-only and no-I/O pairing is offered, so neither of
        // these should arrive. Refuse instead of letting SMP time out.
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_NC_REQ_EVT => unsafe {
            warn!("BLE GAP: numeric comparison not supported, rejecting");
            esp_ble_confirm_reply((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), false);
        },
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_REQ_EVT => unsafe {
            warn!("BLE GAP: passkey entry not supported, rejecting");
            esp_ble_passkey_reply((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), false, 0);
        },
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
            let p = unsafe { &(*param).ble_security.auth_cmpl };
            if !p.success {
                warn!("BLE GAP: pairing failed (reason=0x{:x})", p.fail_reason);
            }
            with_event_sink(|sink| sink.on_auth_complete(p.success));
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            BLE_GATTS_IF.store(u32::from(gatts_if), AtomicOrdering::Relaxed);
            info!("BLE GATTS: app registered (if={})", gatts_if);
            let layout = BLE_GATT_LAYOUT.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(layout) = layout.as_ref() else {
                error!("BLE GATTS: registered without a service layout");
                return;
            };
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid128_to_esp(layout.service_uuid),
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, SERVICE_HANDLE_COUNT) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let p = unsafe { &(*param).create };
            if p.status != esp_gatt_status_t_ESP_GATT_OK {
                error!("BLE GATTS: service creation failed (status={})", p.status);
                return;
            }
            let svc_handle = p.service_handle;
            BLE_SVC_HANDLE.store(u32::from(svc_handle), AtomicOrdering::Relaxed);
            info!("BLE GATTS: service created (handle={})", svc_handle);
            unsafe { esp_ble_gatts_start_service(svc_handle) };

            let mut layout = BLE_GATT_LAYOUT.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(layout) = layout.as_mut() else {
                return;
            };
            let mut char_uuid = uuid128_to_esp(layout.characteristic_uuid);
            let mut value = esp_attr_value_t {
                attr_max_len: MAX_VALUE_LEN as u16,
                attr_len: layout.initial.len() as u16,
                attr_value: layout.initial.as_mut_ptr(),
            };
            let mut control = esp_attr_control_t {
                auto_rsp: ESP_GATT_AUTO_RSP as u8,
            };
            // SAFETY: Bluedroid deep-copies the value and control blocks.
            unsafe {
                esp_ble_gatts_add_char(
                    svc_handle,
                    &mut char_uuid,
                    layout.perm as esp_gatt_perm_t,
                    (ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_WRITE) as esp_gatt_char_prop_t,
                    &mut value,
                    &mut control,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let p = unsafe { &(*param).add_char };
            if p.status == esp_gatt_status_t_ESP_GATT_OK {
                BLE_CHAR_HANDLE.store(u32::from(p.attr_handle), AtomicOrdering::Release);
                info!("BLE GATTS: value characteristic ready (handle={})", p.attr_handle);
            } else {
                error!("BLE GATTS: characteristic creation failed (status={})", p.status);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &mut (*param).connect };
            info!("BLE GATTS: central connected (conn_id={})", p.conn_id);
            if BLE_REQUIRE_MITM.load(AtomicOrdering::Relaxed) {
                unsafe {
                    esp_ble_set_encryption(
                        p.remote_bda.as_mut_ptr(),
                        esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT_MITM,
                    );
                }
            }
            with_event_sink(|sink| sink.on_connect());
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let reason = unsafe { (*param).disconnect.reason };
            info!("BLE GATTS: central disconnected (reason=0x{:x})", reason);
            with_event_sink(|sink| sink.on_disconnect());
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation: the remote central
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimAirState {
    device_name: String,
    stack_up: bool,
    service: Option<(u128, u128)>,
    value: Vec<u8>,
    pairing: Option<PairingConfig>,
    /// Passkey the peripheral showed for the pairing in progress.
    pending_passkey: Option<u32>,
    advertising: bool,
    connected: bool,
}

#[cfg(not(target_os = "espidf"))]
fn sim_random_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    RandomState::new().build_hasher().finish() as u32
}

/// The far side of a simulated radio: a scripted central plus
/// fault-injection knobs. Obtain one with [`BleRadio::central`].
#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
pub struct SimCentral {
    air: Mutex<SimAirState>,
    events: Mutex<Option<Weak<dyn LinkEvents>>>,
    advertising_starts: AtomicU32,
    fail_init: AtomicBool,
    fail_advertising: AtomicBool,
    fail_writes: AtomicBool,
}

#[cfg(not(target_os = "espidf"))]
impl SimCentral {
    fn air(&self) -> MutexGuard<'_, SimAirState> {
        self.air.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callbacks run with no simulator lock held, as Bluedroid delivers
    // them from its own task.
    fn deliver(&self, f: impl FnOnce(&dyn LinkEvents)) {
        let sink = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(sink) = sink {
            f(&*sink);
        }
    }

    /// Connect to the advertiser. Returns `false` (no callback) when the
    /// peripheral is not advertising.
    pub fn connect(&self) -> bool {
        {
            let mut air = self.air();
            if !air.advertising {
                return false;
            }
            air.advertising = false;
            air.connected = true;
        }
        self.deliver(|sink| sink.on_connect());
        true
    }

    /// Drop the link. The callback fires even if nothing was connected,
    /// matching a stack that reports a stale disconnect.
    pub fn disconnect(&self) {
        self.air().connected = false;
        self.deliver(|sink| sink.on_disconnect());
    }

    pub fn complete_pairing(&self, success: bool) {
        self.deliver(|sink| sink.on_auth_complete(success));
    }

    /// Start passkey-entry pairing. When the configured security needs
    /// MITM protection the peripheral picks the passkey (the fixed one, or
    /// a fresh random one), displays it, and the passkey is returned.
    /// `None` means the configuration pairs without a passkey.
    pub fn begin_pairing(&self) -> Option<u32> {
        let passkey = {
            let mut air = self.air();
            let pairing = air.pairing?;
            if !pairing.auth.requires_mitm() {
                return None;
            }
            let passkey = pairing
                .passkey
                .map_or_else(|| sim_random_u32() % (MAX_PASSKEY + 1), Passkey::value);
            air.pending_passkey = Some(passkey);
            passkey
        };
        self.deliver(|sink| sink.on_passkey_display(passkey));
        Some(passkey)
    }

    /// Type `entered` on the central to finish a pairing started with
    /// [`begin_pairing`](Self::begin_pairing). Returns whether it matched.
    pub fn enter_passkey(&self, entered: u32) -> bool {
        let success = self.air().pending_passkey.take() == Some(entered);
        self.deliver(|sink| sink.on_auth_complete(success));
        success
    }

    /// Read the characteristic the way a central would.
    pub fn read(&self) -> Option<Vec<u8>> {
        let air = self.air();
        air.service.map(|_| air.value.clone())
    }

    pub fn is_advertising(&self) -> bool {
        self.air().advertising
    }

    pub fn is_connected(&self) -> bool {
        self.air().connected
    }

    pub fn advertising_starts(&self) -> u32 {
        self.advertising_starts.load(AtomicOrdering::Relaxed)
    }

    pub fn advertised_name(&self) -> String {
        self.air().device_name.clone()
    }

    pub fn service(&self) -> Option<(u128, u128)> {
        self.air().service
    }

    pub fn pairing(&self) -> Option<PairingConfig> {
        self.air().pairing
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, AtomicOrdering::Relaxed);
    }

    pub fn fail_advertising(&self, fail: bool) {
        self.fail_advertising.store(fail, AtomicOrdering::Relaxed);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::Relaxed);
    }
}

// ───────────────────────────────────────────────────────────────
// BLE radio
// ───────────────────────────────────────────────────────────────

pub struct BleRadio {
    /// Characteristic permissions chosen by `configure_security`.
    #[cfg(target_os = "espidf")]
    char_perm: u16,
    #[cfg(not(target_os = "espidf"))]
    central: Arc<SimCentral>,
}

impl Default for BleRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl BleRadio {
    #[cfg(target_os = "espidf")]
    pub fn new() -> Self {
        Self {
            char_perm: (esp_idf_svc::sys::ESP_GATT_PERM_READ_ENC_MITM
                | esp_idf_svc::sys::ESP_GATT_PERM_WRITE_ENC_MITM) as u16,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            central: Arc::new(SimCentral::default()),
        }
    }

    /// Handle on the simulated remote side.
    #[cfg(not(target_os = "espidf"))]
    pub fn central(&self) -> Arc<SimCentral> {
        Arc::clone(&self.central)
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_init(&mut self, device_name: &str) -> Result<(), LinkError> {
        use esp_idf_svc::sys::*;

        let mut name = heapless::String::<{ MAX_DEVICE_NAME_LEN + 1 }>::new();
        name.push_str(device_name)
            .and_then(|()| name.push('\0'))
            .map_err(|()| LinkError::InitFailed)?;

        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            esp_check(esp_bt_controller_init(&mut bt_cfg), "bt_controller_init")?;
            esp_check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE), "bt_controller_enable")?;
            esp_check(esp_bluedroid_init(), "bluedroid_init")?;
            esp_check(esp_bluedroid_enable(), "bluedroid_enable")?;

            esp_check(esp_ble_gap_register_callback(Some(ble_gap_event_handler)), "gap_register_callback")?;
            esp_check(
                esp_ble_gatts_register_callback(Some(ble_gatts_event_handler)),
                "gatts_register_callback",
            )?;
            esp_check(esp_ble_gap_set_device_name(name.as_ptr().cast()), "set_device_name")?;
        }
        info!("BLE(espidf): Bluedroid up as '{}'", device_name);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_init(&mut self, device_name: &str) -> Result<(), LinkError> {
        if self.central.fail_init.load(AtomicOrdering::Relaxed) {
            log::error!("BLE(sim): injected init failure");
            return Err(LinkError::InitFailed);
        }
        let mut air = self.central.air();
        air.stack_up = true;
        air.device_name = device_name.to_owned();
        info!("BLE(sim): stack up as '{}'", device_name);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_configure_security(&mut self, pairing: &PairingConfig) -> Result<(), LinkError> {
        use esp_idf_svc::sys::*;

        let auth_req: esp_ble_auth_req_t = pairing.auth.bits();
        let iocap: esp_ble_io_cap_t = pairing.io_capability.code();
        let key_size: u8 = pairing.max_key_size;
        let init_key: u8 = pairing.init_keys.bits();
        let rsp_key: u8 = pairing.rsp_keys.bits();
        let mitm = pairing.auth.requires_mitm();
        let only_specified: u8 = if mitm {
            ESP_BLE_ONLY_ACCEPT_SPECIFIED_AUTH_ENABLE as u8
        } else {
            ESP_BLE_ONLY_ACCEPT_SPECIFIED_AUTH_DISABLE as u8
        };

        unsafe {
            esp_check(set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE, &auth_req), "sm auth mode")?;
            esp_check(set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE, &iocap), "sm iocap")?;
            esp_check(set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE, &key_size), "sm key size")?;
            esp_check(set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY, &init_key), "sm init key")?;
            esp_check(set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY, &rsp_key), "sm rsp key")?;
            esp_check(
                set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_ONLY_ACCEPT_SPECIFIED_SEC_AUTH, &only_specified),
                "sm only accept specified",
            )?;
            if let Some(passkey) = pairing.passkey {
                let value: u32 = passkey.value();
                esp_check(set_sm_param(esp_ble_sm_param_t_ESP_BLE_SM_SET_STATIC_PASSKEY, &value), "sm passkey")?;
            }
        }

        self.char_perm = if mitm {
            (ESP_GATT_PERM_READ_ENC_MITM | ESP_GATT_PERM_WRITE_ENC_MITM) as u16
        } else {
            (ESP_GATT_PERM_READ_ENCRYPTED | ESP_GATT_PERM_WRITE_ENCRYPTED) as u16
        };
        BLE_REQUIRE_MITM.store(mitm, AtomicOrdering::Relaxed);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_configure_security(&mut self, pairing: &PairingConfig) -> Result<(), LinkError> {
        self.central.air().pairing = Some(*pairing);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_create_service(
        &mut self,
        service_uuid: u128,
        characteristic_uuid: u128,
        initial: heapless::Vec<u8, MAX_VALUE_LEN>,
    ) -> Result<(), LinkError> {
        use esp_idf_svc::sys::*;

        *BLE_GATT_LAYOUT.lock().unwrap_or_else(PoisonError::into_inner) = Some(GattLayout {
            service_uuid,
            characteristic_uuid,
            initial,
            perm: self.char_perm,
        });

        let mut uuid = service_uuid.to_le_bytes();
        let mut adv_data = esp_ble_adv_data_t {
            set_scan_rsp: false,
            include_name: false,
            include_txpower: false,
            service_uuid_len: uuid.len() as u16,
            p_service_uuid: uuid.as_mut_ptr(),
            flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
            ..unsafe { core::mem::zeroed() }
        };
        let mut scan_rsp = esp_ble_adv_data_t {
            set_scan_rsp: true,
            include_name: true,
            ..unsafe { core::mem::zeroed() }
        };

        BLE_ADV_GATE.arm();
        unsafe {
            // SAFETY: Bluedroid deep-copies both payloads.
            esp_check(esp_ble_gap_config_adv_data(&mut adv_data), "config_adv_data")?;
            esp_check(esp_ble_gap_config_adv_data(&mut scan_rsp), "config_scan_rsp")?;
            esp_check(esp_ble_gatts_app_register(GATTS_APP_ID), "gatts_app_register")?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_create_service(
        &mut self,
        service_uuid: u128,
        characteristic_uuid: u128,
        initial: heapless::Vec<u8, MAX_VALUE_LEN>,
    ) -> Result<(), LinkError> {
        let mut air = self.central.air();
        if !air.stack_up {
            return Err(LinkError::InitFailed);
        }
        air.service = Some((service_uuid, characteristic_uuid));
        air.value = initial.to_vec();
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_start_advertising(&mut self) -> Result<(), LinkError> {
        if !BLE_ADV_GATE.request() {
            // Started from the GAP handler once both payloads are set.
            return Ok(());
        }
        esp_check(unsafe { request_advertising() }, "start_advertising")
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start_advertising(&mut self) -> Result<(), LinkError> {
        if self.central.fail_advertising.load(AtomicOrdering::Relaxed) {
            return Err(LinkError::InitFailed);
        }
        let mut air = self.central.air();
        if !air.stack_up {
            return Err(LinkError::InitFailed);
        }
        air.advertising = true;
        self.central.advertising_starts.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_has_characteristic(&self) -> bool {
        BLE_CHAR_HANDLE.load(AtomicOrdering::Acquire) != 0
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_has_characteristic(&self) -> bool {
        self.central.air().service.is_some()
    }

    #[cfg(target_os = "espidf")]
    fn platform_write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let handle = BLE_CHAR_HANDLE.load(AtomicOrdering::Acquire) as u16;
        let ret = unsafe {
            esp_idf_svc::sys::esp_ble_gatts_set_attr_value(handle, data.len() as u16, data.as_ptr())
        };
        if ret == esp_idf_svc::sys::ESP_OK as i32 {
            Ok(())
        } else {
            warn!("BLE: set_attr_value failed ({})", ret);
            Err(LinkError::WriteFailed)
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if self.central.fail_writes.load(AtomicOrdering::Relaxed) {
            return Err(LinkError::WriteFailed);
        }
        let mut air = self.central.air();
        air.value.clear();
        air.value.extend_from_slice(data);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// RadioPort implementation
// ───────────────────────────────────────────────────────────────

impl RadioPort for BleRadio {
    fn init(&mut self, device_name: &str, events: Weak<dyn LinkEvents>) -> Result<(), LinkError> {
        if device_name.is_empty() || device_name.len() > MAX_DEVICE_NAME_LEN {
            log::error!("BLE: device name must be 1..={} bytes", MAX_DEVICE_NAME_LEN);
            return Err(LinkError::InitFailed);
        }
        #[cfg(target_os = "espidf")]
        {
            *BLE_EVENT_SINK.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        }
        #[cfg(not(target_os = "espidf"))]
        {
            *self.central.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        }
        self.platform_init(device_name)
    }

    fn configure_security(&mut self, pairing: &PairingConfig) -> Result<(), LinkError> {
        self.platform_configure_security(pairing)?;
        info!(
            "BLE: security set (auth=0x{:02x}, io_cap={}, keys={:02x}/{:02x}, max_key={})",
            pairing.auth.bits(),
            pairing.io_capability.code(),
            pairing.init_keys.bits(),
            pairing.rsp_keys.bits(),
            pairing.max_key_size,
        );
        Ok(())
    }

    fn create_service(
        &mut self,
        service_uuid: u128,
        characteristic_uuid: u128,
        initial: &[u8],
    ) -> Result<(), LinkError> {
        let initial = heapless::Vec::from_slice(initial).map_err(|()| {
            log::error!("BLE: initial value exceeds {} bytes", MAX_VALUE_LEN);
            LinkError::InitFailed
        })?;
        self.platform_create_service(service_uuid, characteristic_uuid, initial)?;
        info!("BLE: service {:032x} registered", service_uuid);
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), LinkError> {
        self.platform_start_advertising()
    }

    fn has_characteristic(&self) -> bool {
        self.platform_has_characteristic()
    }

    fn write_characteristic(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if data.len() > MAX_VALUE_LEN {
            return Err(LinkError::WriteFailed);
        }
        self.platform_write(data)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
