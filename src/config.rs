//! Application-wide constants and compile-time configuration.
//!
//! All roster sizing, scan timing and protocol constants live here so they
//! can be tuned in one place.

// Roster

/// Maximum number of distinct peers remembered at once.
pub const ROSTER_CAPACITY: usize = 100;

/// Maximum stored length of a peer's display name (bytes).
pub const NAME_CAPACITY: usize = 32;

// Scanning

/// Duration of one scan pass (seconds). 0 = scan continuously.
pub const SCAN_DURATION_SECS: u32 = 30;

/// Scan interval (in 0.625 ms units). 0x50 = 50 ms.
pub const SCAN_INTERVAL: u16 = 0x50;

/// Scan window (in 0.625 ms units). 0x30 = 30 ms.
pub const SCAN_WINDOW: u16 = 0x30;

/// Delay between the end of one scan cycle and the next (firmware only).
pub const RESCAN_INTERVAL_SECS: u64 = 120;

// Connection

/// Local ATT MTU offered during negotiation.
pub const LOCAL_MTU: u16 = 500;

/// Give up on an outstanding connection attempt after this long
/// (in 10 ms units, used by the firmware driver). 500 = 5 s.
pub const CONNECT_TIMEOUT: u16 = 500;

// GPIO pin assignments (nRF52840-DK defaults)
//
// Actual `embassy_nrf::peripherals::*` pins are picked in `main.rs`.
//
//   Button RESCAN  → P0.11
//   Status LED     → P0.13 (active-low)

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

// Protocol constants

/// Generic Access service.
pub const GAP_SERVICE_UUID: u16 = 0x1800;

/// Device Name characteristic inside the Generic Access service.
pub const DEVICE_NAME_CHAR_UUID: u16 = 0x2A00;

/// Runtime scan parameters handed to the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanSettings {
    /// Scan pass length in seconds, 0 for continuous.
    pub duration_secs: u32,
    pub interval: u16,
    pub window: u16,
    /// Active scanning requests scan responses (which usually carry the name).
    pub active: bool,
}

impl ScanSettings {
    pub const DEFAULT: Self = Self {
        duration_secs: SCAN_DURATION_SECS,
        interval: SCAN_INTERVAL,
        window: SCAN_WINDOW,
        active: true,
    };

    pub fn is_continuous(&self) -> bool {
        self.duration_secs == 0
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}
