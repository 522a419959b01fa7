//! Library interface for peerscan.
//!
//! All discovery and connection logic lives here so it runs on the host
//! under `cargo test` as well as on target.
//!
//! Usage: `cargo test --lib` (unit) or `cargo test` (unit + integration).
//!
//! Note: The embedded binary uses main.rs with #![no_std] and #![no_main]
//! and is only built with the `embedded` feature. It owns the SoftDevice
//! and feeds radio events into [`ble::session::SharedSession`].

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible in every module.
#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod error;

pub use ble::orchestrator::{ConnectRequest, ConnectionSlot};
pub use ble::radio::{Command, QueuedRadio, Radio, RadioEvent};
pub use ble::roster::{PeerRecord, Roster};
pub use ble::session::{Activity, BleSession, SharedSession};
pub use ble::{AddressKind, BdAddr};
pub use config::ScanSettings;
pub use error::{Error, GattStatus, RadioError};
