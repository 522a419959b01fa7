//! Bluetooth Low Energy peer discovery.
//!
//! The radio runs in **Central** role and every result comes back as an
//! asynchronous event. This module turns those events into:
//!
//! 1. **Roster** - a bounded, deduplicated list of peers seen while scanning.
//! 2. **Scanner** - maps scan lifecycle events onto roster updates.
//! 3. **Orchestrator** - owns the single connection slot and walks the
//!    roster one peer at a time.
//! 4. **Name lookup** - reads the Device Name characteristic of the
//!    connected peer, then releases the link.
//!
//! [`session::BleSession`] ties them together behind one dispatch function.

pub mod adv_parser;
pub mod name_lookup;
pub mod orchestrator;
pub mod radio;
pub mod roster;
pub mod scanner;
pub mod session;

use core::fmt;

use heapless::String;

use crate::config::NAME_CAPACITY;

/// Display name of a peer, bounded to [`NAME_CAPACITY`] bytes.
pub type PeerName = String<NAME_CAPACITY>;

/// 6-byte Bluetooth device address, most significant byte first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build an address from a raw radio buffer.
    ///
    /// Panics if `raw` is not exactly 6 bytes: the radio layer never hands
    /// out anything else, so a mismatch is a broken contract.
    pub fn from_slice(raw: &[u8]) -> Self {
        assert_eq!(raw.len(), 6, "BLE address must be 6 bytes");
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(raw);
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BdAddr {
    fn format(&self, f: defmt::Formatter) {
        let b = &self.0;
        defmt::write!(
            f,
            "{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}",
            b[0],
            b[1],
            b[2],
            b[3],
            b[4],
            b[5]
        )
    }
}

/// Address type, needed to reopen a connection to the same peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    #[default]
    Public,
    Random,
    /// Resolvable private address with a public identity.
    RpaPublic,
    /// Resolvable private address with a random identity.
    RpaRandom,
}

impl AddressKind {
    /// Decode the HCI address type byte. Unknown values fall back to `Random`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => AddressKind::Public,
            0x01 => AddressKind::Random,
            0x02 => AddressKind::RpaPublic,
            0x03 => AddressKind::RpaRandom,
            _ => AddressKind::Random,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            AddressKind::Public => 0x00,
            AddressKind::Random => 0x01,
            AddressKind::RpaPublic => 0x02,
            AddressKind::RpaRandom => 0x03,
        }
    }
}

/// Attribute UUID as reported by service discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Uuid16(u16),
}

impl Uuid {
    pub fn is_16(&self, value: u16) -> bool {
        matches!(self, Uuid::Uuid16(v) if *v == value)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(v) => write!(f, "{:#06x}", v),
        }
    }
}

/// Inclusive attribute handle range of a discovered service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    /// Every valid attribute handle.
    pub const ALL: Self = Self {
        start: 0x0001,
        end: 0xFFFF,
    };

    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.start..=self.end).contains(&handle)
    }
}

/// Characteristic property bits (Core spec Vol 3, Part G, 3.3.1.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharProperties(pub u8);

impl CharProperties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_NO_RSP: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    pub fn readable(self) -> bool {
        self.0 & Self::READ != 0
    }
}

/// A characteristic found in the peer's attribute table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicInfo {
    /// Value handle, the one passed to reads.
    pub handle: u16,
    pub uuid: Uuid,
    pub properties: CharProperties,
}

/// Turn raw bytes from the air into a bounded display name.
///
/// Invalid UTF-8 is cut at the first bad sequence, and anything beyond
/// [`NAME_CAPACITY`] is dropped on a character boundary. Returns `None` when
/// nothing printable is left.
pub fn peer_name(raw: &[u8]) -> Option<PeerName> {
    let text = match core::str::from_utf8(raw) {
        Ok(text) => text,
        // Safe prefix: `valid_up_to` always lands on a char boundary.
        Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).ok()?,
    };
    let text = text.trim_end_matches('\0');

    let mut name = PeerName::new();
    for c in text.chars() {
        if name.push(c).is_err() {
            break;
        }
    }

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
