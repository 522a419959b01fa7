//! Boundary to the radio stack.
//!
//! Outbound: the [`Radio`] trait. Every method is fire-and-forget; the
//! outcome arrives later as a [`RadioEvent`]. The one exception is
//! [`Radio::characteristic_by_uuid`], which queries the attribute cache the
//! stack already built during service search.
//!
//! Inbound: [`RadioEvent`], one variant per GAP / GATT client callback the
//! session cares about.

use heapless::{Deque, Vec};

use crate::ble::{AddressKind, BdAddr, CharacteristicInfo, HandleRange, Uuid};
use crate::config::ScanSettings;
use crate::error::{GattStatus, RadioError};

/// Commands the session issues to the radio.
pub trait Radio {
    fn set_scan_params(&mut self, settings: &ScanSettings) -> Result<(), RadioError>;

    /// Scan for `duration_secs` seconds (0 = until stopped).
    fn start_scan(&mut self, duration_secs: u32) -> Result<(), RadioError>;

    fn open(&mut self, address: BdAddr, kind: AddressKind) -> Result<(), RadioError>;

    fn disconnect(&mut self, address: BdAddr) -> Result<(), RadioError>;

    fn request_mtu(&mut self, conn_id: u16) -> Result<(), RadioError>;

    fn search_service(&mut self, conn_id: u16, uuid: Uuid) -> Result<(), RadioError>;

    /// Look up a characteristic in the cached attribute table of `range`.
    fn characteristic_by_uuid(
        &mut self,
        conn_id: u16,
        range: HandleRange,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicInfo>, RadioError>;

    fn read_characteristic(&mut self, conn_id: u16, handle: u16) -> Result<(), RadioError>;
}

/// Events delivered by the radio stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent<'a> {
    // GAP
    /// Scan parameters accepted (or rejected).
    ScanParamsSet { status: GattStatus },
    ScanStartComplete { status: GattStatus },
    /// One advertisement / scan response. Peers show up repeatedly.
    DeviceFound {
        address: BdAddr,
        kind: AddressKind,
        rssi: i8,
        adv_data: &'a [u8],
    },
    /// The scan window elapsed.
    ScanComplete,
    /// The scan was cancelled before the window elapsed.
    ScanCancelled,
    ScanStopComplete { status: GattStatus },

    // GATT client
    /// The GATT client application was registered with the stack.
    Registered { status: GattStatus, client_if: u8 },
    /// Link layer connection established.
    Connected { conn_id: u16, address: BdAddr },
    /// Result of an [`Radio::open`] request.
    Opened {
        status: GattStatus,
        conn_id: u16,
        address: BdAddr,
    },
    MtuConfigured {
        status: GattStatus,
        conn_id: u16,
        mtu: u16,
    },
    /// The stack finished its own attribute discovery after connecting.
    ServiceDiscoveryComplete { status: GattStatus, conn_id: u16 },
    /// One service matched a [`Radio::search_service`] request.
    ServiceFound {
        conn_id: u16,
        uuid: Uuid,
        range: HandleRange,
    },
    SearchComplete { status: GattStatus, conn_id: u16 },
    CharacteristicRead {
        status: GattStatus,
        conn_id: u16,
        handle: u16,
        value: &'a [u8],
    },
    Disconnected { address: BdAddr, reason: u8 },
}

/// An outbound command in value form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetScanParams(ScanSettings),
    StartScan { duration_secs: u32 },
    Open { address: BdAddr, kind: AddressKind },
    Disconnect { address: BdAddr },
    RequestMtu { conn_id: u16 },
    SearchService { conn_id: u16, uuid: Uuid },
    ReadCharacteristic { conn_id: u16, handle: u16 },
}

/// Maximum number of characteristics [`QueuedRadio`] keeps in its
/// attribute cache.
pub const ATTRIBUTE_CACHE_SIZE: usize = 4;

/// [`Radio`] that records commands in a bounded queue.
///
/// The firmware driver drains the queue and executes each command on the
/// real stack; tests inspect it directly. Characteristic lookups are
/// answered from an attribute cache filled with
/// [`QueuedRadio::cache_characteristic`].
pub struct QueuedRadio<const Q: usize> {
    pending: Deque<Command, Q>,
    attributes: Vec<CharacteristicInfo, ATTRIBUTE_CACHE_SIZE>,
    /// When set, every command is rejected with this error.
    reject: Option<RadioError>,
}

impl<const Q: usize> QueuedRadio<Q> {
    pub const fn new() -> Self {
        Self {
            pending: Deque::new(),
            attributes: Vec::new(),
            reject: None,
        }
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Pending commands, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.pending.iter()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Add an entry to the attribute cache. Oldest entry goes when full.
    pub fn cache_characteristic(&mut self, info: CharacteristicInfo) {
        if self.attributes.is_full() {
            self.attributes.remove(0);
        }
        let _ = self.attributes.push(info);
    }

    /// Forget the attribute table (the link went away).
    pub fn clear_attributes(&mut self) {
        self.attributes.clear();
    }

    /// Reject every following command with `error` (`None` to accept again).
    pub fn reject_with(&mut self, error: Option<RadioError>) {
        self.reject = error;
    }

    fn push(&mut self, command: Command) -> Result<(), RadioError> {
        if let Some(error) = self.reject {
            return Err(error);
        }
        self.pending.push_back(command).map_err(|_| RadioError::Busy)
    }
}

impl<const Q: usize> Default for QueuedRadio<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const Q: usize> Radio for QueuedRadio<Q> {
    fn set_scan_params(&mut self, settings: &ScanSettings) -> Result<(), RadioError> {
        self.push(Command::SetScanParams(*settings))
    }

    fn start_scan(&mut self, duration_secs: u32) -> Result<(), RadioError> {
        self.push(Command::StartScan { duration_secs })
    }

    fn open(&mut self, address: BdAddr, kind: AddressKind) -> Result<(), RadioError> {
        self.push(Command::Open { address, kind })
    }

    fn disconnect(&mut self, address: BdAddr) -> Result<(), RadioError> {
        self.push(Command::Disconnect { address })
    }

    fn request_mtu(&mut self, conn_id: u16) -> Result<(), RadioError> {
        self.push(Command::RequestMtu { conn_id })
    }

    fn search_service(&mut self, conn_id: u16, uuid: Uuid) -> Result<(), RadioError> {
        self.push(Command::SearchService { conn_id, uuid })
    }

    fn characteristic_by_uuid(
        &mut self,
        _conn_id: u16,
        range: HandleRange,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicInfo>, RadioError> {
        if let Some(error) = self.reject {
            return Err(error);
        }
        Ok(self
            .attributes
            .iter()
            .find(|c| c.uuid == uuid && range.contains(c.handle))
            .copied())
    }

    fn read_characteristic(&mut self, conn_id: u16, handle: u16) -> Result<(), RadioError> {
        self.push(Command::ReadCharacteristic { conn_id, handle })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
