//! Device name lookup over GATT.
//!
//! After a link opens:
//! 1. Negotiate the ATT MTU.
//! 2. Search for the Generic Access service (0x1800), remember its handle
//!    range.
//! 3. Look up the Device Name characteristic (0x2A00) in that range and
//!    read it if it is readable.
//! 4. Hand the value back to the caller.
//!
//! Each step is triggered by the radio event that completes the previous
//! one. Whatever the outcome, the caller tears the link down afterwards.

use crate::ble::radio::Radio;
use crate::ble::{HandleRange, Uuid};
use crate::config::{DEVICE_NAME_CHAR_UUID, GAP_SERVICE_UUID};
use crate::error::{Error, GattStatus};

/// Where the lookup currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    AwaitingMtu,
    Searching,
    Reading { handle: u16 },
}

/// Progress report from a lookup step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step<'a> {
    /// Waiting for the next radio event.
    Pending,
    /// The Device Name value arrived.
    Name(&'a [u8]),
    /// The lookup ended without a name.
    Failed(Error),
}

/// Lookup state for the one open link.
#[derive(Debug)]
pub struct NameLookup {
    conn_id: u16,
    stage: Stage,
    service: Option<HandleRange>,
    search_issued: bool,
}

impl NameLookup {
    /// Start on a freshly opened link by requesting an MTU exchange.
    ///
    /// If the radio refuses the MTU request the lookup goes straight to the
    /// service search.
    pub fn start<R: Radio>(conn_id: u16, radio: &mut R) -> (Self, Step<'static>) {
        let mut lookup = Self {
            conn_id,
            stage: Stage::AwaitingMtu,
            service: None,
            search_issued: false,
        };

        let step = match radio.request_mtu(conn_id) {
            Ok(()) => Step::Pending,
            Err(e) => {
                error!("config MTU error: {}", e);
                lookup.search(radio)
            }
        };
        (lookup, step)
    }

    pub fn conn_id(&self) -> u16 {
        self.conn_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Handle range of the Generic Access service, once found.
    pub fn service(&self) -> Option<HandleRange> {
        self.service
    }

    /// MTU exchange finished. Failure is not fatal; the search goes ahead
    /// with the default MTU.
    pub fn on_mtu<R: Radio>(
        &mut self,
        conn_id: u16,
        status: GattStatus,
        mtu: u16,
        radio: &mut R,
    ) -> Step<'static> {
        if conn_id != self.conn_id {
            return Step::Pending;
        }
        match status {
            GattStatus::Ok => debug!("MTU {} on conn_id {}", mtu, conn_id),
            status => error!("config MTU failed: {}", status),
        }
        self.search(radio)
    }

    /// The stack's own discovery after connecting finished. Kicks off the
    /// search if the MTU event has not done so already.
    pub fn on_discovery_complete<R: Radio>(
        &mut self,
        conn_id: u16,
        status: GattStatus,
        radio: &mut R,
    ) -> Step<'static> {
        if conn_id != self.conn_id {
            return Step::Pending;
        }
        if let Err(e) = status.into_result() {
            error!("discover service failed: {}", e);
            return Step::Pending;
        }
        self.search(radio)
    }

    /// One search result. Only the Generic Access service is kept.
    pub fn on_service_found(&mut self, conn_id: u16, uuid: Uuid, range: HandleRange) {
        if conn_id != self.conn_id || !uuid.is_16(GAP_SERVICE_UUID) {
            return;
        }
        debug!("service found, handles {}..{}", range.start, range.end);
        self.service = Some(range);
    }

    /// Service search finished: find the Device Name characteristic and
    /// read it.
    pub fn on_search_complete<R: Radio>(
        &mut self,
        conn_id: u16,
        status: GattStatus,
        radio: &mut R,
    ) -> Step<'static> {
        if conn_id != self.conn_id || self.stage != Stage::Searching {
            return Step::Pending;
        }
        match self.read_name(status, radio) {
            Ok(handle) => {
                self.stage = Stage::Reading { handle };
                Step::Pending
            }
            Err(e) => Step::Failed(e),
        }
    }

    /// Read response for the Device Name characteristic.
    pub fn on_read<'a>(
        &mut self,
        conn_id: u16,
        status: GattStatus,
        handle: u16,
        value: &'a [u8],
    ) -> Step<'a> {
        match self.stage {
            Stage::Reading { handle: expected } if conn_id == self.conn_id && handle == expected => {}
            _ => return Step::Pending,
        }
        if let Err(e) = status.into_result() {
            error!("read error: {}", e);
            return Step::Failed(e);
        }
        Step::Name(value)
    }

    fn search<R: Radio>(&mut self, radio: &mut R) -> Step<'static> {
        if self.search_issued {
            return Step::Pending;
        }
        self.search_issued = true;
        self.stage = Stage::Searching;
        match radio.search_service(self.conn_id, Uuid::Uuid16(GAP_SERVICE_UUID)) {
            Ok(()) => Step::Pending,
            Err(e) => {
                error!("search service error: {}", e);
                Step::Failed(e.into())
            }
        }
    }

    fn read_name<R: Radio>(&mut self, status: GattStatus, radio: &mut R) -> Result<u16, Error> {
        status.into_result()?;
        let range = self.service.ok_or(Error::ServiceNotFound)?;
        let characteristic = radio
            .characteristic_by_uuid(self.conn_id, range, Uuid::Uuid16(DEVICE_NAME_CHAR_UUID))?
            .ok_or(Error::CharacteristicNotFound)?;
        if !characteristic.properties.readable() {
            return Err(Error::NotReadable);
        }
        info!("reading device name, handle {}", characteristic.handle);
        radio.read_characteristic(self.conn_id, characteristic.handle)?;
        Ok(characteristic.handle)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
