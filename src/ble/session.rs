//! The BLE session: one owned object holding the roster, the scan adapter,
//! the connection slot and the running name lookup.
//!
//! Every radio event goes through [`BleSession::handle`]. The firmware
//! wraps the session in a [`SharedSession`] so the radio task and the UI
//! can both reach it under one lock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::ble::name_lookup::{NameLookup, Step};
use crate::ble::orchestrator::{ConnectRequest, ConnectionSlot, OpenOutcome, Orchestrator};
use crate::ble::radio::{Radio, RadioEvent};
use crate::ble::roster::{NameUpdate, Observation, Roster};
use crate::ble::scanner::Scanner;
use crate::ble::BdAddr;
use crate::config::{ScanSettings, ROSTER_CAPACITY};
use crate::error::Error;

/// Coarse activity signal for status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Activity {
    /// A scan pass started.
    Scanning,
    /// A peer was seen for the first time.
    PeerDiscovered(BdAddr),
    /// A scan pass ended; `peers` survived the purge.
    ScanFinished { peers: usize },
    /// An open request went out.
    Connecting(BdAddr),
    /// The link to a peer is up.
    Connected(BdAddr),
    /// A name was read over GATT.
    NameResolved(BdAddr),
    /// The link (or attempt) ended and nothing else was started.
    LinkClosed(BdAddr),
    /// No candidate left.
    Idle,
}

/// Discovery and name-lookup state machine.
pub struct BleSession<const N: usize = ROSTER_CAPACITY> {
    roster: Roster<N>,
    scanner: Scanner,
    orchestrator: Orchestrator,
    lookup: Option<NameLookup>,
    client_if: Option<u8>,
    events: u32,
}

impl<const N: usize> BleSession<N> {
    pub const fn new(settings: ScanSettings) -> Self {
        Self {
            roster: Roster::new(),
            scanner: Scanner::new(settings),
            orchestrator: Orchestrator::new(),
            lookup: None,
            client_if: None,
            events: 0,
        }
    }

    pub fn roster(&self) -> &Roster<N> {
        &self.roster
    }

    /// Mutable roster access for external policy (e.g. clearing failures).
    pub fn roster_mut(&mut self) -> &mut Roster<N> {
        &mut self.roster
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn slot(&self) -> ConnectionSlot {
        self.orchestrator.slot()
    }

    pub fn lookup(&self) -> Option<&NameLookup> {
        self.lookup.as_ref()
    }

    /// Client interface assigned at registration.
    pub fn client_if(&self) -> Option<u8> {
        self.client_if
    }

    /// Number of radio events handled so far.
    pub fn event_count(&self) -> u32 {
        self.events
    }

    /// Start a new scan cycle. Refused while a pass is still running.
    pub fn request_scan<R: Radio>(&mut self, radio: &mut R) -> Result<(), Error> {
        self.scanner.request_scan(radio)
    }

    /// Move on to the next peer, tearing down the open link first if needed.
    pub fn request_connect<R: Radio>(&mut self, radio: &mut R) -> ConnectRequest {
        if let ConnectionSlot::Connected { address, .. } = self.orchestrator.slot() {
            if self.lookup.take().is_some() {
                // Abandoned lookup
                self.mark_name_failed(&address);
            }
        }
        self.orchestrator.on_connect_request(&mut self.roster, radio)
    }

    /// Apply one radio event.
    pub fn handle<R: Radio>(&mut self, event: RadioEvent<'_>, radio: &mut R) -> Option<Activity> {
        self.events = self.events.wrapping_add(1);

        match event {
            RadioEvent::Registered { status, client_if } => {
                if let Err(e) = status.into_result() {
                    error!("client registration failed: {}", e);
                    return None;
                }
                info!("registered, client_if {}", client_if);
                self.client_if = Some(client_if);
                self.scanner.request_scan(radio).ok();
                None
            }

            RadioEvent::ScanParamsSet { status } => self
                .scanner
                .on_params_set(status, &mut self.roster, radio)
                .ok()
                .map(|()| Activity::Scanning),

            RadioEvent::ScanStartComplete { status } => {
                self.scanner.on_start_complete(status).ok();
                None
            }

            RadioEvent::DeviceFound {
                address,
                kind,
                adv_data,
                ..
            } => match self
                .scanner
                .on_device_found(&mut self.roster, address, kind, adv_data)
            {
                Observation::New => Some(Activity::PeerDiscovered(address)),
                _ => None,
            },

            RadioEvent::ScanComplete | RadioEvent::ScanCancelled => self.on_scan_finished(radio),

            RadioEvent::ScanStopComplete { status } => {
                if let Err(e) = status.into_result() {
                    error!("scan stop failed: {}", e);
                }
                None
            }

            RadioEvent::Connected { conn_id, address } => {
                debug!("link layer up: {} conn_id {}", address, conn_id);
                None
            }

            RadioEvent::Opened {
                status,
                conn_id,
                address,
            } => self.on_opened(status.is_ok(), conn_id, address, radio),

            RadioEvent::MtuConfigured {
                status,
                conn_id,
                mtu,
            } => {
                let step = self.lookup.as_mut()?.on_mtu(conn_id, status, mtu, radio);
                self.on_step(step, radio)
            }

            RadioEvent::ServiceDiscoveryComplete { status, conn_id } => {
                let step = self
                    .lookup
                    .as_mut()?
                    .on_discovery_complete(conn_id, status, radio);
                self.on_step(step, radio)
            }

            RadioEvent::ServiceFound {
                conn_id,
                uuid,
                range,
            } => {
                self.lookup.as_mut()?.on_service_found(conn_id, uuid, range);
                None
            }

            RadioEvent::SearchComplete { status, conn_id } => {
                let step = self
                    .lookup
                    .as_mut()?
                    .on_search_complete(conn_id, status, radio);
                self.on_step(step, radio)
            }

            RadioEvent::CharacteristicRead {
                status,
                conn_id,
                handle,
                value,
            } => {
                let step = self.lookup.as_mut()?.on_read(conn_id, status, handle, value);
                self.on_step(step, radio)
            }

            RadioEvent::Disconnected { address, reason } => {
                info!("disconnected {}, reason {}", address, reason);
                self.on_disconnected(address, radio)
            }
        }
    }

    fn on_scan_finished<R: Radio>(&mut self, radio: &mut R) -> Option<Activity> {
        if !self.scanner.is_active() {
            warn!("scan end with no scan running");
            return None;
        }
        self.scanner.on_scan_finished(&mut self.roster);

        if self.orchestrator.slot().is_idle() {
            self.orchestrator.try_connect_next(&mut self.roster, radio);
        }
        Some(Activity::ScanFinished {
            peers: self.roster.size(),
        })
    }

    fn on_opened<R: Radio>(
        &mut self,
        success: bool,
        conn_id: u16,
        address: BdAddr,
        radio: &mut R,
    ) -> Option<Activity> {
        match self
            .orchestrator
            .on_open_result(&mut self.roster, radio, address, conn_id, success)
        {
            OpenOutcome::Connected { address, conn_id } => {
                let (lookup, step) = NameLookup::start(conn_id, radio);
                self.lookup = Some(lookup);
                self.on_step(step, radio);
                Some(Activity::Connected(address))
            }
            OpenOutcome::Failed { next, .. } => Some(next.map_or(Activity::Idle, Activity::Connecting)),
            OpenOutcome::Spurious => None,
        }
    }

    /// Act on a lookup step. A terminal step ends the lookup and releases
    /// the link.
    fn on_step<R: Radio>(&mut self, step: Step<'_>, radio: &mut R) -> Option<Activity> {
        let ConnectionSlot::Connected { address, .. } = self.orchestrator.slot() else {
            return None;
        };

        let activity = match step {
            Step::Pending => return None,
            Step::Name(value) => match self.roster.update_name(&address, Some(value)) {
                NameUpdate::Stored => {
                    info!(
                        "name of {}: {}",
                        address,
                        self.roster.get(&address).and_then(|r| r.name()).unwrap_or("")
                    );
                    Some(Activity::NameResolved(address))
                }
                NameUpdate::Missing => {
                    warn!("{}: {}", address, Error::EmptyName);
                    self.mark_name_failed(&address);
                    None
                }
                NameUpdate::UnknownPeer => {
                    warn!("{}: {}", address, Error::UnknownPeer);
                    None
                }
            },
            Step::Failed(e) => {
                warn!("name lookup for {} failed: {}", address, e);
                self.mark_name_failed(&address);
                None
            }
        };

        self.lookup = None;
        self.orchestrator.on_connect_request(&mut self.roster, radio);
        activity
    }

    fn on_disconnected<R: Radio>(&mut self, address: BdAddr, radio: &mut R) -> Option<Activity> {
        let ours = self.orchestrator.slot().address() == Some(address);
        if ours && self.lookup.take().is_some() {
            // Link lost mid-lookup
            self.mark_name_failed(&address);
        }

        match self
            .orchestrator
            .on_disconnect(&mut self.roster, radio, address)
        {
            Some(next) => Some(Activity::Connecting(next)),
            None if ours => Some(Activity::LinkClosed(address)),
            None => None,
        }
    }

    fn mark_name_failed(&mut self, address: &BdAddr) {
        if let Some(record) = self.roster.find_mut(address) {
            record.name_failed = true;
        }
    }
}

/// [`BleSession`] behind a critical-section lock, for sharing between the
/// radio task and the rest of the firmware.
pub struct SharedSession<const N: usize = ROSTER_CAPACITY> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<BleSession<N>>>,
}

impl<const N: usize> SharedSession<N> {
    pub const fn new(settings: ScanSettings) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(BleSession::new(settings))),
        }
    }

    pub fn handle<R: Radio>(&self, event: RadioEvent<'_>, radio: &mut R) -> Option<Activity> {
        self.with(|session| session.handle(event, radio))
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<T>(&self, f: impl FnOnce(&mut BleSession<N>) -> T) -> T {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
