//! BLE GAP scan adapter - maps scan lifecycle events onto the roster.
//!
//! One scan cycle:
//! parameters set → `begin_scan_pass` + start scan → device found (many) →
//! complete / cancelled → `purge`.
//!
//! A new cycle is refused until the previous one has been purged, since
//! `begin_scan_pass` would otherwise wipe visibility the purge still needs.

use crate::ble::adv_parser::local_name;
use crate::ble::radio::Radio;
use crate::ble::roster::{Observation, Roster};
use crate::ble::{AddressKind, BdAddr};
use crate::config::ScanSettings;
use crate::error::{Error, GattStatus, RadioError};

/// Scan cycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanState {
    #[default]
    Stopped,
    /// Scan parameters sent, waiting for the stack to accept them.
    Configuring,
    /// Scan start requested.
    Starting,
    Scanning,
}

/// Scan event adapter.
#[derive(Debug)]
pub struct Scanner {
    settings: ScanSettings,
    state: ScanState,
    passes: u32,
}

impl Scanner {
    pub const fn new(settings: ScanSettings) -> Self {
        Self {
            settings,
            state: ScanState::Stopped,
            passes: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Completed scan passes so far.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn is_active(&self) -> bool {
        self.state != ScanState::Stopped
    }

    /// Begin a new scan cycle by sending the scan parameters.
    pub fn request_scan<R: Radio>(&mut self, radio: &mut R) -> Result<(), Error> {
        if self.is_active() {
            warn!("scan already in progress");
            return Err(Error::Radio(RadioError::Busy));
        }
        radio.set_scan_params(&self.settings).map_err(|e| {
            error!("set scan params error: {}", e);
            Error::from(e)
        })?;
        self.state = ScanState::Configuring;
        Ok(())
    }

    /// Parameters accepted: reset visibility and start the scan.
    pub fn on_params_set<R: Radio, const N: usize>(
        &mut self,
        status: GattStatus,
        roster: &mut Roster<N>,
        radio: &mut R,
    ) -> Result<(), Error> {
        if matches!(self.state, ScanState::Starting | ScanState::Scanning) {
            warn!("scan params set during a scan pass, ignored");
            return Err(Error::Radio(RadioError::InvalidState));
        }
        if let Err(e) = status.into_result() {
            error!("set scan params failed: {}", e);
            self.state = ScanState::Stopped;
            return Err(e);
        }

        roster.begin_scan_pass();
        match radio.start_scan(self.settings.duration_secs) {
            Ok(()) => {
                self.state = ScanState::Starting;
                Ok(())
            }
            Err(e) => {
                error!("start scan error: {}", e);
                self.state = ScanState::Stopped;
                Err(e.into())
            }
        }
    }

    pub fn on_start_complete(&mut self, status: GattStatus) -> Result<(), Error> {
        match status.into_result() {
            Ok(()) => {
                debug!("scan start success");
                self.state = ScanState::Scanning;
                Ok(())
            }
            Err(e) => {
                error!("scan start failed: {}", e);
                self.state = ScanState::Stopped;
                Err(e)
            }
        }
    }

    /// A device was seen. Duplicates are expected and folded by the roster.
    pub fn on_device_found<const N: usize>(
        &mut self,
        roster: &mut Roster<N>,
        address: BdAddr,
        kind: AddressKind,
        adv_data: &[u8],
    ) -> Observation {
        let observation = roster.observe(address, kind, local_name(adv_data));
        match observation {
            Observation::New => debug!("discovered {} ({} total)", address, roster.size()),
            Observation::Dropped => warn!("roster full, dropping {}", address),
            Observation::AlreadySeen => {}
        }
        observation
    }

    /// The pass ended (window elapsed or cancelled): purge unseen peers.
    ///
    /// Returns the number of peers removed.
    pub fn on_scan_finished<const N: usize>(&mut self, roster: &mut Roster<N>) -> usize {
        let removed = roster.purge();
        self.state = ScanState::Stopped;
        self.passes = self.passes.wrapping_add(1);
        info!(
            "BLE scan complete or cancelled - {} peers, {} purged",
            roster.size(),
            removed
        );
        roster.dump_to_log();
        removed
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
