//! Single-slot connection orchestrator.
//!
//! Only one link exists at a time. The slot is the source of truth for
//! which peer owns it; the `connecting` / `connected` flags on roster
//! records mirror it so the roster alone can answer "who is busy".
//!
//! Failure flags are monotonic: once a peer fails it is never picked again
//! (until an external [`Roster::clear_failures`]).

use crate::ble::radio::Radio;
use crate::ble::roster::{PeerRecord, Roster};
use crate::ble::BdAddr;

/// State of the one connection slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionSlot {
    #[default]
    Idle,
    /// Open request issued, no result yet.
    Attempting(BdAddr),
    /// Link open.
    Connected { address: BdAddr, conn_id: u16 },
}

impl ConnectionSlot {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionSlot::Idle)
    }

    pub fn address(&self) -> Option<BdAddr> {
        match self {
            ConnectionSlot::Idle => None,
            ConnectionSlot::Attempting(address) => Some(*address),
            ConnectionSlot::Connected { address, .. } => Some(*address),
        }
    }
}

/// What [`Orchestrator::on_connect_request`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectRequest {
    /// The open link is being torn down; the next attempt follows its
    /// disconnect event.
    Disconnecting(BdAddr),
    /// A new open request was issued.
    Attempting(BdAddr),
    /// An attempt is already outstanding.
    Busy,
    /// No eligible peer left.
    Exhausted,
}

/// Result of [`Orchestrator::on_open_result`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenOutcome {
    /// Link is up; name lookup can start.
    Connected { address: BdAddr, conn_id: u16 },
    /// The attempt failed; `next` is the follow-up attempt, if any.
    Failed { address: BdAddr, next: Option<BdAddr> },
    /// No matching attempt outstanding.
    Spurious,
}

/// Drives connection attempts over the roster.
#[derive(Debug, Default)]
pub struct Orchestrator {
    slot: ConnectionSlot,
}

impl Orchestrator {
    pub const fn new() -> Self {
        Self {
            slot: ConnectionSlot::Idle,
        }
    }

    pub fn slot(&self) -> ConnectionSlot {
        self.slot
    }

    /// The hardware link is open (as opposed to merely being attempted).
    pub fn is_link_open(&self) -> bool {
        matches!(self.slot, ConnectionSlot::Connected { .. })
    }

    /// First eligible peer in discovery order.
    pub fn select_next_candidate<const N: usize>(roster: &Roster<N>) -> Option<&PeerRecord> {
        roster.first_candidate()
    }

    /// Issue one open request to the next candidate.
    ///
    /// No-op while the slot is busy. A peer whose open request the radio
    /// rejects outright is marked failed and the next one is tried, so at
    /// most one request ends up outstanding.
    pub fn try_connect_next<R: Radio, const N: usize>(
        &mut self,
        roster: &mut Roster<N>,
        radio: &mut R,
    ) -> Option<BdAddr> {
        if !self.slot.is_idle() || roster.any_connecting() {
            debug!("connect skipped, slot busy");
            return None;
        }

        loop {
            let (address, kind) = {
                let candidate = Self::select_next_candidate(roster)?;
                (candidate.address, candidate.address_kind)
            };

            info!("connecting to {}", address);
            match radio.open(address, kind) {
                Ok(()) => {
                    if let Some(record) = roster.find_mut(&address) {
                        record.connecting = true;
                    }
                    self.slot = ConnectionSlot::Attempting(address);
                    return Some(address);
                }
                Err(e) => {
                    error!("open {} rejected: {}", address, e);
                    if let Some(record) = roster.find_mut(&address) {
                        record.connect_failed = true;
                        if record.display_name.is_none() {
                            record.name_failed = true;
                        }
                    }
                }
            }
        }
    }

    /// Move on to the next peer: tear down an open link first, otherwise
    /// start a new attempt.
    pub fn on_connect_request<R: Radio, const N: usize>(
        &mut self,
        roster: &mut Roster<N>,
        radio: &mut R,
    ) -> ConnectRequest {
        match self.slot {
            ConnectionSlot::Connected { address, .. } => {
                info!("disconnecting {}", address);
                if let Err(e) = radio.disconnect(address) {
                    error!("disconnect {} rejected: {}", address, e);
                }
                ConnectRequest::Disconnecting(address)
            }
            ConnectionSlot::Attempting(_) => ConnectRequest::Busy,
            ConnectionSlot::Idle => match self.try_connect_next(roster, radio) {
                Some(address) => ConnectRequest::Attempting(address),
                None => ConnectRequest::Exhausted,
            },
        }
    }

    /// Handle the result of an open request.
    ///
    /// A failed open is final for that peer: it is marked failed here
    /// rather than waiting for a disconnect event the stack may never send,
    /// and the next candidate is attempted straight away.
    pub fn on_open_result<R: Radio, const N: usize>(
        &mut self,
        roster: &mut Roster<N>,
        radio: &mut R,
        address: BdAddr,
        conn_id: u16,
        success: bool,
    ) -> OpenOutcome {
        match self.slot {
            ConnectionSlot::Attempting(pending) if pending == address => {}
            _ => {
                warn!("open result for {} with no matching attempt", address);
                return OpenOutcome::Spurious;
            }
        }

        if success {
            if let Some(record) = roster.find_mut(&address) {
                record.connecting = false;
                record.connected = true;
            }
            self.slot = ConnectionSlot::Connected { address, conn_id };
            debug!("link to {} open, conn_id {}", address, conn_id);
            OpenOutcome::Connected { address, conn_id }
        } else {
            info!("connection to {} failed", address);
            self.finish_attempt(roster, address, true);
            let next = self.try_connect_next(roster, radio);
            OpenOutcome::Failed { address, next }
        }
    }

    /// Handle a disconnect event and advance to the next candidate.
    ///
    /// Returns the peer of the follow-up attempt, if one was issued.
    pub fn on_disconnect<R: Radio, const N: usize>(
        &mut self,
        roster: &mut Roster<N>,
        radio: &mut R,
        address: BdAddr,
    ) -> Option<BdAddr> {
        match self.slot {
            ConnectionSlot::Attempting(pending) if pending == address => {
                info!("connection to {} failed", address);
                self.finish_attempt(roster, address, true);
            }
            ConnectionSlot::Connected { address: open, .. } if open == address => {
                self.finish_attempt(roster, address, false);
            }
            ConnectionSlot::Idle => {
                debug!("disconnect of {} with idle slot", address);
            }
            _ => {
                // Stale event for a link we already gave up on.
                warn!("ignoring disconnect of {}", address);
                return None;
            }
        }

        self.try_connect_next(roster, radio)
    }

    fn finish_attempt<const N: usize>(
        &mut self,
        roster: &mut Roster<N>,
        address: BdAddr,
        never_opened: bool,
    ) {
        self.slot = ConnectionSlot::Idle;

        let Some(record) = roster.find_mut(&address) else {
            debug!("{} left the roster mid-connection", address);
            return;
        };
        record.connecting = false;
        record.connected = false;
        if record.display_name.is_none() {
            record.name_failed = true;
        }
        if never_opened {
            record.connect_failed = true;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
