//! Roster of discovered peers.
//!
//! A bounded, insertion-ordered list keyed by [`BdAddr`]. The list is
//! expected to stay short (a few dozen entries), so lookups are linear.
//!
//! Each scan pass first clears every `visible` flag, re-marks peers as they
//! are sighted, and finally [`Roster::purge`]s whatever was not seen again.
//! Failure flags survive passes; only [`Roster::clear_failures`] resets them.

use crate::ble::{peer_name, AddressKind, BdAddr, PeerName};
use crate::config::ROSTER_CAPACITY;
use heapless::Vec;

/// One discovered peer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerRecord {
    pub address: BdAddr,
    pub address_kind: AddressKind,
    /// From the first advertisement that carried one, or from a GATT read.
    pub display_name: Option<PeerName>,
    /// Seen in the current / latest completed scan pass.
    pub visible: bool,
    /// An open request is outstanding for this peer.
    pub connecting: bool,
    /// This peer holds the single active link.
    pub connected: bool,
    /// A connection attempt ended before the link opened.
    pub connect_failed: bool,
    /// The link opened but no name was obtained before it closed.
    pub name_failed: bool,
    /// The name was read over GATT; no need to connect again.
    pub resolved: bool,
}

impl PeerRecord {
    fn new(address: BdAddr, address_kind: AddressKind, display_name: Option<PeerName>) -> Self {
        Self {
            address,
            address_kind,
            display_name,
            visible: true,
            connecting: false,
            connected: false,
            connect_failed: false,
            name_failed: false,
            resolved: false,
        }
    }

    /// True when the orchestrator may pick this peer for a connection attempt.
    pub fn is_candidate(&self) -> bool {
        !(self.connect_failed || self.name_failed || self.connecting || self.connected || self.resolved)
    }

    pub fn name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

/// Result of [`Roster::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Observation {
    /// First sighting; a record was appended.
    New,
    /// Known peer, marked visible again.
    AlreadySeen,
    /// Roster full; the sighting was ignored.
    Dropped,
}

/// Result of [`Roster::update_name`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NameUpdate {
    /// The name was stored.
    Stored,
    /// The record was found but the value was empty or unusable; the
    /// record is left without a name.
    Missing,
    /// No record for that address (purged while the lookup was running).
    UnknownPeer,
}

/// Bounded, deduplicated peer list.
pub struct Roster<const N: usize = ROSTER_CAPACITY> {
    records: Vec<PeerRecord, N>,
}

impl<const N: usize> Roster<N> {
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Start a scan pass: mark every known peer as not (yet) seen.
    pub fn begin_scan_pass(&mut self) {
        for record in self.records.iter_mut() {
            record.visible = false;
        }
    }

    /// Record a sighting.
    ///
    /// Only the first sighting's advertised name is kept; later ones just
    /// refresh `visible`.
    pub fn observe(
        &mut self,
        address: BdAddr,
        address_kind: AddressKind,
        advertised_name: Option<&[u8]>,
    ) -> Observation {
        if let Some(record) = self.find_mut(&address) {
            record.visible = true;
            return Observation::AlreadySeen;
        }

        let name = advertised_name.and_then(peer_name);
        match self.records.push(PeerRecord::new(address, address_kind, name)) {
            Ok(()) => Observation::New,
            Err(_) => Observation::Dropped,
        }
    }

    /// Store a name read from the peer and clear its `connecting` flag.
    ///
    /// An empty or unusable value leaves the record without a name and is
    /// reported as [`NameUpdate::Missing`]; setting `name_failed` is up to
    /// the caller.
    pub fn update_name(&mut self, address: &BdAddr, name: Option<&[u8]>) -> NameUpdate {
        let Some(record) = self.find_mut(address) else {
            return NameUpdate::UnknownPeer;
        };

        record.connecting = false;
        record.display_name = name.and_then(peer_name);
        if record.display_name.is_some() {
            record.resolved = true;
            NameUpdate::Stored
        } else {
            NameUpdate::Missing
        }
    }

    /// Drop every peer not seen during the last pass, keeping the order of
    /// the survivors. Returns how many were removed.
    pub fn purge(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|record| record.visible);
        before - self.records.len()
    }

    /// Make every peer eligible for connection again.
    ///
    /// Never called by the session itself; this is the hook for an external
    /// retry policy.
    pub fn clear_failures(&mut self) {
        for record in self.records.iter_mut() {
            record.connect_failed = false;
            record.name_failed = false;
        }
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn get(&self, address: &BdAddr) -> Option<&PeerRecord> {
        self.records.iter().find(|r| r.address == *address)
    }

    pub fn find_mut(&mut self, address: &BdAddr) -> Option<&mut PeerRecord> {
        self.records.iter_mut().find(|r| r.address == *address)
    }

    /// Records in discovery order.
    pub fn iter(&self) -> core::slice::Iter<'_, PeerRecord> {
        self.records.iter()
    }

    /// First peer eligible for a connection attempt, in discovery order.
    pub fn first_candidate(&self) -> Option<&PeerRecord> {
        self.records.iter().find(|r| r.is_candidate())
    }

    /// True while some peer has an open request outstanding.
    pub fn any_connecting(&self) -> bool {
        self.records.iter().any(|r| r.connecting)
    }

    /// `(address, name)` pairs for display. The iterator is `Clone`, so a
    /// snapshot can be walked again.
    pub fn dump(&self) -> Dump<'_> {
        Dump {
            inner: self.records.iter(),
        }
    }

    /// Log one line per peer.
    pub fn dump_to_log(&self) {
        for (address, name) in self.dump() {
            info!("{} {}", address, name.unwrap_or(""));
        }
    }
}

impl<const N: usize> Default for Roster<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`Roster::dump`].
#[derive(Clone)]
pub struct Dump<'a> {
    inner: core::slice::Iter<'a, PeerRecord>,
}

impl<'a> Iterator for Dump<'a> {
    type Item = (BdAddr, Option<&'a str>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| (r.address, r.name()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Dump<'_> {}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec as StdVec;

    const A: BdAddr = BdAddr::new([0xA0, 0, 0, 0, 0, 0x01]);
    const B: BdAddr = BdAddr::new([0xB0, 0, 0, 0, 0, 0x02]);
    const C: BdAddr = BdAddr::new([0xC0, 0, 0, 0, 0, 0x03]);

    fn addresses<const N: usize>(roster: &Roster<N>) -> StdVec<BdAddr> {
        roster.dump().map(|(addr, _)| addr).collect()
    }

    #[test]
    fn observe_deduplicates() {
        let mut roster: Roster<8> = Roster::new();
        assert_eq!(roster.observe(A, AddressKind::Public, None), Observation::New);
        for _ in 0..5 {
            assert_eq!(
                roster.observe(A, AddressKind::Public, None),
                Observation::AlreadySeen
            );
        }
        assert_eq!(roster.size(), 1);
    }

    #[test]
    fn first_advertised_name_wins() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Random, Some(b"Foo"));
        assert_eq!(roster.dump().next(), Some((A, Some("Foo"))));

        roster.observe(A, AddressKind::Random, Some(b"Bar"));
        assert_eq!(roster.get(&A).unwrap().name(), Some("Foo"));
    }

    #[test]
    fn empty_advertised_name_is_absent() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, Some(b""));
        assert_eq!(roster.get(&A).unwrap().display_name, None);
    }

    #[test]
    fn new_record_is_visible_with_clear_flags() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::RpaRandom, None);
        let record = roster.get(&A).unwrap();
        assert!(record.visible);
        assert!(record.is_candidate());
        assert_eq!(record.address_kind, AddressKind::RpaRandom);
    }

    #[test]
    fn full_roster_drops_new_peers() {
        let mut roster: Roster<2> = Roster::new();
        assert_eq!(roster.observe(A, AddressKind::Public, None), Observation::New);
        assert_eq!(roster.observe(B, AddressKind::Public, None), Observation::New);
        assert_eq!(roster.observe(C, AddressKind::Public, None), Observation::Dropped);
        assert_eq!(roster.size(), 2);
        assert!(roster.is_full());
        // Known peers are still refreshed
        assert_eq!(
            roster.observe(A, AddressKind::Public, None),
            Observation::AlreadySeen
        );
    }

    #[test]
    fn pass_without_sightings_empties_roster() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, None);
        roster.observe(B, AddressKind::Public, None);
        roster.begin_scan_pass();
        assert_eq!(roster.purge(), 2);
        assert!(roster.is_empty());
    }

    #[test]
    fn purge_keeps_resighted_peers_in_order() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, None);
        roster.observe(B, AddressKind::Public, None);
        roster.observe(C, AddressKind::Public, None);

        roster.begin_scan_pass();
        roster.observe(C, AddressKind::Public, None);
        roster.observe(A, AddressKind::Public, None);

        assert_eq!(roster.purge(), 1);
        assert_eq!(addresses(&roster), [A, C]);
    }

    #[test]
    fn purge_on_empty_and_all_visible() {
        let mut roster: Roster<8> = Roster::new();
        assert_eq!(roster.purge(), 0);

        roster.observe(A, AddressKind::Public, None);
        roster.observe(B, AddressKind::Public, None);
        assert_eq!(roster.purge(), 0);
        assert_eq!(addresses(&roster), [A, B]);
    }

    #[test]
    fn update_name_stores_and_clears_connecting() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, None);
        roster.find_mut(&A).unwrap().connecting = true;

        assert_eq!(roster.update_name(&A, Some(b"Sensor")), NameUpdate::Stored);
        let record = roster.get(&A).unwrap();
        assert_eq!(record.name(), Some("Sensor"));
        assert!(!record.connecting);
        assert!(record.resolved);
        assert!(!record.is_candidate());
    }

    #[test]
    fn update_name_replaces_advertised_name() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, Some(b"Adv"));
        roster.update_name(&A, Some(b"Gatt"));
        assert_eq!(roster.get(&A).unwrap().name(), Some("Gatt"));
    }

    #[test]
    fn update_name_with_empty_value_reports_missing() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, Some(b"Adv"));
        assert_eq!(roster.update_name(&A, Some(b"")), NameUpdate::Missing);
        assert_eq!(roster.update_name(&A, None), NameUpdate::Missing);
        assert_eq!(roster.get(&A).unwrap().display_name, None);
    }

    #[test]
    fn update_name_for_unknown_peer_is_noop() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, None);
        assert_eq!(roster.update_name(&B, Some(b"Ghost")), NameUpdate::UnknownPeer);
        assert_eq!(roster.size(), 1);
        assert_eq!(roster.get(&A).unwrap().display_name, None);
    }

    #[test]
    fn failure_flags_survive_scan_passes() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, None);
        roster.find_mut(&A).unwrap().name_failed = true;

        roster.begin_scan_pass();
        roster.observe(A, AddressKind::Public, None);
        roster.purge();

        let record = roster.get(&A).unwrap();
        assert!(record.visible);
        assert!(record.name_failed);
        assert!(roster.first_candidate().is_none());
    }

    #[test]
    fn clear_failures_restores_eligibility() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, None);
        roster.observe(B, AddressKind::Public, None);
        roster.find_mut(&A).unwrap().connect_failed = true;
        roster.find_mut(&B).unwrap().name_failed = true;
        assert!(roster.first_candidate().is_none());

        roster.clear_failures();
        assert_eq!(roster.first_candidate().map(|r| r.address), Some(A));
    }

    #[test]
    fn dump_is_restartable() {
        let mut roster: Roster<8> = Roster::new();
        roster.observe(A, AddressKind::Public, Some(b"One"));
        roster.observe(B, AddressKind::Public, None);

        let dump = roster.dump();
        assert_eq!(dump.len(), 2);
        let first: StdVec<_> = dump.clone().collect();
        let second: StdVec<_> = dump.collect();
        assert_eq!(first, second);
        assert_eq!(first, [(A, Some("One")), (B, None)]);
    }
}
