//! Integration tests for peerscan host-testable logic.
//!
//! A simulated radio stack executes the session's queued commands against a
//! table of fake peripherals and feeds the results back as events, the same
//! way the firmware driver does with the SoftDevice.

use peerscan::ble::radio::{Command, QueuedRadio, RadioEvent};
use peerscan::ble::{CharProperties, CharacteristicInfo, HandleRange, Uuid};
use peerscan::config::DEVICE_NAME_CHAR_UUID;
use peerscan::{
    Activity, AddressKind, BdAddr, BleSession, ConnectionSlot, GattStatus, ScanSettings,
    SharedSession,
};

type Radio = QueuedRadio<16>;

const NAME_HANDLE: u16 = 3;
const GAP_RANGE: HandleRange = HandleRange::new(1, 7);

/// What a fake peripheral exposes over GATT.
#[derive(Clone, Copy)]
enum Gap {
    /// No Generic Access service.
    Missing,
    /// Service without a Device Name characteristic.
    NoName,
    /// Device Name present but not readable.
    Unreadable,
    Name(&'static [u8]),
    /// Read request fails.
    ReadFails,
    /// Link drops while the read is outstanding.
    DropsLink,
}

#[derive(Clone)]
struct FakePeer {
    address: BdAddr,
    adv: Vec<u8>,
    accepts: bool,
    gap: Gap,
    in_range: bool,
}

impl FakePeer {
    fn new(last: u8, gap: Gap) -> Self {
        Self {
            address: BdAddr::new([0xC0, 0xFF, 0xEE, 0, 0, last]),
            adv: vec![0x02, 0x01, 0x06],
            accepts: true,
            gap,
            in_range: true,
        }
    }

    fn advertising(mut self, name: &str) -> Self {
        self.adv.push(name.len() as u8 + 1);
        self.adv.push(0x09);
        self.adv.extend_from_slice(name.as_bytes());
        self
    }

    fn refusing(mut self) -> Self {
        self.accepts = false;
        self
    }
}

struct FakeStack {
    peers: Vec<FakePeer>,
    link: Option<(BdAddr, u16)>,
    next_conn: u16,
    executed: Vec<Command>,
    activity: Vec<Activity>,
}

impl FakeStack {
    fn new(peers: Vec<FakePeer>) -> Self {
        Self {
            peers,
            link: None,
            next_conn: 1,
            executed: Vec::new(),
            activity: Vec::new(),
        }
    }

    fn peer(&self, address: BdAddr) -> Option<&FakePeer> {
        self.peers.iter().find(|p| p.address == address)
    }

    fn peer_mut(&mut self, address: BdAddr) -> &mut FakePeer {
        self.peers
            .iter_mut()
            .find(|p| p.address == address)
            .expect("unknown fake peer")
    }

    fn opens(&self) -> Vec<BdAddr> {
        self.executed
            .iter()
            .filter_map(|c| match c {
                Command::Open { address, .. } => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// Feed one event and check the single-slot invariant afterwards.
    fn deliver<const N: usize>(
        &mut self,
        session: &mut BleSession<N>,
        radio: &mut Radio,
        event: RadioEvent<'_>,
    ) {
        if let Some(activity) = session.handle(event, radio) {
            self.activity.push(activity);
        }
        let busy = session
            .roster()
            .iter()
            .filter(|r| r.connecting || r.connected)
            .count();
        assert!(busy <= 1, "{} records hold the connection slot", busy);
    }

    /// Execute queued commands until the session goes quiet.
    fn run<const N: usize>(&mut self, session: &mut BleSession<N>, radio: &mut Radio) {
        let mut budget = 1_000;
        while let Some(command) = radio.pop() {
            budget -= 1;
            assert!(budget > 0, "session never went quiet");
            self.executed.push(command);
            self.execute(command, session, radio);
        }
    }

    fn execute<const N: usize>(
        &mut self,
        command: Command,
        session: &mut BleSession<N>,
        radio: &mut Radio,
    ) {
        match command {
            Command::SetScanParams(_) => self.deliver(
                session,
                radio,
                RadioEvent::ScanParamsSet {
                    status: GattStatus::Ok,
                },
            ),
            Command::StartScan { .. } => {
                self.deliver(
                    session,
                    radio,
                    RadioEvent::ScanStartComplete {
                        status: GattStatus::Ok,
                    },
                );
                let visible: Vec<FakePeer> =
                    self.peers.iter().filter(|p| p.in_range).cloned().collect();
                // Advertisers show up repeatedly
                for _ in 0..2 {
                    for peer in &visible {
                        self.deliver(
                            session,
                            radio,
                            RadioEvent::DeviceFound {
                                address: peer.address,
                                kind: AddressKind::Random,
                                rssi: -55,
                                adv_data: &peer.adv,
                            },
                        );
                    }
                }
                self.deliver(session, radio, RadioEvent::ScanComplete);
            }
            Command::Open { address, .. } => {
                // One central connection, as configured on the SoftDevice
                assert!(
                    self.link.is_none(),
                    "open {} while another link is still up",
                    address
                );
                let accepts = self.peer(address).map_or(false, |p| p.accepts && p.in_range);
                if accepts {
                    let conn_id = self.next_conn;
                    self.next_conn += 1;
                    self.link = Some((address, conn_id));
                    self.deliver(session, radio, RadioEvent::Connected { conn_id, address });
                    self.deliver(
                        session,
                        radio,
                        RadioEvent::Opened {
                            status: GattStatus::Ok,
                            conn_id,
                            address,
                        },
                    );
                } else {
                    self.deliver(
                        session,
                        radio,
                        RadioEvent::Opened {
                            status: GattStatus::Error(0x3E),
                            conn_id: 0,
                            address,
                        },
                    );
                }
            }
            Command::Disconnect { address } => {
                if self.link.map(|(a, _)| a) == Some(address) {
                    self.link = None;
                    radio.clear_attributes();
                    self.deliver(
                        session,
                        radio,
                        RadioEvent::Disconnected {
                            address,
                            reason: 0x16,
                        },
                    );
                }
            }
            Command::RequestMtu { conn_id } => self.deliver(
                session,
                radio,
                RadioEvent::MtuConfigured {
                    status: GattStatus::Ok,
                    conn_id,
                    mtu: 247,
                },
            ),
            Command::SearchService { conn_id, uuid } => {
                let (address, _) = self.link.expect("search without link");
                let gap = self.peer(address).map(|p| p.gap).expect("linked to unknown peer");
                if !matches!(gap, Gap::Missing) {
                    let properties = match gap {
                        Gap::Unreadable => Some(CharProperties::WRITE),
                        Gap::NoName => None,
                        _ => Some(CharProperties::READ),
                    };
                    if let Some(properties) = properties {
                        radio.cache_characteristic(CharacteristicInfo {
                            handle: NAME_HANDLE,
                            uuid: Uuid::Uuid16(DEVICE_NAME_CHAR_UUID),
                            properties: CharProperties(properties),
                        });
                    }
                    self.deliver(
                        session,
                        radio,
                        RadioEvent::ServiceFound {
                            conn_id,
                            uuid,
                            range: GAP_RANGE,
                        },
                    );
                }
                self.deliver(
                    session,
                    radio,
                    RadioEvent::SearchComplete {
                        status: GattStatus::Ok,
                        conn_id,
                    },
                );
            }
            Command::ReadCharacteristic { conn_id, handle } => {
                let (address, _) = self.link.expect("read without link");
                match self.peer(address).map(|p| p.gap) {
                    Some(Gap::Name(name)) => self.deliver(
                        session,
                        radio,
                        RadioEvent::CharacteristicRead {
                            status: GattStatus::Ok,
                            conn_id,
                            handle,
                            value: name,
                        },
                    ),
                    Some(Gap::DropsLink) => {
                        self.link = None;
                        radio.clear_attributes();
                        self.deliver(
                            session,
                            radio,
                            RadioEvent::Disconnected {
                                address,
                                reason: 0x08,
                            },
                        );
                    }
                    _ => self.deliver(
                        session,
                        radio,
                        RadioEvent::CharacteristicRead {
                            status: GattStatus::Error(0x0E),
                            conn_id,
                            handle,
                            value: &[],
                        },
                    ),
                }
            }
        }
    }
}

fn boot<const N: usize>(stack: &mut FakeStack, session: &mut BleSession<N>, radio: &mut Radio) {
    stack.deliver(
        session,
        radio,
        RadioEvent::Registered {
            status: GattStatus::Ok,
            client_if: 3,
        },
    );
    stack.run(session, radio);
}

fn rescan<const N: usize>(stack: &mut FakeStack, session: &mut BleSession<N>, radio: &mut Radio) {
    session.request_scan(radio).expect("scan refused");
    stack.run(session, radio);
}

fn mixed_neighbourhood() -> Vec<FakePeer> {
    vec![
        FakePeer::new(1, Gap::Name(b"Desk Lamp")),
        FakePeer::new(2, Gap::Name(b"never read")).refusing(),
        FakePeer::new(3, Gap::Missing),
        FakePeer::new(4, Gap::Name(b"Smart Plug")).advertising("Plug"),
        FakePeer::new(5, Gap::Unreadable).advertising("Sensor"),
    ]
}

fn addr(last: u8) -> BdAddr {
    BdAddr::new([0xC0, 0xFF, 0xEE, 0, 0, last])
}

#[test]
fn full_cycle_visits_every_peer_once() {
    let mut stack = FakeStack::new(mixed_neighbourhood());
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();

    boot(&mut stack, &mut session, &mut radio);

    assert_eq!(
        stack.opens(),
        vec![addr(1), addr(2), addr(3), addr(4), addr(5)]
    );
    assert_eq!(session.slot(), ConnectionSlot::Idle);
    assert!(session.roster().first_candidate().is_none());

    let roster = session.roster();
    let lamp = roster.get(&addr(1)).unwrap();
    assert_eq!(lamp.name(), Some("Desk Lamp"));
    assert!(lamp.resolved);

    let refusing = roster.get(&addr(2)).unwrap();
    assert!(refusing.connect_failed);
    assert!(refusing.name_failed);

    let no_gap = roster.get(&addr(3)).unwrap();
    assert!(no_gap.name_failed);
    assert!(!no_gap.connect_failed);

    // GATT name replaces the advertised one
    assert_eq!(roster.get(&addr(4)).unwrap().name(), Some("Smart Plug"));

    // Advertised name kept when the GATT read is impossible
    let sensor = roster.get(&addr(5)).unwrap();
    assert_eq!(sensor.name(), Some("Sensor"));
    assert!(sensor.name_failed);
}

#[test]
fn dump_lists_peers_in_discovery_order() {
    let mut stack = FakeStack::new(mixed_neighbourhood());
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    let dump: Vec<(BdAddr, Option<String>)> = session
        .roster()
        .dump()
        .map(|(a, n)| (a, n.map(String::from)))
        .collect();
    assert_eq!(dump.len(), 5);
    assert_eq!(dump[0], (addr(1), Some("Desk Lamp".to_string())));
    assert_eq!(dump[2], (addr(3), None));
}

#[test]
fn rescan_does_not_retry_failed_or_resolved_peers() {
    let mut stack = FakeStack::new(mixed_neighbourhood());
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);
    let first = stack.opens().len();

    rescan(&mut stack, &mut session, &mut radio);

    assert_eq!(stack.opens().len(), first);
    assert_eq!(session.roster().size(), 5);
}

#[test]
fn departed_peers_are_purged_and_flags_survive() {
    let mut stack = FakeStack::new(mixed_neighbourhood());
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    stack.peer_mut(addr(2)).in_range = false;
    stack.peer_mut(addr(4)).in_range = false;
    rescan(&mut stack, &mut session, &mut radio);

    let roster = session.roster();
    assert_eq!(roster.size(), 3);
    assert!(roster.get(&addr(2)).is_none());
    assert!(roster.get(&addr(4)).is_none());
    let survivors: Vec<BdAddr> = roster.iter().map(|r| r.address).collect();
    assert_eq!(survivors, vec![addr(1), addr(3), addr(5)]);
    assert!(roster.get(&addr(3)).unwrap().name_failed);
    assert!(roster.iter().all(|r| r.visible));
}

#[test]
fn newcomer_is_picked_up_on_next_pass() {
    let mut stack = FakeStack::new(vec![FakePeer::new(1, Gap::Name(b"Kettle"))]);
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    stack.peers.push(FakePeer::new(9, Gap::Name(b"Toaster")));
    rescan(&mut stack, &mut session, &mut radio);

    assert_eq!(stack.opens(), vec![addr(1), addr(9)]);
    assert_eq!(
        session.roster().get(&addr(9)).unwrap().name(),
        Some("Toaster")
    );
}

#[test]
fn cleared_failures_are_retried() {
    let mut stack = FakeStack::new(vec![FakePeer::new(2, Gap::Name(b"Shy")).refusing()]);
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);
    assert!(session.roster().get(&addr(2)).unwrap().connect_failed);

    stack.peer_mut(addr(2)).accepts = true;
    session.roster_mut().clear_failures();
    rescan(&mut stack, &mut session, &mut radio);

    let shy = session.roster().get(&addr(2)).unwrap();
    assert_eq!(shy.name(), Some("Shy"));
    assert!(!shy.connect_failed);
    assert_eq!(stack.opens().len(), 2);
}

#[test]
fn failed_reads_and_dropped_links_move_on() {
    let mut stack = FakeStack::new(vec![
        FakePeer::new(1, Gap::ReadFails),
        FakePeer::new(2, Gap::DropsLink).advertising("Flaky"),
        FakePeer::new(3, Gap::NoName),
        FakePeer::new(4, Gap::Name(b"Last")),
    ]);
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    let roster = session.roster();
    assert!(roster.get(&addr(1)).unwrap().name_failed);
    let flaky = roster.get(&addr(2)).unwrap();
    assert!(flaky.name_failed);
    assert_eq!(flaky.name(), Some("Flaky"));
    assert!(roster.get(&addr(3)).unwrap().name_failed);
    assert_eq!(roster.get(&addr(4)).unwrap().name(), Some("Last"));
    assert!(stack.activity.contains(&Activity::LinkClosed(addr(4))));
}

#[test]
fn full_roster_drops_newcomers() {
    let mut stack = FakeStack::new(vec![
        FakePeer::new(1, Gap::Missing),
        FakePeer::new(2, Gap::Missing),
        FakePeer::new(3, Gap::Missing),
    ]);
    let mut session: BleSession<2> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    assert_eq!(session.roster().size(), 2);
    assert!(session.roster().get(&addr(3)).is_none());
    assert_eq!(stack.opens(), vec![addr(1), addr(2)]);
}

#[test]
fn activity_trace_of_one_lookup() {
    let mut stack = FakeStack::new(vec![FakePeer::new(1, Gap::Name(b"Fan"))]);
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    assert_eq!(
        stack.activity,
        vec![
            Activity::Scanning,
            Activity::PeerDiscovered(addr(1)),
            Activity::ScanFinished { peers: 1 },
            Activity::Connected(addr(1)),
            Activity::NameResolved(addr(1)),
            Activity::LinkClosed(addr(1)),
        ]
    );
    assert!(session.event_count() > stack.activity.len() as u32);
}

#[test]
fn rescan_refused_while_scanning() {
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    session.request_scan(&mut radio).unwrap();
    session.handle(
        RadioEvent::ScanParamsSet {
            status: GattStatus::Ok,
        },
        &mut radio,
    );
    assert!(session.request_scan(&mut radio).is_err());
}

#[test]
fn shared_session_drives_a_cycle() {
    let mut stack = FakeStack::new(vec![FakePeer::new(1, Gap::Name(b"Hub"))]);
    let shared: SharedSession<8> = SharedSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();

    shared.with(|session| boot(&mut stack, session, &mut radio));

    let name = shared.with(|s| s.roster().get(&addr(1)).and_then(|r| r.name().map(String::from)));
    assert_eq!(name.as_deref(), Some("Hub"));
}

#[test]
fn every_peer_gets_the_slot_after_a_resolved_neighbour() {
    let mut stack = FakeStack::new(vec![
        FakePeer::new(1, Gap::Name(b"One")),
        FakePeer::new(2, Gap::Name(b"Two")),
        FakePeer::new(3, Gap::Name(b"Three")),
    ]);
    let mut session: BleSession<8> = BleSession::new(ScanSettings::DEFAULT);
    let mut radio = Radio::new();
    boot(&mut stack, &mut session, &mut radio);

    assert!(session.roster().iter().all(|r| r.resolved && !r.connect_failed));

    // Each open follows the previous link's disconnect
    let order: Vec<&Command> = stack
        .executed
        .iter()
        .filter(|c| matches!(c, Command::Open { .. } | Command::Disconnect { .. }))
        .collect();
    assert_eq!(order.len(), 6);
    for pair in order.chunks(2) {
        assert!(matches!(pair[0], Command::Open { .. }));
        assert!(matches!(pair[1], Command::Disconnect { .. }));
    }
}
