//! SoftDevice radio driver.
//!
//! The session never touches the SoftDevice itself. It queues commands in a
//! [`CommandQueue`]; this driver pops them one at a time, runs each on the
//! S140 Central API and hands the outcome back to the session as
//! [`RadioEvent`]s. Handling an event usually queues the next command, so a
//! single pump loop carries a whole scan / connect / read cycle.

use defmt::{debug, error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use nrf_softdevice::ble::{central, gatt_client, Address, AddressType, Connection};
use nrf_softdevice::Softdevice;

use peerscan::ble::radio::{Command, QueuedRadio, RadioEvent};
use peerscan::ble::{AddressKind, BdAddr, CharProperties, CharacteristicInfo, HandleRange, Uuid};
use peerscan::config::{
    CONNECT_TIMEOUT, DEVICE_NAME_CHAR_UUID, GAP_SERVICE_UUID, LOCAL_MTU, NAME_CAPACITY,
};
use peerscan::{Activity, GattStatus, ScanSettings, SharedSession};

/// Commands one event can queue before the driver catches up.
pub const COMMAND_QUEUE_DEPTH: usize = 8;

pub type CommandQueue = QueuedRadio<COMMAND_QUEUE_DEPTH>;

pub type ActivitySender = Sender<'static, CriticalSectionRawMutex, Activity, 8>;

/// HCI reason: link closed from this side.
const LOCAL_HOST_TERMINATED: u8 = 0x16;
/// HCI reason: link dropped by supervision timeout.
const SUPERVISION_TIMEOUT: u8 = 0x08;
/// HCI status: connection failed to be established.
const CONNECT_FAILED: u16 = 0x3E;
/// ATT "unlikely error", used for SoftDevice failures without a status.
const UNLIKELY_ERROR: u16 = 0x0E;

const READ_BUF_LEN: usize = 128;

/// How often a pending local disconnect is checked for completion.
const DISCONNECT_POLL_MS: u64 = 10;
/// Give up waiting for the SoftDevice to confirm a local disconnect.
const DISCONNECT_WAIT_MS: u64 = 2_000;

/// Generic Access service client. Only the Device Name is needed.
#[nrf_softdevice::gatt_client(uuid = "1800")]
pub struct GenericAccessClient {
    #[characteristic(uuid = "2a00", read)]
    pub device_name: [u8; NAME_CAPACITY],
}

struct Link {
    address: BdAddr,
    conn_id: u16,
    conn: Connection,
}

pub struct SoftdeviceDriver {
    sd: &'static Softdevice,
    session: &'static SharedSession,
    activity: ActivitySender,
    settings: ScanSettings,
    link: Option<Link>,
}

impl SoftdeviceDriver {
    pub fn new(
        sd: &'static Softdevice,
        session: &'static SharedSession,
        activity: ActivitySender,
    ) -> Self {
        Self {
            sd,
            session,
            activity,
            settings: ScanSettings::DEFAULT,
            link: None,
        }
    }

    /// Report the client as registered, which kicks off the first scan.
    pub fn register(&mut self, radio: &mut CommandQueue) {
        self.emit(
            RadioEvent::Registered {
                status: GattStatus::Ok,
                client_if: 0,
            },
            radio,
        );
    }

    /// Run queued commands until the session has nothing left to do.
    pub async fn pump(&mut self, radio: &mut CommandQueue) {
        while let Some(command) = radio.pop() {
            debug!("radio command: {}", command);
            self.execute(command, radio).await;
            self.check_link(radio);
        }
    }

    async fn execute(&mut self, command: Command, radio: &mut CommandQueue) {
        match command {
            Command::SetScanParams(settings) => {
                // Parameters are applied when the scan starts.
                self.settings = settings;
                self.emit(
                    RadioEvent::ScanParamsSet {
                        status: GattStatus::Ok,
                    },
                    radio,
                );
            }
            Command::StartScan { duration_secs } => self.scan(duration_secs, radio).await,
            Command::Open { address, kind } => self.open(address, kind, radio).await,
            Command::Disconnect { address } => self.disconnect(address, radio).await,
            Command::RequestMtu { conn_id } => {
                // The SoftDevice runs the ATT MTU exchange on its own, up to
                // the `att_mtu` it was enabled with.
                let status = match self.link_for(conn_id) {
                    Some(_) => GattStatus::Ok,
                    None => GattStatus::Error(UNLIKELY_ERROR),
                };
                self.emit(
                    RadioEvent::MtuConfigured {
                        status,
                        conn_id,
                        mtu: LOCAL_MTU,
                    },
                    radio,
                );
            }
            Command::SearchService { conn_id, uuid } => self.search(conn_id, uuid, radio).await,
            Command::ReadCharacteristic { conn_id, handle } => {
                self.read(conn_id, handle, radio).await
            }
        }
    }

    async fn scan(&mut self, duration_secs: u32, radio: &mut CommandQueue) {
        let settings = self.settings;
        let config = central::ScanConfig {
            active: settings.active,
            interval: settings.interval.into(),
            window: settings.window.into(),
            ..Default::default()
        };

        self.emit(
            RadioEvent::ScanStartComplete {
                status: GattStatus::Ok,
            },
            radio,
        );
        info!("BLE scan starting ({} s window)", duration_secs);

        let session = self.session;
        let activity = self.activity;
        let scan = central::scan(self.sd, &config, |report| {
            let data =
                unsafe { core::slice::from_raw_parts(report.data.p_data, report.data.len as usize) };
            let (address, kind) = from_sd_address(&Address::from_raw(report.peer_addr));
            dispatch(
                session,
                activity,
                RadioEvent::DeviceFound {
                    address,
                    kind,
                    rssi: report.rssi,
                    adv_data: data,
                },
                radio,
            );
            // Keep scanning
            None::<()>
        });

        let result = if settings.is_continuous() {
            Ok(scan.await)
        } else {
            with_timeout(Duration::from_secs(duration_secs as u64), scan).await
        };

        let event = match result {
            Err(_) => RadioEvent::ScanComplete,
            Ok(Err(e)) => {
                error!("BLE scan ended with error: {:?}", e);
                RadioEvent::ScanCancelled
            }
            Ok(Ok(())) => RadioEvent::ScanCancelled,
        };
        self.emit(event, radio);
    }

    async fn open(&mut self, address: BdAddr, kind: AddressKind, radio: &mut CommandQueue) {
        if let Some(link) = &self.link {
            warn!("open {} while linked to {}", address, link.address);
        }

        let target = to_sd_address(address, kind);
        let whitelist = [&target];
        let mut config = central::ConnectConfig::default();
        config.scan_config.whitelist = Some(&whitelist);
        config.scan_config.timeout = CONNECT_TIMEOUT;

        match central::connect(self.sd, &config).await {
            Ok(conn) => {
                let conn_id = conn.handle().unwrap_or_default();
                self.link = Some(Link {
                    address,
                    conn_id,
                    conn,
                });
                self.emit(RadioEvent::Connected { conn_id, address }, radio);
                self.emit(
                    RadioEvent::Opened {
                        status: GattStatus::Ok,
                        conn_id,
                        address,
                    },
                    radio,
                );
            }
            Err(e) => {
                warn!("connect to {} failed: {:?}", address, e);
                let code = match e {
                    central::ConnectError::Timeout => CONNECT_FAILED,
                    _ => UNLIKELY_ERROR,
                };
                self.emit(
                    RadioEvent::Opened {
                        status: GattStatus::Error(code),
                        conn_id: 0,
                        address,
                    },
                    radio,
                );
            }
        }
    }

    /// Close the link and report it only once the SoftDevice has released
    /// the connection, so the next open finds the central slot free.
    async fn disconnect(&mut self, address: BdAddr, radio: &mut CommandQueue) {
        match self.link.take() {
            Some(link) if link.address == address => {
                if let Err(e) = link.conn.disconnect() {
                    debug!("disconnect {}: {:?}", address, e);
                }

                let deadline = Instant::now() + Duration::from_millis(DISCONNECT_WAIT_MS);
                while link.conn.is_connected() {
                    if Instant::now() >= deadline {
                        warn!("disconnect {} not confirmed", address);
                        break;
                    }
                    Timer::after(Duration::from_millis(DISCONNECT_POLL_MS)).await;
                }
                // Last reference; frees the connection slot.
                drop(link);

                radio.clear_attributes();
                self.emit(
                    RadioEvent::Disconnected {
                        address,
                        reason: LOCAL_HOST_TERMINATED,
                    },
                    radio,
                );
            }
            other => {
                warn!("disconnect {}: no such link", address);
                self.link = other;
            }
        }
    }

    async fn search(&mut self, conn_id: u16, uuid: Uuid, radio: &mut CommandQueue) {
        let Some(link) = self.link_for(conn_id) else {
            self.emit(search_complete(conn_id, GattStatus::Error(UNLIKELY_ERROR)), radio);
            return;
        };
        if !uuid.is_16(GAP_SERVICE_UUID) {
            warn!("search for unsupported service {}", uuid);
            self.emit(search_complete(conn_id, GattStatus::Ok), radio);
            return;
        }

        let found = match gatt_client::discover::<GenericAccessClient>(&link.conn).await {
            Ok(client) => {
                radio.cache_characteristic(CharacteristicInfo {
                    handle: client.device_name_value_handle,
                    uuid: Uuid::Uuid16(DEVICE_NAME_CHAR_UUID),
                    properties: CharProperties(CharProperties::READ),
                });
                true
            }
            // Service present, Device Name missing
            Err(gatt_client::DiscoverError::ServiceIncomplete) => true,
            Err(gatt_client::DiscoverError::ServiceNotFound) => false,
            Err(e) => {
                error!("discover error: {:?}", e);
                self.emit(search_complete(conn_id, GattStatus::Error(UNLIKELY_ERROR)), radio);
                return;
            }
        };

        if found {
            self.emit(
                RadioEvent::ServiceFound {
                    conn_id,
                    uuid,
                    range: HandleRange::ALL,
                },
                radio,
            );
        }
        self.emit(search_complete(conn_id, GattStatus::Ok), radio);
    }

    async fn read(&mut self, conn_id: u16, handle: u16, radio: &mut CommandQueue) {
        let mut buf = [0u8; READ_BUF_LEN];
        let result = match self.link_for(conn_id) {
            Some(link) => gatt_client::read(&link.conn, handle, &mut buf)
                .await
                .map_err(|e| error!("read error: {:?}", e)),
            None => Err(()),
        };

        let (status, len) = match result {
            Ok(len) => (GattStatus::Ok, len.min(READ_BUF_LEN)),
            Err(()) => (GattStatus::Error(UNLIKELY_ERROR), 0),
        };
        self.emit(
            RadioEvent::CharacteristicRead {
                status,
                conn_id,
                handle,
                value: &buf[..len],
            },
            radio,
        );
    }

    /// Report a link that dropped on its own.
    fn check_link(&mut self, radio: &mut CommandQueue) {
        let lost = match &self.link {
            Some(link) => !link.conn.is_connected(),
            None => false,
        };
        if !lost {
            return;
        }
        if let Some(link) = self.link.take() {
            info!("link to {} lost", link.address);
            radio.clear_attributes();
            self.emit(
                RadioEvent::Disconnected {
                    address: link.address,
                    reason: SUPERVISION_TIMEOUT,
                },
                radio,
            );
        }
    }

    fn link_for(&self, conn_id: u16) -> Option<&Link> {
        self.link.as_ref().filter(|link| link.conn_id == conn_id)
    }

    fn emit(&self, event: RadioEvent<'_>, radio: &mut CommandQueue) {
        dispatch(self.session, self.activity, event, radio);
    }
}

fn dispatch(
    session: &SharedSession,
    activity: ActivitySender,
    event: RadioEvent<'_>,
    radio: &mut CommandQueue,
) {
    if let Some(update) = session.handle(event, radio) {
        // Status display only; dropping is fine when it falls behind.
        if activity.try_send(update).is_err() {
            warn!("activity channel full - dropping {}", update);
        }
    }
}

fn search_complete(conn_id: u16, status: GattStatus) -> RadioEvent<'static> {
    RadioEvent::SearchComplete { status, conn_id }
}

/// SoftDevice addresses are little-endian; [`BdAddr`] is most significant
/// byte first.
fn from_sd_address(address: &Address) -> (BdAddr, AddressKind) {
    let mut bytes = address.bytes();
    bytes.reverse();
    let kind = match address.address_type() {
        AddressType::Public => AddressKind::Public,
        AddressType::RandomPrivateResolvable => AddressKind::RpaRandom,
        _ => AddressKind::Random,
    };
    (BdAddr::new(bytes), kind)
}

fn to_sd_address(address: BdAddr, kind: AddressKind) -> Address {
    let mut bytes = address.bytes();
    bytes.reverse();
    let address_type = match kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::Random => AddressType::RandomStatic,
        AddressKind::RpaPublic | AddressKind::RpaRandom => AddressType::RandomPrivateResolvable,
    };
    Address::new(address_type, bytes)
}
