//! peerscan firmware for the nRF52840.
//!
//! Scans for BLE peripherals, then connects to each one in turn and reads
//! its GAP Device Name.
//!
//! Task layout:
//! - `softdevice_task` - runs the S140 event loop.
//! - `ble_task`        - pumps session commands through the SoftDevice,
//!                       rescans periodically or on button press.
//! - `button_task`     - debounced rescan button.
//! - `status_task`     - drives the status LED from session activity.

#![no_std]
#![no_main]

mod driver;

use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{AnyPin, Input, Level, Output, OutputDrive, Pin as _, Pull};
use embassy_nrf::interrupt;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use nrf_softdevice::{self as sd, Softdevice};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

use peerscan::config::{BUTTON_DEBOUNCE_MS, LOCAL_MTU, RESCAN_INTERVAL_SECS};
use peerscan::{Activity, ScanSettings, SharedSession};

use crate::driver::{CommandQueue, SoftdeviceDriver};

/// The one session, shared by the BLE task and anyone inspecting the roster.
static SESSION: SharedSession = SharedSession::new(ScanSettings::DEFAULT);

/// Session activity for the status LED.
static ACTIVITY: Channel<CriticalSectionRawMutex, Activity, 8> = Channel::new();

/// Raised by the button to start a scan cycle early.
static RESCAN: Signal<CriticalSectionRawMutex, ()> = Signal::new();

const DEVICE_NAME: &[u8] = b"peerscan";

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("peerscan booting");

    // SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = interrupt::Priority::P2;
    config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(config);

    let sd: &'static Softdevice = Softdevice::enable(&softdevice_config());
    spawner.must_spawn(softdevice_task(sd));

    spawner.must_spawn(button_task(p.P0_11.degrade()));
    spawner.must_spawn(status_task(p.P0_13.degrade()));
    spawner.must_spawn(ble_task(sd));
}

fn softdevice_config() -> sd::Config {
    sd::Config {
        clock: Some(sd::raw::nrf_clock_lf_cfg_t {
            source: sd::raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: sd::raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(sd::raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(sd::raw::ble_gatt_conn_cfg_t {
            att_mtu: LOCAL_MTU,
        }),
        gap_role_count: Some(sd::raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            // Single connection slot
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: sd::raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(sd::raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: sd::raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                sd::raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    info!("SoftDevice task started");
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice) -> ! {
    static RADIO: StaticCell<CommandQueue> = StaticCell::new();
    let radio = RADIO.init(CommandQueue::new());

    let mut driver = SoftdeviceDriver::new(sd, &SESSION, ACTIVITY.sender());
    driver.register(radio);

    loop {
        driver.pump(radio).await;

        let (peers, idle) = SESSION.with(|s| (s.roster().size(), s.slot().is_idle()));
        info!("cycle done - {} peers, slot idle: {}", peers, idle);

        match select(
            Timer::after(Duration::from_secs(RESCAN_INTERVAL_SECS)),
            RESCAN.wait(),
        )
        .await
        {
            Either::First(_) => info!("periodic rescan"),
            Either::Second(_) => info!("rescan requested"),
        }

        if let Err(e) = SESSION.with(|s| s.request_scan(radio)) {
            warn!("rescan refused: {}", e);
        }
    }
}

/// Waits for the pin to go low (pressed), debounces, raises [`RESCAN`],
/// then waits for release before repeating.
#[embassy_executor::task]
async fn button_task(pin: AnyPin) -> ! {
    let mut btn = Input::new(pin, Pull::Up);

    loop {
        btn.wait_for_falling_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;

        if btn.is_low() {
            info!("Button: rescan");
            RESCAN.signal(());

            btn.wait_for_rising_edge().await;
            Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        }
    }
}

/// LED on while a link is being attempted or held.
#[embassy_executor::task]
async fn status_task(pin: AnyPin) -> ! {
    let mut led = Output::new(pin, Level::High, OutputDrive::Standard);
    let rx = ACTIVITY.receiver();

    loop {
        let activity = rx.receive().await;
        info!("activity: {}", activity);
        match activity {
            Activity::Connecting(_) | Activity::Connected(_) => led.set_low(),
            Activity::LinkClosed(_) | Activity::Idle => led.set_high(),
            Activity::ScanFinished { .. } => {
                // The first attempt may already be on its way.
                if SESSION.with(|s| s.slot().is_idle()) {
                    led.set_high();
                } else {
                    led.set_low();
                }
            }
            Activity::NameResolved(address) => {
                let name = SESSION.with(|s| {
                    s.roster()
                        .get(&address)
                        .and_then(|r| r.display_name.clone())
                });
                if let Some(name) = name {
                    info!("{} is \"{}\"", address, name.as_str());
                }
            }
            Activity::Scanning | Activity::PeerDiscovered(_) => {}
        }
    }
}
