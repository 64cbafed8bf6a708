//! Firmware entry point (nRF52840 + SoftDevice S140).
//!
//! Task layout:
//! - `softdevice_task` - the SoftDevice event loop.
//! - `ble_task` - executes pairing-machine commands against the stack.
//! - `adv_task` - broadcasts our name and mode byte, rebuilt on every
//!   mode change.
//! - `button_task` - debounces the mode button into the flag bus.
//! - the main loop - pairing machine, shutdown supervisor, watchdog and
//!   the sleep controller, on a fixed 20 ms cycle.

#![no_std]
#![no_main]

use core::mem::MaybeUninit;

use defmt::{error, info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::Priority;
use embassy_nrf::pac;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::peripheral;
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;

use trainlink::ble::adv_parser::local_device_name;
use trainlink::ble::advertising::AdvPayload;
use trainlink::ble::central::{self, LinkCommandChannel, SoftdeviceLink};
use trainlink::ble::pairing::{LinkState, PairingMachine, Wait, WaitWindow};
use trainlink::bus::StatusFlags;
use trainlink::config::{BUTTON_DEBOUNCE_MS, SLEEP_CLOCK_HZ, THREAD_CYCLE_MS, WATCHDOG_TIMEOUT};
use trainlink::fault::{self, FaultKind};
use trainlink::power::idle::{BoardSleep, IdleScheduler, Wdt};
use trainlink::power::PowerController;
use trainlink::roles::{PeripheralRoles, Watchdog};
use trainlink::shutdown::{perform_shutdown, Board, ShutdownSupervisor};

static LINK_CMDS: LinkCommandChannel = embassy_sync::channel::Channel::new();

/// Mode byte changed; the advertising task rebuilds its payload.
static MODE_CHANGED: Signal<CriticalSectionRawMutex, AdvPayload> = Signal::new();

/// Survives System OFF with RAM retention; checked by the bootloader to
/// distinguish a deliberate power-down from a watchdog reset.
#[link_section = ".uninit.retained"]
static mut RETAINED_MARK: MaybeUninit<u32> = MaybeUninit::uninit();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice) -> ! {
    central::link_task(sd, LINK_CMDS.receiver()).await
}

#[embassy_executor::task]
async fn button_task(mut button: Input<'static>) -> ! {
    loop {
        button.wait_for_falling_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        if button.is_low() {
            trainlink::ble::shared::on_button_pressed(central::event_bus());
            button.wait_for_high().await;
        }
    }
}

/// Broadcast name + mode byte; restarted whenever the mode changes.
#[embassy_executor::task]
async fn adv_task(sd: &'static Softdevice) -> ! {
    let name = local_device_name(trainlink::ble::PeerAddress(
        nrf_softdevice::ble::get_address(sd).bytes(),
    ));
    let mut payload = AdvPayload::new();

    loop {
        let mut adv_data: Vec<u8, 31> = Vec::new();
        // Flags: LE general discoverable, BR/EDR unsupported.
        let _ = adv_data.extend_from_slice(&[0x02, 0x01, 0x06]);
        // Complete local name.
        let _ = adv_data.push(name.len() as u8 + 1);
        let _ = adv_data.push(0x09);
        let _ = adv_data.extend_from_slice(name.as_bytes());
        // Service data: device-type code + mode byte.
        let _ = adv_data.push(payload.as_bytes().len() as u8 + 1);
        let _ = adv_data.push(0x16);
        let _ = adv_data.extend_from_slice(payload.as_bytes());

        let config = peripheral::Config::default();
        let adv = peripheral::NonconnectableAdvertisement::NonscannableUndirected {
            adv_data: &adv_data,
        };

        match select(
            peripheral::advertise(sd, adv, &config),
            MODE_CHANGED.wait(),
        )
        .await
        {
            Either::First(Err(e)) => {
                error!("advertising stopped: {:?}", e);
                Timer::after(Duration::from_secs(1)).await;
            }
            Either::First(Ok(())) => {}
            Either::Second(next) => {
                info!("advertising mode -> {}", next.mode());
                payload = next;
            }
        }
    }
}

/// Board-level shutdown operations.
struct TrainBoard {
    sd: &'static Softdevice,
}

impl Board for TrainBoard {
    fn stop_advertising(&mut self) {
        let _ = unsafe { raw::sd_ble_gap_adv_stop(raw::BLE_GAP_ADV_SET_HANDLE_NOT_SET as u8) };
    }

    fn disable_radio(&mut self) {
        let _ = self.sd;
        let _ = unsafe { raw::sd_softdevice_disable() };
    }

    fn write_retained_sentinel(&mut self, value: u32) {
        unsafe {
            core::ptr::addr_of_mut!(RETAINED_MARK).write(MaybeUninit::new(value));
        }
    }

    fn tristate_outputs(&mut self) {
        // LED P0.06, motors P0.13/P0.14 back to the reset state
        // (input, disconnected).
        for pin in [6usize, 13, 14] {
            pac::P0.pin_cnf(pin).write(|w| {
                w.set_dir(pac::gpio::vals::Dir::INPUT);
                w.set_input(pac::gpio::vals::Input::DISCONNECT);
            });
        }
    }

    fn disable_entropy_source(&mut self) {
        pac::RNG.tasks_stop().write_value(1);
    }

    fn enter_power_down(&mut self, seconds: u32) -> ! {
        // System OFF has no timed wake on this part; the mode button is
        // configured as the wake source instead, so `seconds` is the
        // advertised minimum, not a timer. The SoftDevice was disabled
        // earlier in the sequence, so POWER is written directly.
        info!("powering down ({} s minimum)", seconds);
        pac::POWER.systemoff().write(|w| w.set_systemoff(true));
        loop {
            cortex_m::asm::wfe();
        }
    }
}

fn fault_reset(kind: FaultKind) -> ! {
    error!("fatal fault: {:?}", kind);
    cortex_m::peripheral::SCB::sys_reset()
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 256 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("trainlink starting");

    fault::install_fault_handler(fault_reset);

    let mut config = embassy_nrf::config::Config::default();
    // SoftDevice reserves priorities 0, 1 and 4.
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    let sd = Softdevice::enable(&softdevice_config());
    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(ble_task(sd)));
    unwrap!(spawner.spawn(adv_task(sd)));

    let mut roles = PeripheralRoles::new(
        Output::new(p.P0_06, Level::Low, OutputDrive::Standard),
        Output::new(p.P0_13, Level::Low, OutputDrive::Standard),
        Output::new(p.P0_14, Level::Low, OutputDrive::Standard),
    );
    let button = Input::new(p.P0_11, Pull::Up);
    unwrap!(spawner.spawn(button_task(button)));

    let mut wdt = Wdt::start(WATCHDOG_TIMEOUT);
    let mut sleep_hw = BoardSleep::new(wdt);
    let mut sleep_sched = IdleScheduler::new();
    let mut power = PowerController::new();
    let mut supervisor = ShutdownSupervisor::new();
    let mut board = TrainBoard { sd };

    let shared = central::link_shared();
    let bus = central::event_bus();
    let mut link = SoftdeviceLink::new(sd, LINK_CMDS.sender());
    let mut machine = PairingMachine::new();
    let mut adv_payload = AdvPayload::new();

    let mut wait = match machine.start(&mut link) {
        Ok(w) => w,
        Err(_) => fault::raise(FaultKind::Assertion),
    };
    let mut window = WaitWindow::new();
    window.rearm(wait, Instant::now().as_millis());

    loop {
        let cycle = Timer::after(Duration::from_millis(u64::from(THREAD_CYCLE_MS)));

        match select(bus.wait(), cycle).await {
            Either::First(flags) => {
                supervisor.note_activity();

                if flags.contains(StatusFlags::BUTTON_PRESSED) {
                    let mode = adv_payload.cycle_mode();
                    info!("mode button: -> {}", mode);
                    MODE_CHANGED.signal(adv_payload);
                }

                if wait != Wait::Finished {
                    wait = machine.poll(flags, shared, &mut link);
                    // Every processed wake restarts the bounded window,
                    // so each pairing step gets the full timeout.
                    window.rearm(wait, Instant::now().as_millis());
                    roles.led(machine.state() == LinkState::Confirmed);
                    if machine.state() == LinkState::Confirmed {
                        info!("train peer paired");
                    }
                }
            }
            Either::Second(()) => {
                wdt.clear_counter();

                // Bounded pairing wait expired?
                if window.expired(Instant::now().as_millis()) {
                    info!("pairing step timed out, rescanning");
                    wait = machine.on_wait_timeout(shared, &mut link);
                    window.rearm(wait, Instant::now().as_millis());
                    supervisor.note_activity();
                    continue;
                }

                if supervisor.tick() {
                    info!("idle for 5 s, shutting down");
                    roles.motors_off();
                    perform_shutdown(&mut board);
                }

                // Idle cycle: offer the rest of the cycle to the sleep
                // controller (ms -> 32.768 kHz ticks).
                let budget = THREAD_CYCLE_MS * (SLEEP_CLOCK_HZ / 1000);
                let _ = power.idle(budget, &mut sleep_hw, &mut sleep_sched);
            }
        }
    }
}
