//! Spectra Frame Firmware - ESP32-S3 driving a 13.3" Spectra 6 e-paper panel
//!
//! Environment variables required:
//! - WIFI_SSID: WiFi network name
//! - WIFI_PASS: WiFi password
//!
//! Every boot runs one wake cycle and goes back to deep sleep. Holding the
//! config button for a second at boot serves the configuration API instead.

#![no_std]
#![no_main]

use core::time::Duration as CoreDuration;

use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    efuse::Efuse,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull, RtcPinWithResistors},
    ram,
    rng::Rng,
    rtc_cntl::{
        Rtc,
        sleep::{Ext0WakeupSource, TimerWakeupSource, WakeupLevel},
    },
    spi::{
        Mode,
        master::{Config as SpiConfig, Spi},
    },
    system::SleepSource,
    time::Rate,
    timer::timg::TimerGroup,
};
use esp_println::println;
use esp_radio::{
    Controller,
    wifi::{Config as WifiConfig, WifiDevice},
};
use log::{error, info, warn};
use spectra_frame_core::framebuffer::{HEIGHT, WIDTH};
use spectra_frame_core::http::device_id;
use spectra_frame_core::panel::{PanelConfig, Pins, Spectra6};
use spectra_frame_core::state::WakeCause;
use spectra_frame_core::wake::{self, ContentSource, CycleOutcome, WakeCycle};
use spectra_frame_core::{ConfigStore, RetainedState};
use spectra_frame_firmware::battery::BatteryMonitor;
use spectra_frame_firmware::clock::RtcClock;
use spectra_frame_firmware::net::WifiNet;
use spectra_frame_firmware::portal;
use spectra_frame_firmware::retained::{self, Origin};
use spectra_frame_firmware::storage::SdStorage;

esp_bootloader_esp_idf::esp_app_desc!();

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

const SSID: &str = env!("WIFI_SSID");
const PASSWORD: &str = env!("WIFI_PASS");

/// Button hold at boot that enters configuration mode
const CONFIG_HOLD_MS: u32 = 1000;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let sleep_source = esp_hal::rtc_cntl::wakeup_cause();

    // Config button on GPIO2 (RTC capable, active low), sampled once
    let button = Input::new(peripherals.GPIO2, InputConfig::default().with_pull(Pull::Up));
    let config_mode = button_held(&button, CONFIG_HOLD_MS);
    drop(button);

    println!("Boot! Wake source: {:?}", sleep_source);

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    // Framebuffer lives in PSRAM
    esp_alloc::psram_allocator!(&peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(
        timg0.timer0,
        #[cfg(target_arch = "riscv32")]
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT)
            .software_interrupt0,
    );

    // ==================== Panel ====================
    // Constructed first so the panel rail is held off for the whole boot.
    // SCK=GPIO7, MOSI=GPIO9, CS0=GPIO44, CS1=GPIO41, DC=GPIO10, RST=GPIO38,
    // BUSY=GPIO4, PWR=GPIO43
    let panel_spi = Spi::new(
        peripherals.SPI3,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(10))
            .with_mode(Mode::_0),
    )
    .expect("panel SPI init failed")
    .with_sck(peripherals.GPIO7)
    .with_mosi(peripherals.GPIO9);

    let pins = Pins {
        cs_primary: Output::new(peripherals.GPIO44, Level::High, OutputConfig::default()),
        cs_secondary: Output::new(peripherals.GPIO41, Level::High, OutputConfig::default()),
        dc: Output::new(peripherals.GPIO10, Level::Low, OutputConfig::default()),
        rst: Output::new(peripherals.GPIO38, Level::High, OutputConfig::default()),
        busy: Input::new(
            peripherals.GPIO4,
            InputConfig::default().with_pull(Pull::Up),
        ),
        power: Output::new(peripherals.GPIO43, Level::Low, OutputConfig::default()),
    };
    let mut panel = Spectra6::new(panel_spi, pins, Delay, PanelConfig::default());

    // ==================== SD card ====================
    // CS=GPIO14, CLK=GPIO12, MISO=GPIO13, MOSI=GPIO11
    let sd_spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(20))
            .with_mode(Mode::_0),
    )
    .expect("SD SPI init failed")
    .with_sck(peripherals.GPIO12)
    .with_mosi(peripherals.GPIO11)
    .with_miso(peripherals.GPIO13);

    let sd_cs = Output::new(peripherals.GPIO14, Level::High, OutputConfig::default());
    let sd_spi_device = ExclusiveDevice::new_no_delay(sd_spi, sd_cs).expect("SD chip select");

    // Without a card the frame still runs on defaults
    let mut storage = match SdStorage::new(sd_spi_device, Delay) {
        Ok(storage) => Some(storage),
        Err(e) => {
            error!("SD card unavailable: {:?}", e);
            None
        }
    };

    let (mut state, origin) = retained::load(&mut storage);
    state.on_boot(wake_cause(sleep_source, origin));

    // ==================== WiFi ====================
    let radio = mk_static!(Controller<'static>, esp_radio::init().expect("radio init failed"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, WifiConfig::default())
            .expect("WiFi init failed");

    let rng = Rng::new();
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        rng.random() as u64,
    );
    spawner.spawn(net_task(runner)).ok();
    let mut network = WifiNet::new(wifi_controller, stack, SSID, PASSWORD);

    let device_id = device_id(&Efuse::mac_address());
    info!("Device {}", device_id);

    let mut rtc = Rtc::new(peripherals.LPWR);

    if config_mode {
        let seconds = configuration_mode(&mut network, &mut storage, &mut state, &device_id).await;
        sleep(&mut rtc, &mut state, &mut storage, seconds);
    }

    // ==================== Wake cycle ====================
    let mut battery = BatteryMonitor::new(peripherals.GPIO1, peripherals.ADC1);
    let mut clock = RtcClock::new(&rtc);

    let (mut state, outcome) = {
        let mut store = ConfigStore::load(&mut storage);
        WakeCycle {
            store: &mut store,
            panel: &mut panel,
            network: &mut network,
            battery: &mut battery,
            clock: &mut clock,
            device_id,
        }
        .run::<WIDTH, HEIGHT>(state)
        .await
    };

    match outcome {
        CycleOutcome::Sleep { seconds } => sleep(&mut rtc, &mut state, &mut storage, seconds),
        CycleOutcome::Restart => {
            retained::commit(&state, &mut storage);
            warn!("Restarting after panel failure");
            esp_hal::system::software_reset()
        }
    }
}

/// Serve the local configuration API until a reboot is requested.
/// Returns the sleep duration when WiFi is unavailable.
async fn configuration_mode<S: spectra_frame_core::storage::Storage>(
    network: &mut WifiNet,
    storage: &mut S,
    state: &mut RetainedState,
    device_id: &str,
) -> u64 {
    info!("Configuration mode");
    let mut store = ConfigStore::load(&mut *storage);

    if let Err(e) = network.connect().await {
        warn!("WiFi unavailable ({:?}), leaving configuration mode", e);
        return wake::fallback_sleep(store.config());
    }

    portal::serve(network.stack(), &mut store, device_id).await;
    network.release().await;
    drop(store);

    retained::commit(state, storage);
    info!("Rebooting");
    esp_hal::system::software_reset()
}

/// Poll the active-low button until released or `hold_ms` elapsed
fn button_held(button: &Input<'_>, hold_ms: u32) -> bool {
    let delay = esp_hal::delay::Delay::new();
    let mut held_ms = 0;
    while button.is_low() {
        delay.delay_millis(50);
        held_ms += 50;
        if held_ms >= hold_ms {
            return true;
        }
    }
    false
}

fn wake_cause(source: SleepSource, origin: Origin) -> WakeCause {
    match source {
        SleepSource::Timer => WakeCause::Timer,
        SleepSource::Ext0 | SleepSource::Ext1 | SleepSource::Gpio => WakeCause::Button,
        // Not a sleep wake: RTC memory only survives a software reset
        SleepSource::Undefined if origin == Origin::Rtc => WakeCause::Restart,
        SleepSource::Undefined => WakeCause::PowerOn,
        _ => WakeCause::Other,
    }
}

/// Commit retained state and deep sleep until the timer or the button
fn sleep<S: spectra_frame_core::storage::Storage>(
    rtc: &mut Rtc,
    state: &mut RetainedState,
    storage: &mut S,
    seconds: u64,
) -> ! {
    state.last_sleep_secs = seconds;
    retained::commit(state, storage);

    // Reclaim GPIO2 for the wake source
    let key_pin = unsafe { esp_hal::peripherals::GPIO2::steal() };
    info!(
        "Entering deep sleep for {} seconds (press button to wake early)...",
        seconds
    );
    enter_deep_sleep(rtc, key_pin, seconds)
}

/// Enter deep sleep with timer and config button wake sources
fn enter_deep_sleep<P: RtcPinWithResistors>(rtc: &mut Rtc, key_pin: P, seconds: u64) -> ! {
    let timer = TimerWakeupSource::new(CoreDuration::from_secs(seconds));

    // Pull-up so the pin doesn't float and trigger spurious wakes
    key_pin.rtcio_pullup(true);
    key_pin.rtcio_pulldown(false);
    let ext0 = Ext0WakeupSource::new(key_pin, WakeupLevel::Low);

    // Let serial output flush
    esp_hal::delay::Delay::new().delay_millis(100);

    rtc.sleep_deep(&[&timer, &ext0])
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
