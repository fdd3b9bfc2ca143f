#![no_std]
#![no_main]

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use beacon_echo_firmware::clock::EmbassyClock;
use beacon_echo_firmware::config::{exit, spi};
use beacon_echo_firmware::radio::{RadioConfig, Sx1262Driver, Sx1262Pins};
use beacon_echo_firmware::scheduler::EndpointConfig;
use beacon_echo_firmware::shutdown::ShutdownLatch;
use beacon_echo_firmware::tasks::{echo_task, stop_button_task};
use embassy_executor::Spawner;
use esp_backtrace as _;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode as SpiMode;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::Async;
use static_cell::StaticCell;

/// Concrete SX1262 driver on this board
type Radio = Sx1262Driver<
    Spi<'static, Async>,
    Output<'static>,
    Input<'static>,
    Output<'static>,
    Input<'static>,
    EmbassyClock,
>;

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

/// Written by the stop button, read by the echo loop
static SHUTDOWN: ShutdownLatch = ShutdownLatch::new(panic_stop);

/// esp-backtrace prints the message and halts
fn panic_stop() -> ! {
    panic!("Double stop request, panic stop (status {})", exit::PANIC_STOP);
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    log::info!("Beacon echo endpoint startup");

    // Configure SPI for LoRa
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(spi::FREQUENCY_MHZ))
            .with_mode(SpiMode::_0),
    )
    .unwrap()
    .with_sck(peripherals.GPIO7)
    .with_miso(peripherals.GPIO8)
    .with_mosi(peripherals.GPIO9)
    .into_async();

    // Configure LoRa control pins
    let lora_pins = Sx1262Pins {
        nss: Output::new(peripherals.GPIO41, Level::High, OutputConfig::default()),
        dio1: Input::new(peripherals.GPIO39, InputConfig::default().with_pull(Pull::Down)),
        nrst: Output::new(peripherals.GPIO42, Level::High, OutputConfig::default()),
        busy: Input::new(peripherals.GPIO40, InputConfig::default().with_pull(Pull::Down)),
    };

    let radio = Sx1262Driver::new(spi, lora_pins, EmbassyClock);

    // BOOT button, active low
    let button = Input::new(peripherals.GPIO0, InputConfig::default().with_pull(Pull::Up));

    // Factory MAC doubles as the beacon hardware address
    let hardware_address = esp_hal::efuse::Efuse::read_base_mac_address();

    // Create and run the embassy executor
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(async_main(spawner, radio, button, hardware_address));
    })
}

#[embassy_executor::task]
async fn async_main(
    spawner: Spawner,
    mut radio: Radio,
    button: Input<'static>,
    hardware_address: [u8; 6],
) {
    if let Err(e) = radio.init(&RadioConfig::default()).await {
        // Nothing to return to; report the status and park
        log::error!("Radio init failed: {:?} (status {})", e, e.exit_code());
        return;
    }
    log::info!("Radio init success");

    spawner.must_spawn(button_task(button));
    spawner.must_spawn(service_task(radio, hardware_address));
}

#[embassy_executor::task]
async fn button_task(button: Input<'static>) {
    stop_button_task(button, EmbassyClock, &SHUTDOWN).await
}

#[embassy_executor::task]
async fn service_task(radio: Radio, hardware_address: [u8; 6]) {
    let config = EndpointConfig {
        hardware_address,
        ..EndpointConfig::default()
    };

    let (status, mut radio) = echo_task(radio, EmbassyClock, &SHUTDOWN, config).await;

    if let Err(e) = radio.set_standby().await {
        log::warn!("Radio standby failed: {:?}", e);
    }
    log::info!("Beacon echo endpoint ending (status {})", status.code());
}
