//! Hardware and protocol configuration constants for the ESP32-S3 with WIO-SX1262

/// SPI pins for LoRa module
pub mod spi {
    pub const SCLK: u8 = 7;
    pub const MISO: u8 = 8;
    pub const MOSI: u8 = 9;
    pub const FREQUENCY_MHZ: u32 = 1;
}

/// LoRa control pins
pub mod lora_pins {
    pub const NSS: u8 = 41;
    pub const DIO1: u8 = 39;
    pub const NRST: u8 = 42;
    pub const BUSY: u8 = 40;
}

/// Operator stop button (BOOT button, active low)
pub mod button {
    pub const PIN: u8 = 0;
    pub const DEBOUNCE_MS: u64 = 50;
}

/// TCXO configuration
pub mod tcxo {
    /// TCXO voltage in volts (1.8V for WIO-SX1262)
    pub const VOLTAGE_V: f32 = 1.8;

    /// TCXO voltage code for SX1262 register
    /// 0x02 = 1.8V
    pub const VOLTAGE_CODE: u8 = 0x02;
}

/// Default radio configuration
pub mod radio_defaults {
    /// US ISM band frequency
    pub const FREQUENCY_HZ: u32 = 915_000_000;
    pub const SPREADING_FACTOR: u8 = 7;
    pub const BANDWIDTH_KHZ: u32 = 500;
    /// Coding rate 4/5
    pub const CODING_RATE: u8 = 5;
    /// SX1262 high power PA ceiling
    pub const TX_POWER_DBM: i8 = 22;
    /// Upper bound on waiting for TX_DONE
    pub const TX_TIMEOUT_MS: u32 = 10_000;
}

/// Beacon and echo wire constants
pub mod protocol {
    /// Encoded beacon size
    pub const BEACON_LEN: usize = 32;

    /// Fixed text field inside the beacon, NUL padded
    pub const BEACON_TEXT_LEN: usize = 16;

    /// Longest frame the transport accepts (matches RadioHead peers)
    pub const MAX_FRAME_LEN: usize = 251;

    /// Marker prepended to every echoed frame
    pub const ECHO_PREFIX: &[u8] = b"echo: ";

    /// Identifier used until the hardware provides one
    pub const DEFAULT_HW_ADDRESS: [u8; 6] = [0x98, 0x76, 0xb6, 0x5c, 0x00, 0x00];
}

/// Main loop timing
pub mod scheduler {
    pub const BEACON_INTERVAL_MS: u64 = 3000;
    pub const IDLE_MS: u32 = 25;
    pub const BEACON_TEXT: &str = "hello server";
}

/// Process status codes reported on termination
pub mod exit {
    pub const CLEAN: i32 = 0;
    pub const RADIO_INIT_FAILED: i32 = -95;
    pub const SET_FREQUENCY_FAILED: i32 = -96;
    pub const MODEM_CONFIG_FAILED: i32 = -97;
    pub const PANIC_STOP: i32 = -99;
}
