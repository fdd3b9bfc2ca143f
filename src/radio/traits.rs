//! Radio port trait for abstraction and testability
//!
//! This trait defines the capability set the main loop needs from the
//! transceiver, allowing the SX1262 driver to be swapped with a mock for testing.

use crate::config::exit;
use crate::config::protocol::MAX_FRAME_LEN;
use crate::protocol::RadioState;
use core::future::Future;
use heapless::Vec;

/// Errors that can occur during radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Operation timed out
    Timeout,
    /// CRC error in received packet
    CrcError,
    /// Transmission failed
    TransmitFailed,
    /// Reception failed
    ReceiveFailed,
    /// Invalid configuration
    InvalidConfig,
    /// Radio busy timeout
    BusyTimeout,
    /// SPI communication error
    SpiError,
    /// Radio not initialised
    NotInitialised,
}

/// Fatal setup failures, each with its own process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Reset or base configuration failed
    Radio(RadioError),
    /// Centre frequency rejected
    Frequency(RadioError),
    /// Modulation or power configuration rejected
    ModemConfig(RadioError),
}

impl InitError {
    pub fn exit_code(&self) -> i32 {
        match self {
            InitError::Radio(_) => exit::RADIO_INIT_FAILED,
            InitError::Frequency(_) => exit::SET_FREQUENCY_FAILED,
            InitError::ModemConfig(_) => exit::MODEM_CONFIG_FAILED,
        }
    }
}

/// Configuration for LoRa modulation
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// Centre frequency in Hz
    pub frequency_hz: u32,
    /// Spreading factor (5-12)
    pub spreading_factor: u8,
    /// Bandwidth in kHz (7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125, 250, 500)
    pub bandwidth_khz: u32,
    /// Coding rate denominator (5-8 for 4/5 to 4/8)
    pub coding_rate: u8,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        use crate::config::radio_defaults;

        Self {
            frequency_hz: radio_defaults::FREQUENCY_HZ,
            spreading_factor: radio_defaults::SPREADING_FACTOR,
            bandwidth_khz: radio_defaults::BANDWIDTH_KHZ,
            coding_rate: radio_defaults::CODING_RATE,
            tx_power_dbm: radio_defaults::TX_POWER_DBM,
        }
    }
}

impl RadioConfig {
    pub fn frequency_mhz(&self) -> f32 {
        self.frequency_hz as f32 / 1_000_000.0
    }

    /// SX126x bandwidth register code
    pub fn bandwidth_code(&self) -> u8 {
        match self.bandwidth_khz {
            7 | 8 => 0x00,   // 7.8 kHz
            10 => 0x08,      // 10.4 kHz
            15 | 16 => 0x01, // 15.6 kHz
            20 | 21 => 0x09, // 20.8 kHz
            31 => 0x02,      // 31.25 kHz
            41 | 42 => 0x0A, // 41.7 kHz
            62 | 63 => 0x03, // 62.5 kHz
            125 => 0x04,     // 125 kHz
            250 => 0x05,     // 250 kHz
            500 => 0x06,     // 500 kHz
            _ => 0x04,       // Default to 125 kHz
        }
    }

    pub fn spreading_factor_code(&self) -> u8 {
        self.spreading_factor
    }

    /// SX126x coding rate register code
    pub fn coding_rate_code(&self) -> u8 {
        match self.coding_rate {
            5 => 0x01, // 4/5
            6 => 0x02, // 4/6
            7 => 0x03, // 4/7
            8 => 0x04, // 4/8
            _ => 0x01, // Default to 4/5
        }
    }

    /// Low data rate optimisation: required for SF11/SF12 at 125kHz and below
    pub fn low_data_rate_optimise(&self) -> bool {
        self.spreading_factor >= 11 && self.bandwidth_khz <= 125
    }
}

/// Received frame with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RxFrame {
    /// Received bytes
    pub data: Vec<u8, MAX_FRAME_LEN>,
    /// Received Signal Strength Indicator in dBm
    pub rssi: i8,
}

/// Abstract radio interface consumed by the scheduler
pub trait RadioPort {
    /// Start transmitting one frame. Success does not imply delivery.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), RadioError>>;

    /// Wait until the in-flight transmission is confirmed sent.
    ///
    /// Bounded by the port's own TX timeout.
    fn wait_send_complete(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Check the latched "frame ready" condition without waiting for one
    fn available(&mut self) -> impl Future<Output = bool>;

    /// Take the next ready frame
    fn recv(&mut self) -> impl Future<Output = Result<RxFrame, RadioError>>;

    /// RSSI of the most recently received frame
    fn last_rssi(&self) -> i8;

    fn frequency_mhz(&self) -> f32;

    fn bandwidth_code(&self) -> u8;

    fn spreading_factor_code(&self) -> u8;

    fn coding_rate_code(&self) -> u8;

    /// Capture the fields a beacon reports
    fn snapshot(&self) -> RadioState {
        RadioState {
            frequency_mhz: self.frequency_mhz(),
            bandwidth_code: self.bandwidth_code(),
            spreading_factor_code: self.spreading_factor_code(),
            coding_rate_code: self.coding_rate_code(),
            last_rssi: self.last_rssi(),
        }
    }
}
