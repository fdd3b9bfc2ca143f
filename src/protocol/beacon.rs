//! Beacon packet codec
//!
//! # Wire Format
//!
//! Every beacon is exactly 32 bytes, packed, multi-byte fields little-endian:
//! ```text
//! [rssi_up: i8][rssi_down: i8][hw_address: [u8; 6]][freq_mhz: f32 LE]
//! [seqno: u8][bw: u8][sf: u8][cr: u8][text: [u8; 16]]
//! ```
//!
//! - `rssi_up`: RSSI reported by the peer (always 0, no peer report exists)
//! - `rssi_down`: RSSI of the last frame received here
//! - `hw_address`: endpoint identifier
//! - `freq_mhz`: configured centre frequency
//! - `seqno`: beacon counter, wraps at 256
//! - `bw` / `sf` / `cr`: modulation register codes at build time
//! - `text`: short string, NUL padded, always NUL terminated

use super::ProtocolError;
use crate::config::protocol::{BEACON_LEN, BEACON_TEXT_LEN};

const RSSI_UP: usize = 0;
const RSSI_DOWN: usize = 1;
const HW_ADDRESS: usize = 2;
const FREQUENCY: usize = 8;
const SEQUENCE: usize = 12;
const BANDWIDTH: usize = 13;
const SPREADING_FACTOR: usize = 14;
const CODING_RATE: usize = 15;
const TEXT: usize = 16;

/// Snapshot of the radio configuration copied into each beacon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioState {
    pub frequency_mhz: f32,
    pub bandwidth_code: u8,
    pub spreading_factor_code: u8,
    pub coding_rate_code: u8,
    pub last_rssi: i8,
}

/// Decoded beacon record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconPacket {
    pub rssi_uplink: i8,
    pub rssi_downlink: i8,
    pub hardware_address: [u8; 6],
    pub frequency_mhz: f32,
    pub sequence_number: u8,
    pub bandwidth_code: u8,
    pub spreading_factor_code: u8,
    pub coding_rate_code: u8,
    pub payload_text: [u8; BEACON_TEXT_LEN],
}

/// Build a beacon from the current radio state.
///
/// Fails with [`ProtocolError::PayloadTooLong`] if `text` needs more than
/// 15 bytes, since the field must keep a NUL terminator.
pub fn build_beacon(
    sequence_number: u8,
    text: &str,
    hardware_address: [u8; 6],
    state: &RadioState,
) -> Result<BeaconPacket, ProtocolError> {
    let bytes = text.as_bytes();
    if bytes.len() >= BEACON_TEXT_LEN {
        return Err(ProtocolError::PayloadTooLong { len: bytes.len() });
    }

    let mut payload_text = [0u8; BEACON_TEXT_LEN];
    payload_text[..bytes.len()].copy_from_slice(bytes);

    Ok(BeaconPacket {
        rssi_uplink: 0,
        rssi_downlink: state.last_rssi,
        hardware_address,
        frequency_mhz: state.frequency_mhz,
        sequence_number,
        bandwidth_code: state.bandwidth_code,
        spreading_factor_code: state.spreading_factor_code,
        coding_rate_code: state.coding_rate_code,
        payload_text,
    })
}

impl BeaconPacket {
    /// Serialise to the 32-byte wire layout
    pub fn encode(&self) -> [u8; BEACON_LEN] {
        let mut out = [0u8; BEACON_LEN];
        out[RSSI_UP] = self.rssi_uplink as u8;
        out[RSSI_DOWN] = self.rssi_downlink as u8;
        out[HW_ADDRESS..FREQUENCY].copy_from_slice(&self.hardware_address);
        out[FREQUENCY..SEQUENCE].copy_from_slice(&self.frequency_mhz.to_le_bytes());
        out[SEQUENCE] = self.sequence_number;
        out[BANDWIDTH] = self.bandwidth_code;
        out[SPREADING_FACTOR] = self.spreading_factor_code;
        out[CODING_RATE] = self.coding_rate_code;
        out[TEXT..].copy_from_slice(&self.payload_text);
        out
    }

    /// Parse a beacon from exactly [`BEACON_LEN`] bytes
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != BEACON_LEN {
            return Err(ProtocolError::WrongLength { len: data.len() });
        }

        let mut hardware_address = [0u8; 6];
        hardware_address.copy_from_slice(&data[HW_ADDRESS..FREQUENCY]);

        let mut frequency = [0u8; 4];
        frequency.copy_from_slice(&data[FREQUENCY..SEQUENCE]);

        let mut payload_text = [0u8; BEACON_TEXT_LEN];
        payload_text.copy_from_slice(&data[TEXT..]);

        Ok(Self {
            rssi_uplink: data[RSSI_UP] as i8,
            rssi_downlink: data[RSSI_DOWN] as i8,
            hardware_address,
            frequency_mhz: f32::from_le_bytes(frequency),
            sequence_number: data[SEQUENCE],
            bandwidth_code: data[BANDWIDTH],
            spreading_factor_code: data[SPREADING_FACTOR],
            coding_rate_code: data[CODING_RATE],
            payload_text,
        })
    }

    /// Text field up to the first NUL, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        let end = self
            .payload_text
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(BEACON_TEXT_LEN);
        core::str::from_utf8(&self.payload_text[..end]).ok()
    }
}
