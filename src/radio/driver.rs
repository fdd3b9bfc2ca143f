//! SX1262 LoRa driver
//!
//! Implements [`RadioPort`] over SPI with the DIO1 line as the latched
//! interrupt. The radio idles in continuous receive; a transmission is
//! started by `send` and finished by `wait_send_complete` (or by the next
//! `send` / `available` call), after which continuous receive resumes.
//!
//! TX and RX share the data buffer from offset 0. A received frame that
//! has not been read yet when `send` is called is copied out first and
//! handed out by the next `available` / `recv`.

use crate::clock::Clock;
use crate::config::protocol::MAX_FRAME_LEN;
use crate::config::{radio_defaults, tcxo};
use crate::radio::traits::{InitError, RadioConfig, RadioError, RadioPort, RxFrame};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::spi::SpiBus;
use heapless::Vec;

/// SX1262 command opcodes
mod cmd {
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PACKET_STATUS: u8 = 0x14;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const CLEAR_IRQ_STATUS: u8 = 0x02;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
}

/// SX1262 register addresses
mod reg {
    /// Over-current protection register
    pub const OCP_CONFIGURATION: u16 = 0x08E7;
}

/// Packet types
mod packet_type {
    pub const LORA: u8 = 0x01;
}

/// IRQ masks
mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const CRC_ERR: u16 = 0x0040;
    pub const TIMEOUT: u16 = 0x0200;
    pub const ALL: u16 = 0xFFFF;
}

/// STDBY_RC
const STANDBY_RC: u8 = 0x00;

/// Control pins for SX1262
pub struct Sx1262Pins<Nss, Dio1, Nrst, Busy> {
    pub nss: Nss,
    pub dio1: Dio1,
    pub nrst: Nrst,
    pub busy: Busy,
}

/// SX1262 LoRa driver
///
/// Uses dependency injection for SPI, GPIO pins and the delay source,
/// with manual NSS control.
pub struct Sx1262Driver<Spi, Nss, Dio1, Nrst, Busy, C>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin,
    Nrst: OutputPin,
    Busy: InputPin,
    C: Clock,
{
    spi: Spi,
    nss: Nss,
    dio1: Dio1,
    nrst: Nrst,
    busy: Busy,
    clock: C,
    initialised: bool,
    config: RadioConfig,
    tx_in_flight: bool,
    /// Frame copied out of the shared buffer ahead of a transmission
    pending: Option<RxFrame>,
    last_rssi: i8,
}

impl<Spi, Nss, Dio1, Nrst, Busy, C> Sx1262Driver<Spi, Nss, Dio1, Nrst, Busy, C>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin,
    Nrst: OutputPin,
    Busy: InputPin,
    C: Clock,
{
    /// Create a new SX1262 driver
    pub fn new(spi: Spi, pins: Sx1262Pins<Nss, Dio1, Nrst, Busy>, clock: C) -> Self {
        Self {
            spi,
            nss: pins.nss,
            dio1: pins.dio1,
            nrst: pins.nrst,
            busy: pins.busy,
            clock,
            initialised: false,
            config: RadioConfig::default(),
            tx_in_flight: false,
            pending: None,
            last_rssi: 0,
        }
    }

    /// Bring the radio up with `config` and leave it in continuous receive.
    ///
    /// Each stage maps to its own [`InitError`] so the caller can report a
    /// distinct status.
    pub async fn init(&mut self, config: &RadioConfig) -> Result<(), InitError> {
        self.init_base().await.map_err(InitError::Radio)?;

        self.set_frequency(config.frequency_hz)
            .await
            .map_err(InitError::Frequency)?;
        log::info!("Radio: frequency set to {} MHz", config.frequency_mhz());

        self.apply_modem_config(config)
            .await
            .map_err(InitError::ModemConfig)?;
        log::info!(
            "Radio: BW={} kHz, CR=4/{}, SF={}, {} dBm",
            config.bandwidth_khz,
            config.coding_rate,
            config.spreading_factor,
            config.tx_power_dbm
        );
        self.config = config.clone();

        self.start_receive_mode().await.map_err(InitError::Radio)?;

        self.initialised = true;
        Ok(())
    }

    /// Put the radio in standby (used on shutdown)
    pub async fn set_standby(&mut self) -> Result<(), RadioError> {
        self.tx_in_flight = false;
        self.set_standby_internal().await
    }

    /// Reset, TCXO, RF switch, current limit, packet type and buffers
    async fn init_base(&mut self) -> Result<(), RadioError> {
        self.reset().await?;
        self.wait_not_busy().await?;

        self.set_standby_internal().await?;

        // Configure TCXO (1.8V)
        self.configure_tcxo().await?;
        self.clock.sleep_ms(10).await;

        // DIO2 drives the antenna switch between TX and RX
        self.configure_dio2_rf_switch().await?;

        self.set_current_limit(140).await?;
        self.set_packet_type_lora().await?;
        self.set_buffer_base_address(0x00, 0x00).await
    }

    /// Modulation, PA and TX power
    async fn apply_modem_config(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        if !(5..=12).contains(&config.spreading_factor) {
            return Err(RadioError::InvalidConfig);
        }
        self.set_modulation_params(config).await?;
        // SetPaConfig must precede SetTxParams
        self.configure_pa().await?;
        self.set_tx_power(config.tx_power_dbm).await
    }

    /// Reset sequencing: high, low, high with settling time
    async fn reset(&mut self) -> Result<(), RadioError> {
        let _ = self.nrst.set_high();
        self.clock.sleep_ms(50).await;
        let _ = self.nrst.set_low();
        self.clock.sleep_ms(50).await;
        let _ = self.nrst.set_high();
        self.clock.sleep_ms(50).await;
        log::debug!("Radio: reset complete");
        Ok(())
    }

    /// Wait for the BUSY pin to go low
    async fn wait_not_busy(&mut self) -> Result<(), RadioError> {
        // Poll with timeout
        for _ in 0..1000 {
            if self.busy.is_low().unwrap_or(false) {
                return Ok(());
            }
            self.clock.sleep_us(100).await;
        }
        Err(RadioError::BusyTimeout)
    }

    /// Write a command to the radio
    async fn write_command(&mut self, cmd: u8, data: &[u8]) -> Result<(), RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        let mut buf = [0u8; 16];
        buf[0] = cmd;
        let len = 1 + data.len().min(15);
        buf[1..len].copy_from_slice(&data[..len - 1]);

        let result = self.spi.write(&buf[..len]).await;
        let _ = self.nss.set_high();

        result.map_err(|_| RadioError::SpiError)
    }

    /// Read data from the radio
    async fn read_command(&mut self, cmd: u8, len: usize) -> Result<[u8; 16], RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        // SX1262 requires command byte + NOP byte, then reads
        let mut tx_buf = [0u8; 18];
        let mut rx_buf = [0u8; 18];
        tx_buf[0] = cmd;

        let total_len = 2 + len;
        let result = self
            .spi
            .transfer(&mut rx_buf[..total_len], &tx_buf[..total_len])
            .await;
        let _ = self.nss.set_high();
        result.map_err(|_| RadioError::SpiError)?;

        // Response starts after status byte (index 2)
        let mut out = [0u8; 16];
        out[..len].copy_from_slice(&rx_buf[2..2 + len]);

        Ok(out)
    }

    /// Configure DIO3 as TCXO control
    async fn configure_tcxo(&mut self) -> Result<(), RadioError> {
        // SetDIO3AsTcxoCtrl: voltage code + timeout (24-bit)
        let timeout: u32 = 0x000140; // ~5ms startup time
        let data = [
            tcxo::VOLTAGE_CODE,
            ((timeout >> 16) & 0xFF) as u8,
            ((timeout >> 8) & 0xFF) as u8,
            (timeout & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_DIO3_AS_TCXO_CTRL, &data).await
    }

    async fn configure_dio2_rf_switch(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])
            .await
    }

    async fn write_register(&mut self, addr: u16, value: u8) -> Result<(), RadioError> {
        let data = [(addr >> 8) as u8, (addr & 0xFF) as u8, value];
        self.write_command(cmd::WRITE_REGISTER, &data).await
    }

    /// Set OCP current limit in mA (register step is 2.5 mA)
    async fn set_current_limit(&mut self, current_ma: u16) -> Result<(), RadioError> {
        let ocp_value = ((current_ma as u32 * 10) / 25).min(63) as u8;
        self.write_register(reg::OCP_CONFIGURATION, ocp_value).await
    }

    async fn set_standby_internal(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_STANDBY, &[STANDBY_RC]).await
    }

    async fn set_packet_type_lora(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_PACKET_TYPE, &[packet_type::LORA])
            .await
    }

    /// Set RF frequency
    async fn set_frequency(&mut self, freq_hz: u32) -> Result<(), RadioError> {
        if !(150_000_000..=960_000_000).contains(&freq_hz) {
            return Err(RadioError::InvalidConfig);
        }
        // Frequency = (freq_rf * 2^25) / 32MHz
        let freq_reg = ((freq_hz as u64 * (1 << 25)) / 32_000_000) as u32;
        self.write_command(cmd::SET_RF_FREQUENCY, &freq_reg.to_be_bytes())
            .await
    }

    async fn set_modulation_params(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        let data = [
            config.spreading_factor_code(),
            config.bandwidth_code(),
            config.coding_rate_code(),
            config.low_data_rate_optimise() as u8,
        ];
        self.write_command(cmd::SET_MODULATION_PARAMS, &data).await
    }

    async fn set_packet_params(&mut self, payload_len: u8) -> Result<(), RadioError> {
        let data = [
            0x00, 0x08, // Preamble length: 8 symbols
            0x00, // Explicit header
            payload_len,
            0x01, // CRC on
            0x00, // Standard IQ
        ];
        self.write_command(cmd::SET_PACKET_PARAMS, &data).await
    }

    /// SX1262 high power PA: paDutyCycle=0x04, hpMax=0x07, deviceSel=0x00, paLut=0x01
    async fn configure_pa(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])
            .await
    }

    async fn set_tx_power(&mut self, power_dbm: i8) -> Result<(), RadioError> {
        // HP PA range is -9 to +22 dBm, sent as two's complement
        let power = power_dbm.clamp(-9, 22) as u8;
        let data = [power, 0x04]; // Power, ramp time 200us
        self.write_command(cmd::SET_TX_PARAMS, &data).await
    }

    async fn set_buffer_base_address(&mut self, tx_base: u8, rx_base: u8) -> Result<(), RadioError> {
        self.write_command(cmd::SET_BUFFER_BASE_ADDRESS, &[tx_base, rx_base])
            .await
    }

    /// Route `irq_mask` to DIO1
    async fn configure_irq(&mut self, irq_mask: u16) -> Result<(), RadioError> {
        let [hi, lo] = irq_mask.to_be_bytes();
        let data = [hi, lo, hi, lo, 0x00, 0x00, 0x00, 0x00];
        self.write_command(cmd::SET_DIO_IRQ_PARAMS, &data).await
    }

    async fn clear_irq(&mut self, irq_mask: u16) -> Result<(), RadioError> {
        self.write_command(cmd::CLEAR_IRQ_STATUS, &irq_mask.to_be_bytes())
            .await
    }

    async fn get_irq_status(&mut self) -> Result<u16, RadioError> {
        let result = self.read_command(cmd::GET_IRQ_STATUS, 2).await?;
        Ok(u16::from_be_bytes([result[0], result[1]]))
    }

    /// Write data to TX buffer
    async fn write_buffer(&mut self, offset: u8, data: &[u8]) -> Result<(), RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        // Command + offset + data
        let mut buf = [0u8; 258];
        buf[0] = cmd::WRITE_BUFFER;
        buf[1] = offset;
        let len = data.len().min(256);
        buf[2..2 + len].copy_from_slice(&data[..len]);

        let result = self.spi.write(&buf[..2 + len]).await;
        let _ = self.nss.set_high();

        result.map_err(|_| RadioError::SpiError)
    }

    /// Read data from RX buffer
    async fn read_buffer(&mut self, offset: u8, len: usize) -> Result<Vec<u8, MAX_FRAME_LEN>, RadioError> {
        if len > MAX_FRAME_LEN {
            return Err(RadioError::ReceiveFailed);
        }

        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        // Command + offset + NOP + data
        let mut tx_buf = [0u8; MAX_FRAME_LEN + 3];
        let mut rx_buf = [0u8; MAX_FRAME_LEN + 3];
        tx_buf[0] = cmd::READ_BUFFER;
        tx_buf[1] = offset;

        let total_len = 3 + len;
        let result = self
            .spi
            .transfer(&mut rx_buf[..total_len], &tx_buf[..total_len])
            .await;
        let _ = self.nss.set_high();
        result.map_err(|_| RadioError::SpiError)?;

        let mut data = Vec::new();
        data.extend_from_slice(&rx_buf[3..total_len])
            .map_err(|_| RadioError::ReceiveFailed)?;

        Ok(data)
    }

    /// (payload_length, buffer_offset)
    async fn get_rx_buffer_status(&mut self) -> Result<(u8, u8), RadioError> {
        let result = self.read_command(cmd::GET_RX_BUFFER_STATUS, 2).await?;
        Ok((result[0], result[1]))
    }

    /// Packet RSSI in dBm
    async fn get_packet_rssi(&mut self) -> Result<i8, RadioError> {
        let result = self.read_command(cmd::GET_PACKET_STATUS, 3).await?;

        // RSSI: -result[0]/2
        let rssi = -(result[0] as i16) / 2;
        Ok(rssi.max(i8::MIN as i16) as i8)
    }

    /// Wait for DIO1 interrupt with timeout
    async fn wait_for_irq(&mut self, timeout_ms: u32) -> Result<u16, RadioError> {
        let deadline_us = self.clock.now_us() + timeout_ms as u64 * 1000;

        loop {
            if self.dio1.is_high().unwrap_or(false) {
                return self.get_irq_status().await;
            }

            if self.clock.now_us() >= deadline_us {
                return Err(RadioError::Timeout);
            }

            self.clock.sleep_us(100).await;
        }
    }

    /// Continuous RX with RX_DONE / TIMEOUT / CRC_ERR routed to DIO1
    async fn start_receive_mode(&mut self) -> Result<(), RadioError> {
        self.set_standby_internal().await?;
        self.set_packet_params(MAX_FRAME_LEN as u8).await?;
        self.configure_irq(irq::RX_DONE | irq::TIMEOUT | irq::CRC_ERR)
            .await?;
        self.clear_irq(irq::ALL).await?;

        // Timeout 0xFFFFFF = continuous
        self.write_command(cmd::SET_RX, &[0xFF, 0xFF, 0xFF]).await
    }

    /// Wait for TX_DONE of the in-flight frame, then resume receiving
    async fn finish_transmit(&mut self) -> Result<(), RadioError> {
        self.tx_in_flight = false;
        let status = self.wait_for_irq(radio_defaults::TX_TIMEOUT_MS).await;
        self.clear_irq(irq::ALL).await?;
        self.start_receive_mode().await?;

        if status? & irq::TX_DONE != 0 {
            Ok(())
        } else {
            Err(RadioError::TransmitFailed)
        }
    }

    /// True when DIO1 reports a completed, CRC-clean reception
    async fn rx_latched(&mut self) -> bool {
        if !self.dio1.is_high().unwrap_or(false) {
            return false;
        }
        match self.get_irq_status().await {
            Ok(status) => status & irq::RX_DONE != 0 && status & irq::CRC_ERR == 0,
            Err(_) => false,
        }
    }

    /// Read the latched frame and release the IRQ latch
    async fn read_rx_frame(&mut self) -> Result<RxFrame, RadioError> {
        let read = async {
            let (payload_len, buffer_offset) = self.get_rx_buffer_status().await?;
            let data = self.read_buffer(buffer_offset, payload_len as usize).await?;
            let rssi = self.get_packet_rssi().await?;
            Ok::<_, RadioError>(RxFrame { data, rssi })
        }
        .await;

        // Release the latch whether or not the read worked
        self.clear_irq(irq::ALL).await?;
        read
    }

    /// Copy a latched frame out before a transmission overwrites the buffer
    async fn stash_latched_frame(&mut self) {
        if !self.rx_latched().await {
            return;
        }
        if self.pending.is_some() {
            log::warn!("Radio: frame dropped, previous frame still unread");
            let _ = self.clear_irq(irq::ALL).await;
            return;
        }

        match self.read_rx_frame().await {
            Ok(frame) => {
                log::debug!("Radio: held {} byte frame across TX", frame.data.len());
                self.pending = Some(frame);
            }
            Err(e) => log::warn!("Radio: frame lost before TX ({:?})", e),
        }
    }
}

impl<Spi, Nss, Dio1, Nrst, Busy, C> RadioPort for Sx1262Driver<Spi, Nss, Dio1, Nrst, Busy, C>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin,
    Nrst: OutputPin,
    Busy: InputPin,
    C: Clock,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if !self.initialised {
            return Err(RadioError::NotInitialised);
        }

        if data.is_empty() || data.len() > MAX_FRAME_LEN {
            return Err(RadioError::InvalidConfig);
        }

        // Only one frame in the air at a time
        if self.tx_in_flight {
            if let Err(e) = self.finish_transmit().await {
                log::warn!("Radio: previous TX not confirmed ({:?})", e);
            }
        }

        self.stash_latched_frame().await;

        self.set_standby_internal().await?;
        self.set_packet_params(data.len() as u8).await?;
        self.write_buffer(0x00, data).await?;

        self.configure_irq(irq::TX_DONE | irq::TIMEOUT).await?;
        self.clear_irq(irq::ALL).await?;

        // Start transmission (timeout 0 = no timeout)
        self.write_command(cmd::SET_TX, &[0x00, 0x00, 0x00]).await?;
        self.tx_in_flight = true;

        Ok(())
    }

    async fn wait_send_complete(&mut self) -> Result<(), RadioError> {
        if !self.tx_in_flight {
            return Ok(());
        }
        self.finish_transmit().await
    }

    async fn available(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        if !self.initialised || !self.dio1.is_high().unwrap_or(false) {
            return false;
        }

        // DIO1 during TX means TX_DONE: wrap up and go back to receive
        if self.tx_in_flight {
            if let Err(e) = self.finish_transmit().await {
                log::warn!("Radio: TX not confirmed ({:?})", e);
            }
            return false;
        }

        if self.rx_latched().await {
            return true;
        }

        log::debug!("Radio: dropped frame with CRC error");
        let _ = self.clear_irq(irq::ALL).await;
        false
    }

    async fn recv(&mut self) -> Result<RxFrame, RadioError> {
        if !self.initialised {
            return Err(RadioError::NotInitialised);
        }

        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => self.read_rx_frame().await?,
        };
        self.last_rssi = frame.rssi;
        Ok(frame)
    }

    fn last_rssi(&self) -> i8 {
        self.last_rssi
    }

    fn frequency_mhz(&self) -> f32 {
        self.config.frequency_mhz()
    }

    fn bandwidth_code(&self) -> u8 {
        self.config.bandwidth_code()
    }

    fn spreading_factor_code(&self) -> u8 {
        self.config.spreading_factor_code()
    }

    fn coding_rate_code(&self) -> u8 {
        self.config.coding_rate_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use crate::protocol::BeaconPacket;
    use crate::scheduler::{BeaconOutcome, EchoOutcome, EndpointConfig, Scheduler};
    use crate::shutdown::ShutdownLatch;
    use core::convert::Infallible;
    use futures::executor::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Register-level stand-in for the chip: one shared data buffer,
    /// IRQ status, and the frames it put on the air.
    #[derive(Default)]
    struct Chip {
        buffer: std::vec::Vec<u8>,
        irq_status: u16,
        irq_mask: u16,
        dio1_mask: u16,
        tx_base: u8,
        rx_base: u8,
        payload_len: u8,
        rx_len: u8,
        rssi_raw: u8,
        sent: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl Chip {
        fn new() -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                buffer: vec![0; 256],
                ..Self::default()
            }))
        }

        fn raise(&mut self, bits: u16) {
            self.irq_status |= bits & self.irq_mask;
        }

        /// A frame arrives over the air into the RX area
        fn deliver(&mut self, data: &[u8], rssi: i8, crc_ok: bool) {
            let base = self.rx_base as usize;
            self.buffer[base..base + data.len()].copy_from_slice(data);
            self.rx_len = data.len() as u8;
            self.rssi_raw = (-(rssi as i16) * 2) as u8;
            self.raise(if crc_ok { irq::RX_DONE } else { irq::RX_DONE | irq::CRC_ERR });
        }

        fn write(&mut self, words: &[u8]) {
            match words[0] {
                cmd::WRITE_BUFFER => {
                    let offset = words[1] as usize;
                    let data = &words[2..];
                    self.buffer[offset..offset + data.len()].copy_from_slice(data);
                }
                cmd::CLEAR_IRQ_STATUS => {
                    self.irq_status &= !u16::from_be_bytes([words[1], words[2]]);
                }
                cmd::SET_DIO_IRQ_PARAMS => {
                    self.irq_mask = u16::from_be_bytes([words[1], words[2]]);
                    self.dio1_mask = u16::from_be_bytes([words[3], words[4]]);
                }
                cmd::SET_BUFFER_BASE_ADDRESS => {
                    self.tx_base = words[1];
                    self.rx_base = words[2];
                }
                cmd::SET_PACKET_PARAMS => self.payload_len = words[4],
                cmd::SET_TX => {
                    let base = self.tx_base as usize;
                    let frame = self.buffer[base..base + self.payload_len as usize].to_vec();
                    self.sent.push(frame);
                    self.raise(irq::TX_DONE);
                }
                _ => {}
            }
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) {
            match write[0] {
                cmd::GET_IRQ_STATUS => {
                    read[2..4].copy_from_slice(&self.irq_status.to_be_bytes());
                }
                cmd::GET_RX_BUFFER_STATUS => {
                    read[2] = self.rx_len;
                    read[3] = self.rx_base;
                }
                cmd::GET_PACKET_STATUS => read[2] = self.rssi_raw,
                cmd::READ_BUFFER => {
                    let offset = write[1] as usize;
                    let len = read.len() - 3;
                    read[3..].copy_from_slice(&self.buffer[offset..offset + len]);
                }
                _ => {}
            }
        }

        fn dio1(&self) -> bool {
            self.irq_status & self.dio1_mask != 0
        }
    }

    struct ChipSpi(Rc<RefCell<Chip>>);

    impl embedded_hal::spi::ErrorType for ChipSpi {
        type Error = Infallible;
    }

    impl SpiBus for ChipSpi {
        async fn read(&mut self, _words: &mut [u8]) -> Result<(), Infallible> {
            Ok(())
        }

        async fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
            self.0.borrow_mut().write(words);
            Ok(())
        }

        async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
            self.0.borrow_mut().transfer(read, write);
            Ok(())
        }

        async fn transfer_in_place(&mut self, _words: &mut [u8]) -> Result<(), Infallible> {
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    /// DIO1 follows the chip's IRQ lines
    struct Dio1Pin(Rc<RefCell<Chip>>);

    impl embedded_hal::digital::ErrorType for Dio1Pin {
        type Error = Infallible;
    }

    impl InputPin for Dio1Pin {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.borrow().dio1())
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.borrow().dio1())
        }
    }

    /// BUSY is never asserted
    struct IdlePin;

    impl embedded_hal::digital::ErrorType for IdlePin {
        type Error = Infallible;
    }

    impl InputPin for IdlePin {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(false)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(true)
        }
    }

    impl OutputPin for IdlePin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn panic_stop() -> ! {
        panic!("panic stop");
    }

    type TestDriver = Sx1262Driver<ChipSpi, IdlePin, Dio1Pin, IdlePin, IdlePin, MockClock>;

    fn driver(chip: &Rc<RefCell<Chip>>) -> TestDriver {
        let pins = Sx1262Pins {
            nss: IdlePin,
            dio1: Dio1Pin(chip.clone()),
            nrst: IdlePin,
            busy: IdlePin,
        };
        Sx1262Driver::new(ChipSpi(chip.clone()), pins, MockClock::new())
    }

    fn ready_driver(chip: &Rc<RefCell<Chip>>) -> TestDriver {
        let mut radio = driver(chip);
        block_on(radio.init(&RadioConfig::default())).unwrap();
        radio
    }

    #[test]
    fn test_send_before_init_rejected() {
        let chip = Chip::new();
        let mut radio = driver(&chip);

        block_on(async {
            assert_eq!(radio.send(&[0x01]).await, Err(RadioError::NotInitialised));
            assert_eq!(radio.recv().await, Err(RadioError::NotInitialised));
            assert!(!radio.available().await);
        });
    }

    #[test]
    fn test_init_rejects_out_of_band_frequency() {
        let chip = Chip::new();
        let mut radio = driver(&chip);
        let config = RadioConfig {
            frequency_hz: 100_000_000,
            ..RadioConfig::default()
        };

        let result = block_on(radio.init(&config));
        assert_eq!(result, Err(InitError::Frequency(RadioError::InvalidConfig)));
        assert_eq!(result.unwrap_err().exit_code(), -96);
    }

    #[test]
    fn test_send_and_confirm() {
        let chip = Chip::new();
        let mut radio = ready_driver(&chip);

        block_on(async {
            radio.send(b"beacon").await.unwrap();
            radio.wait_send_complete().await.unwrap();
        });

        assert_eq!(chip.borrow().sent, vec![b"beacon".to_vec()]);
        // Back in receive with the RX IRQs routed to DIO1
        assert_eq!(chip.borrow().irq_status, 0);
        assert_eq!(chip.borrow().dio1_mask, irq::RX_DONE | irq::TIMEOUT | irq::CRC_ERR);
    }

    #[test]
    fn test_receive_frame() {
        let chip = Chip::new();
        let mut radio = ready_driver(&chip);
        chip.borrow_mut().deliver(b"hello server", -40, true);

        block_on(async {
            assert!(radio.available().await);
            let frame = radio.recv().await.unwrap();
            assert_eq!(frame.data.as_slice(), b"hello server");
            assert_eq!(frame.rssi, -40);
            assert_eq!(radio.last_rssi(), -40);
            assert!(!radio.available().await);
        });
    }

    #[test]
    fn test_crc_error_frame_not_available() {
        let chip = Chip::new();
        let mut radio = ready_driver(&chip);
        chip.borrow_mut().deliver(b"garbled", -100, false);

        assert!(!block_on(radio.available()));
        assert_eq!(chip.borrow().irq_status, 0);
    }

    #[test]
    fn test_unread_frame_survives_send() {
        let chip = Chip::new();
        let mut radio = ready_driver(&chip);
        chip.borrow_mut().deliver(b"hello server", -40, true);

        block_on(async {
            radio.send(&[0xAA; 32]).await.unwrap();
            radio.wait_send_complete().await.unwrap();

            assert!(radio.available().await);
            let frame = radio.recv().await.unwrap();
            assert_eq!(frame.data.as_slice(), b"hello server");
            assert_eq!(frame.rssi, -40);
            assert!(!radio.available().await);
        });

        assert_eq!(chip.borrow().sent, vec![vec![0xAA; 32]]);
    }

    #[test]
    fn test_frame_pending_at_beacon_tick_is_echoed() {
        let chip = Chip::new();
        let radio = ready_driver(&chip);
        let latch = ShutdownLatch::new(panic_stop);
        let clock = MockClock::new();
        let mut sched = Scheduler::new(radio, clock, &latch, EndpointConfig::default());

        // Frame lands during the idle sleep just before the beacon is due
        chip.borrow_mut().deliver(b"hello server", -55, true);
        sched.clock().set_ms(3025);

        let report = block_on(sched.tick());

        assert_eq!(report.beacon, Some(BeaconOutcome::Sent { sequence_number: 0 }));
        assert!(matches!(report.echo, Some(EchoOutcome::Echoed { len: 18, .. })));

        let sent = chip.borrow().sent.clone();
        assert_eq!(sent.len(), 2);
        let beacon = BeaconPacket::decode(&sent[0]).unwrap();
        assert_eq!(beacon.sequence_number, 0);
        assert_eq!(sent[1].as_slice(), b"echo: hello server");
    }
}
