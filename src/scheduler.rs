//! Beacon/echo main loop
//!
//! Each tick runs the same fixed sequence:
//! 1. send a beacon if the beacon interval has elapsed
//! 2. echo at most one inbound frame, waiting for the echo to go out
//! 3. stop if the shutdown latch is triggered
//! 4. otherwise sleep for the idle quantum
//!
//! Every failure inside a tick is logged and reported in the [`TickReport`];
//! none of them stop the loop.

use crate::clock::Clock;
use crate::config::{exit, protocol, scheduler};
use crate::protocol::{build_beacon, compose_echo, ProtocolError};
use crate::radio::traits::{RadioError, RadioPort};
use crate::shutdown::ShutdownLatch;

/// Endpoint settings owned by the scheduler
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Identifier copied into every beacon
    pub hardware_address: [u8; 6],
    /// Beacon text, at most 15 bytes
    pub beacon_text: &'static str,
    pub beacon_interval_ms: u64,
    pub idle_ms: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            hardware_address: protocol::DEFAULT_HW_ADDRESS,
            beacon_text: scheduler::BEACON_TEXT,
            beacon_interval_ms: scheduler::BEACON_INTERVAL_MS,
            idle_ms: scheduler::IDLE_MS,
        }
    }
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Shutdown latch observed at a tick boundary
    Clean,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Clean => exit::CLEAN,
        }
    }
}

/// Result of the beacon step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconOutcome {
    Sent { sequence_number: u8 },
    SendFailed { sequence_number: u8, error: RadioError },
    Rejected { sequence_number: u8, error: ProtocolError },
}

/// Result of the receive/echo step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Echo confirmed sent; latency covers send plus confirmation
    Echoed { len: usize, latency_us: u64 },
    ReceiveFailed(RadioError),
    SendFailed(RadioError),
    Rejected(ProtocolError),
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub beacon: Option<BeaconOutcome>,
    pub echo: Option<EchoOutcome>,
    pub shutdown: bool,
}

/// Single-threaded beacon and echo scheduler
pub struct Scheduler<'a, R: RadioPort, C: Clock> {
    radio: R,
    clock: C,
    shutdown: &'a ShutdownLatch,
    config: EndpointConfig,
    last_send_ms: u64,
    sequence: u8,
}

impl<'a, R: RadioPort, C: Clock> Scheduler<'a, R, C> {
    /// Create a scheduler. The first beacon goes out one interval from now.
    pub fn new(radio: R, clock: C, shutdown: &'a ShutdownLatch, config: EndpointConfig) -> Self {
        let last_send_ms = clock.now_ms();
        Self {
            radio,
            clock,
            shutdown,
            config,
            last_send_ms,
            sequence: 0,
        }
    }

    /// Run until the shutdown latch is triggered
    pub async fn run(&mut self) -> ExitStatus {
        log::info!("Waiting for packets...");
        loop {
            if self.tick().await.shutdown {
                log::info!("Shutdown observed, leaving main loop");
                self.shutdown.mark_stopped();
                return ExitStatus::Clean;
            }
            self.clock.sleep_ms(self.config.idle_ms).await;
        }
    }

    /// Run steps 1-3 of one iteration
    pub async fn tick(&mut self) -> TickReport {
        let beacon = if self.beacon_due() {
            Some(self.send_beacon().await)
        } else {
            None
        };

        let echo = if self.radio.available().await {
            Some(self.echo_one().await)
        } else {
            None
        };

        TickReport {
            beacon,
            echo,
            shutdown: self.shutdown.is_triggered(),
        }
    }

    fn beacon_due(&self) -> bool {
        self.clock.now_ms().saturating_sub(self.last_send_ms) > self.config.beacon_interval_ms
    }

    async fn send_beacon(&mut self) -> BeaconOutcome {
        let sequence_number = self.sequence;
        // Advances and restarts the interval whether or not the send succeeds
        self.sequence = self.sequence.wrapping_add(1);
        self.last_send_ms = self.clock.now_ms();

        let state = self.radio.snapshot();
        let packet = match build_beacon(
            sequence_number,
            self.config.beacon_text,
            self.config.hardware_address,
            &state,
        ) {
            Ok(packet) => packet,
            Err(error) => {
                log::warn!("Beacon #{}: rejected ({:?})", sequence_number, error);
                return BeaconOutcome::Rejected {
                    sequence_number,
                    error,
                };
            }
        };

        log::debug!("Beacon #{}: sending", sequence_number);
        match self.radio.send(&packet.encode()).await {
            Ok(()) => {
                log::info!("Beacon #{}: complete", sequence_number);
                BeaconOutcome::Sent { sequence_number }
            }
            Err(error) => {
                log::warn!("Beacon #{}: failed ({:?})", sequence_number, error);
                BeaconOutcome::SendFailed {
                    sequence_number,
                    error,
                }
            }
        }
    }

    async fn echo_one(&mut self) -> EchoOutcome {
        let frame = match self.radio.recv().await {
            Ok(frame) => frame,
            Err(error) => {
                log::warn!("Receive failed ({:?})", error);
                return EchoOutcome::ReceiveFailed(error);
            }
        };

        // Show as string if valid UTF-8, else byte count
        if let Ok(s) = core::str::from_utf8(&frame.data) {
            log::info!("Echoing data [{} dBm]: '{}'", frame.rssi, s);
        } else {
            log::info!("Echoing data [{} dBm]: {} bytes", frame.rssi, frame.data.len());
        }

        let echo = match compose_echo(&frame.data) {
            Ok(echo) => echo,
            Err(error) => {
                log::warn!("Echo dropped ({:?})", error);
                return EchoOutcome::Rejected(error);
            }
        };

        let started_us = self.clock.now_us();
        if let Err(error) = self.radio.send(&echo).await {
            log::warn!("Echo send failed ({:?})", error);
            return EchoOutcome::SendFailed(error);
        }
        if let Err(error) = self.radio.wait_send_complete().await {
            log::warn!("Echo not confirmed ({:?})", error);
            return EchoOutcome::SendFailed(error);
        }
        let latency_us = self.clock.now_us().saturating_sub(started_us);

        log::info!(
            "Send took {}.{:03} ms",
            latency_us / 1000,
            latency_us % 1000
        );
        EchoOutcome::Echoed {
            len: echo.len(),
            latency_us,
        }
    }

    /// Sequence number the next beacon will carry
    pub fn next_sequence(&self) -> u8 {
        self.sequence
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Give back the radio and clock once the loop has ended
    pub fn into_parts(self) -> (R, C) {
        (self.radio, self.clock)
    }
}
