//! Beacon/echo service task

use crate::clock::Clock;
use crate::radio::traits::RadioPort;
use crate::scheduler::{EndpointConfig, ExitStatus, Scheduler};
use crate::shutdown::ShutdownLatch;

/// Run the beacon/echo loop until shutdown, handing the radio back
/// so the caller can park it.
pub async fn echo_task<R: RadioPort, C: Clock>(
    radio: R,
    clock: C,
    shutdown: &ShutdownLatch,
    config: EndpointConfig,
) -> (ExitStatus, R) {
    let address = config.hardware_address;
    log::info!(
        "Echo: endpoint {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}, beacon every {} ms",
        address[0],
        address[1],
        address[2],
        address[3],
        address[4],
        address[5],
        config.beacon_interval_ms
    );

    let mut scheduler = Scheduler::new(radio, clock, shutdown, config);
    let status = scheduler.run().await;
    let (radio, _clock) = scheduler.into_parts();

    log::info!("Echo: stopped (status {})", status.code());
    (status, radio)
}
