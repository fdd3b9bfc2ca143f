#![cfg_attr(not(test), no_std)]

pub mod clock;
pub mod config;
pub mod protocol;
pub mod radio;
pub mod scheduler;
pub mod shutdown;

pub mod tasks;

pub use clock::Clock;
pub use radio::RadioPort;
pub use scheduler::{EndpointConfig, ExitStatus, Scheduler};
pub use shutdown::ShutdownLatch;
