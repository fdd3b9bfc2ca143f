//! Embassy task bodies
//!
//! Generic over the hardware so `main` only supplies concrete types.

pub mod button;
pub mod echo;

pub use button::stop_button_task;
pub use echo::echo_task;
