pub mod driver;
pub mod traits;

pub use driver::{Sx1262Driver, Sx1262Pins};
pub use traits::{InitError, RadioConfig, RadioError, RadioPort, RxFrame};
