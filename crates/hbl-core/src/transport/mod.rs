//! Transport layer module.

pub mod hid;
pub mod mock;
pub mod serial;
pub mod traits;

pub use hid::HidTransport;
pub use mock::MockTransport;
pub use serial::{SerialSettings, SerialTransport};
pub use traits::{Transport, TransportError};
