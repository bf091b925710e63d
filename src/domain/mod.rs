pub mod alert;
pub mod bridge;
pub mod envelope;
pub mod registry;

pub use alert::*;
pub use bridge::*;
pub use envelope::{decode, encode, Envelope, Frame, StatusReport, CONNECTED_BODY};
pub use registry::BridgeRegistry;
