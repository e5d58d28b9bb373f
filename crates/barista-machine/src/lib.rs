//! Barista Machine Runtime
//!
//! Connects a single La Marzocco-style appliance to the vendor cloud:
//! - REST session with signed requests and token lifecycle
//! - STOMP-over-WebSocket telemetry transport
//! - Machine controller folding telemetry into a typed snapshot

pub mod controller;
pub mod session;
pub mod transport;

pub use controller::MachineController;
pub use session::SessionManager;
pub use transport::{StompTransport, TransportState};
