//! Barista Core Library
//!
//! Shared functionality for the Barista session layer:
//! - Error taxonomy for the vendor-protocol stack
//! - Configuration resolution (defaults, settings file, env)
//! - STOMP frame codec for the telemetry channel
//! - Telemetry decoding into typed machine state

pub mod config;
pub mod error;
pub mod stomp;
pub mod telemetry;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use telemetry::{MachineEvent, MachineSnapshot};
