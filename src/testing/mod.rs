//! Testing utilities and mock implementations
//!
//! In-memory stand-ins for the broker and the output stream, so sessions can
//! be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
