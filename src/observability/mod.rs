//! Observability for the bridge
//!
//! Structured logging to standard error with span macros for sessions and
//! broker operations.

pub mod logging;

pub use logging::{init_default_logging, init_logging, level_for_verbosity, LogFormat};

// Span macros for structured logging
pub use logging::{mqtt_span, session_span};
