//! The bridge between standard streams and the broker
//!
//! - [`output`] - Formatting of inbound messages
//! - [`session`] - One connect, subscribe and serve cycle
//! - [`supervisor`] - Reconnect loop

pub mod output;
pub mod session;
pub mod supervisor;

pub use output::{OutputMode, Printer};
pub use session::{publish_line, EchoHandler, Session, SessionState, DISCONNECT_GRACE};
pub use supervisor::{ReconnectPolicy, Supervisor};
