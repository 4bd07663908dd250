//! The board: the companion command sink for drawing commands
//!
//! The board process hosts one WebSocket connection per session token and an
//! HTTP endpoint that forwards commands to the matching connection. Drawing
//! itself happens in whatever surface consumes [`BoardCommand`]s.

pub mod command;
pub mod registry;
pub mod server;

pub use command::BoardCommand;
pub use registry::{ConnectionRegistry, ForwardError};
pub use server::{router, run};
