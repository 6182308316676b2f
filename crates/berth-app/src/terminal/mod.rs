//! Interactive terminal sessions over WebSocket.

pub mod bridge;
pub mod protocol;
pub mod ws;
