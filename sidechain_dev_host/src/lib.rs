mod main_loop;
mod net;
mod protocol;

pub use crate::main_loop::{HostLoop, HostSnapshot};
pub use crate::net::{NetworkThread, DEFAULT_ADDR};
pub use crate::protocol::{InboundMsg, OutboundMsg, INBOUND_CAP, OUTBOUND_CAP};
