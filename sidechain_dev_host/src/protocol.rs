use std::net::SocketAddr;

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

pub enum InboundMsg {
    ClientConnected { socket_addr: SocketAddr },
    ClientDisconnected,
    Frame { text: String },
}

pub enum OutboundMsg {
    Send { frame: String },
}

pub use sidechain_protocol::{
    Frame, FrameKind, ParameterTag, ParameterValue, ParametersConfig, GET_INITIAL_PROCESSOR_STATE,
    GET_STATE, HANDLE_BRIDGE_READY, SET_STATE, SET_STATE_FROM_PROCESSOR_STATE, UPDATE_PARAMETER,
};
