use crate::protocol::{
    Frame, FrameKind, InboundMsg, OutboundMsg, ParameterTag, ParameterValue, ParametersConfig,
    GET_INITIAL_PROCESSOR_STATE, GET_STATE, HANDLE_BRIDGE_READY, SET_STATE,
    SET_STATE_FROM_PROCESSOR_STATE, UPDATE_PARAMETER,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// What the host currently holds, as seen from outside the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub client: Option<SocketAddr>,
    pub ui_ready: bool,
    pub parameters: BTreeMap<ParameterTag, ParameterValue>,
    pub state: Value,
    pub processor_state: Value,
}

/// Host side of the bridge protocol, driven by [`tick`](Self::tick).
pub struct HostLoop {
    inbound_rx: Receiver<InboundMsg>,
    outbound_tx: Sender<OutboundMsg>,

    client: Option<SocketAddr>,
    ui_ready: bool,
    parameter_names: Vec<String>,
    parameters: BTreeMap<ParameterTag, ParameterValue>,
    state: Value,
    processor_state: Value,
}

impl HostLoop {
    pub fn new(inbound_rx: Receiver<InboundMsg>, outbound_tx: Sender<OutboundMsg>) -> Self {
        Self {
            inbound_rx,
            outbound_tx,
            client: None,
            ui_ready: false,
            parameter_names: Vec::new(),
            parameters: BTreeMap::new(),
            state: json!({}),
            processor_state: json!({}),
        }
    }

    /// Seeds parameter values from their defaults, tagged in declaration order.
    pub fn with_parameters(mut self, config: &ParametersConfig) -> Self {
        self.parameter_names.clear();
        self.parameters.clear();
        for (tag, (name, parameter)) in config.iter().enumerate() {
            self.parameter_names.push(name.to_string());
            self.parameters.insert(tag as ParameterTag, parameter.initial_value());
        }
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_processor_state(mut self, processor_state: Value) -> Self {
        self.processor_state = processor_state;
        self
    }

    pub fn tick(&mut self) {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(InboundMsg::ClientConnected { socket_addr }) => {
                    self.client = Some(socket_addr);
                    self.ui_ready = false;
                }
                Ok(InboundMsg::ClientDisconnected) => {
                    self.client = None;
                    self.ui_ready = false;
                }
                Ok(InboundMsg::Frame { text }) => self.handle_frame(&text),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            client: self.client,
            ui_ready: self.ui_ready,
            parameters: self.parameters.clone(),
            state: self.state.clone(),
            processor_state: self.processor_state.clone(),
        }
    }

    /// Simulates an automation change coming from the host.
    pub fn push_parameter(&mut self, tag: ParameterTag, value: ParameterValue) {
        self.parameters.insert(tag, value);
        self.send(Frame::call(UPDATE_PARAMETER, vec![json!(tag), json!(value)]));
    }

    pub fn push_state(&mut self, state: Value) {
        self.state = state.clone();
        self.send(Frame::call(SET_STATE, vec![state]));
    }

    pub fn push_processor_state(&mut self, processor_state: Value) {
        self.processor_state = processor_state.clone();
        self.send(Frame::call(SET_STATE_FROM_PROCESSOR_STATE, vec![processor_state]));
    }

    fn try_send(&mut self, msg: OutboundMsg) {
        if let Err(e) = self.outbound_tx.try_send(msg) {
            let reason = match e {
                TrySendError::Full(_) => "outbound queue full",
                TrySendError::Disconnected(_) => "network thread gone",
            };
            warn!(reason, "dropping frame for ui");
        }
    }

    fn send(&mut self, frame: Frame) {
        if self.client.is_none() {
            debug!(method = %frame.method, "no ui connected, dropping frame");
            return;
        }
        self.try_send(OutboundMsg::Send {
            frame: frame.encode(),
        });
    }

    fn handle_frame(&mut self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping frame from ui: {e}");
                return;
            }
        };

        match frame.kind {
            FrameKind::Call => {
                if let Some(reply) = self.handle_call(&frame.method, frame.payload) {
                    self.send(reply);
                }
            }
            FrameKind::Resolve => info!(method = %frame.method, payload = ?frame.payload, "ui resolved"),
            FrameKind::Reject => {
                warn!(method = %frame.method, "ui rejected: {}", frame.reject_message())
            }
        }
    }

    fn handle_call(&mut self, method: &str, args: Vec<Value>) -> Option<Frame> {
        match method {
            HANDLE_BRIDGE_READY => {
                info!("ui bridge ready");
                self.ui_ready = true;
                None
            }
            GET_STATE => Some(Frame::resolve(method, vec![self.state.clone()])),
            GET_INITIAL_PROCESSOR_STATE => {
                Some(Frame::resolve(method, vec![self.processor_state.clone()]))
            }
            SET_STATE => {
                self.state = args.into_iter().next().unwrap_or(Value::Null);
                debug!(state = %self.state, "ui pushed state");
                None
            }
            UPDATE_PARAMETER => match parse_parameter_edit(&args) {
                Some((tag, value)) => {
                    let name = self.parameter_names.get(tag as usize).map(String::as_str);
                    info!(tag, name = name.unwrap_or("?"), value, "ui edited parameter");
                    self.parameters.insert(tag, value);
                    None
                }
                None => Some(Frame::reject(method, "expected (tag, value)")),
            },
            other => Some(Frame::reject(other, format!("unknown method: {other}"))),
        }
    }
}

fn parse_parameter_edit(args: &[Value]) -> Option<(ParameterTag, ParameterValue)> {
    let tag = args.first()?.as_u64()?;
    let value = args.get(1)?.as_f64()?;
    Some((ParameterTag::try_from(tag).ok()?, value))
}
