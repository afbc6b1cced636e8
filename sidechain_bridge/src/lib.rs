//! UI side of the sidechain bridge.
//!
//! A [`Controller`] mirrors the host's parameters and state on top of a
//! [`Bridge`], which speaks the `call`/`resolve`/`reject` frame protocol over
//! whichever [`Transport`] is available: the channel the host injects when the
//! UI runs embedded, or a loopback websocket when it runs standalone.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod params;
pub mod transport;

pub use bridge::{Bridge, HandlerResult, PendingReply};
pub use config::BridgeConfig;
pub use controller::{Controller, ControllerConfig};
pub use error::{BridgeConfigError, BridgeError, CallError, ControllerError, HandlerError, TransportError};
pub use events::{ControllerEvent, EventBus, SubscriptionId};
pub use params::ParameterTable;
pub use sidechain_protocol as protocol;
pub use sidechain_protocol::{ParameterConfig, ParameterTag, ParameterValue, ParametersConfig};
pub use transport::{EmbeddedHost, FrameSink, HostChannel, HostProbe, NoHost, Transport};

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
