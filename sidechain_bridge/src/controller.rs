use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ControllerError, HandlerError};
use crate::events::{ControllerEvent, EventBus, SubscriptionId};
use crate::lock;
use crate::params::ParameterTable;
use crate::transport::{HostProbe, NoHost};
use serde_json::{json, Value};
use sidechain_protocol::{
    ParameterTag, ParameterValue, ParametersConfig, GET_INITIAL_PROCESSOR_STATE, GET_STATE,
    SET_STATE, SET_STATE_FROM_PROCESSOR_STATE, UPDATE_PARAMETER,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub parameters: Option<ParametersConfig>,
    /// Mirror the host's state and processor state.
    pub managed_state: bool,
    /// Also pull the processor state during initialize. Hosts speaking the
    /// older protocol never answer `getInitialProcessorState`.
    pub fetch_processor_state: bool,
    pub bridge: BridgeConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            parameters: None,
            managed_state: true,
            fetch_processor_state: true,
            bridge: BridgeConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn with_parameters(mut self, parameters: ParametersConfig) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Keeps the UI's view of parameters, state and processor state in sync with
/// the host.
///
/// Local edits are applied and announced immediately, then forwarded to the
/// host without waiting for an acknowledgement.
///
/// Events are emitted on the thread that changed the mirror, in that
/// thread's order. With the loopback transport host pushes are applied on a
/// runtime worker, so under concurrent local edits the last event may not
/// match [`state`](Self::state).
pub struct Controller {
    config: ControllerConfig,
    bridge: Bridge,
    shared: Arc<Shared>,
}

struct Shared {
    parameters: Mutex<ParameterTable>,
    state: Mutex<Value>,
    processor_state: Mutex<Value>,
    events: EventBus,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_host_probe(config, NoHost)
    }

    pub fn with_host_probe(config: ControllerConfig, probe: impl HostProbe + 'static) -> Self {
        let bridge = Bridge::new(config.bridge.clone(), probe);
        Self {
            config,
            bridge,
            shared: Arc::new(Shared {
                parameters: Mutex::new(ParameterTable::default()),
                state: Mutex::new(Value::Null),
                processor_state: Mutex::new(Value::Null),
                events: EventBus::new(),
            }),
        }
    }

    /// Builds the parameter table, registers the host-facing handlers, opens
    /// the bridge and, with managed state, pulls the initial snapshots.
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        if let Some(parameters) = &self.config.parameters {
            *lock(&self.shared.parameters) = ParameterTable::from_config(parameters);

            let shared = Arc::clone(&self.shared);
            self.bridge.register_typed(
                UPDATE_PARAMETER,
                move |(tag, value): (ParameterTag, ParameterValue)| shared.apply_host_parameter(tag, value),
            );
        }

        if self.config.managed_state {
            let shared = Arc::clone(&self.shared);
            self.bridge.register_typed(SET_STATE, move |(state,): (Value,)| {
                shared.replace_state(state);
                Ok(())
            });

            let shared = Arc::clone(&self.shared);
            self.bridge
                .register_typed(SET_STATE_FROM_PROCESSOR_STATE, move |(state,): (Value,)| {
                    shared.replace_processor_state(state);
                    Ok(())
                });
        }

        self.bridge.open().await?;

        if !self.config.managed_state {
            return Ok(());
        }

        let state = self.bridge.request::<Value>(GET_STATE, Vec::new());
        let processor_state = self
            .config
            .fetch_processor_state
            .then(|| self.bridge.request::<Value>(GET_INITIAL_PROCESSOR_STATE, Vec::new()));

        self.shared.replace_state(state.await?);
        if let Some(processor_state) = processor_state {
            self.shared.replace_processor_state(processor_state.await?);
        }
        Ok(())
    }

    /// For registering application handlers before [`initialize`](Self::initialize).
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn parameters(&self) -> Vec<(String, ParameterValue)> {
        lock(&self.shared.parameters).values()
    }

    pub fn parameter(&self, name: &str) -> Option<ParameterValue> {
        lock(&self.shared.parameters).value(name)
    }

    pub fn tag_of(&self, name: &str) -> Option<ParameterTag> {
        lock(&self.shared.parameters).tag_of(name)
    }

    pub fn name_of(&self, tag: ParameterTag) -> Option<String> {
        lock(&self.shared.parameters).name_of(tag).map(str::to_owned)
    }

    pub fn state(&self) -> Value {
        lock(&self.shared.state).clone()
    }

    /// Last processor state pushed by the host; not guaranteed current.
    pub fn processor_state(&self) -> Value {
        lock(&self.shared.processor_state).clone()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ControllerEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        self.shared.events.subscribe_channel()
    }

    pub fn update_parameter(&self, name: &str, value: ParameterValue) -> Result<(), ControllerError> {
        self.update_parameter_with(name, |_| value)
    }

    /// `update` receives the locally cached value, not the host's.
    pub fn update_parameter_with<F>(&self, name: &str, update: F) -> Result<(), ControllerError>
    where
        F: FnOnce(ParameterValue) -> ParameterValue,
    {
        let (tag, current) = {
            let table = lock(&self.shared.parameters);
            let tag = table
                .tag_of(name)
                .ok_or_else(|| ControllerError::UnknownParameter(name.to_string()))?;
            (tag, table.value_by_tag(tag).unwrap_or_default())
        };
        if !self.bridge.is_open() {
            return Err(BridgeError::NotOpen.into());
        }
        let value = update(current);

        lock(&self.shared.parameters).set_by_tag(tag, value);
        self.shared.events.emit(&ControllerEvent::ParameterChanged {
            name: name.to_string(),
            value,
        });
        self.bridge.call(UPDATE_PARAMETER, vec![json!(tag), json!(value)])?;
        Ok(())
    }

    /// Shallow-merges `changes` (a json object) into the state and pushes the
    /// full result to the host.
    pub fn update_state(&self, changes: Value) -> Result<(), ControllerError> {
        self.update_state_with(|_| changes)
    }

    pub fn update_state_with<F>(&self, changes: F) -> Result<(), ControllerError>
    where
        F: FnOnce(&Value) -> Value,
    {
        if !self.bridge.is_open() {
            return Err(BridgeError::NotOpen.into());
        }
        let current = self.state();
        let changes = match changes(&current) {
            Value::Object(map) => map,
            other => return Err(ControllerError::StateNotAnObject(other)),
        };

        let merged = {
            let mut state = lock(&self.shared.state);
            match &mut *state {
                Value::Object(map) => map.extend(changes),
                other => *other = Value::Object(changes),
            }
            state.clone()
        };

        // Observers hear about the change before the host does.
        self.shared.events.emit(&ControllerEvent::StateChanged(merged.clone()));
        self.bridge.call(SET_STATE, vec![merged])?;
        Ok(())
    }
}

impl Shared {
    fn apply_host_parameter(&self, tag: ParameterTag, value: ParameterValue) -> Result<(), HandlerError> {
        let name = lock(&self.parameters).set_by_tag(tag, value).map(str::to_owned);
        let Some(name) = name else {
            return Err(HandlerError::new(format!("unknown parameter tag: {tag}")));
        };
        debug!(%name, value, "host updated parameter");
        self.events.emit(&ControllerEvent::ParameterChanged { name, value });
        Ok(())
    }

    fn replace_state(&self, state: Value) {
        *lock(&self.state) = state.clone();
        self.events.emit(&ControllerEvent::StateChanged(state));
    }

    fn replace_processor_state(&self, state: Value) {
        *lock(&self.processor_state) = state.clone();
        self.events.emit(&ControllerEvent::ProcessorStateChanged(state));
    }
}
