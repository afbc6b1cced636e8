use serde::de::{MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const HANDLE_BRIDGE_READY: &str = "handleBridgeReady";
pub const UPDATE_PARAMETER: &str = "updateParameter";
pub const SET_STATE: &str = "setState";
pub const SET_STATE_FROM_PROCESSOR_STATE: &str = "setStateFromProcessorState";
pub const GET_STATE: &str = "getState";
pub const GET_INITIAL_PROCESSOR_STATE: &str = "getInitialProcessorState";

pub type ParameterTag = u32;
pub type ParameterValue = f64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Call,
    Resolve,
    Reject,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a json array")]
    NotAnArray,
    #[error("frame too short: {0} element(s)")]
    TooShort(usize),
    #[error("unknown frame kind: {0}")]
    UnknownKind(Value),
    #[error("frame method is not a string: {0}")]
    InvalidMethod(Value),
}

/// One message on the wire: `[kind, method, ...payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub method: String,
    pub payload: Vec<Value>,
}

impl Frame {
    pub fn call(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: FrameKind::Call,
            method: method.into(),
            payload: args,
        }
    }

    pub fn resolve(method: impl Into<String>, results: Vec<Value>) -> Self {
        Self {
            kind: FrameKind::Resolve,
            method: method.into(),
            payload: results,
        }
    }

    pub fn reject(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Reject,
            method: method.into(),
            payload: vec![Value::String(message.into())],
        }
    }

    pub fn encode(&self) -> String {
        // Keys are strings and payload is already a Value tree, so this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(elements) = value else {
            return Err(FrameError::NotAnArray);
        };
        Self::try_from(elements)
    }

    /// Text carried by a `reject` frame; non-string payloads are rendered as json.
    pub fn reject_message(&self) -> String {
        match self.payload.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

impl TryFrom<Vec<Value>> for Frame {
    type Error = FrameError;

    fn try_from(elements: Vec<Value>) -> Result<Self, Self::Error> {
        if elements.len() < 2 {
            return Err(FrameError::TooShort(elements.len()));
        }
        let mut it = elements.into_iter();
        let (Some(kind), Some(method)) = (it.next(), it.next()) else {
            return Err(FrameError::TooShort(0));
        };

        let kind = match FrameKind::deserialize(&kind) {
            Ok(k) => k,
            Err(_) => return Err(FrameError::UnknownKind(kind)),
        };
        let method = match method {
            Value::String(s) => s,
            other => return Err(FrameError::InvalidMethod(other)),
        };

        Ok(Self {
            kind,
            method,
            payload: it.collect(),
        })
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2 + self.payload.len()))?;
        seq.serialize_element(&self.kind)?;
        seq.serialize_element(&self.method)?;
        for value in &self.payload {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let elements = Vec::<Value>::deserialize(deserializer)?;
        Frame::try_from(elements).map_err(serde::de::Error::custom)
    }
}

/// Static descriptor of one managed parameter.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterConfig {
    pub title: String,
    pub short_title: String,
    pub unit: String,
    /// 0 means continuous.
    pub step_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<ParameterValue>,
    pub can_automate: bool,
    #[serde(rename = "unitID")]
    pub unit_id: i32,
}

impl ParameterConfig {
    pub fn initial_value(&self) -> ParameterValue {
        self.default_value.unwrap_or(0.0)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid parameters config: {0}")]
    Json(#[from] serde_json::Error),
}

/// `name -> ParameterConfig` in declaration order.
///
/// The order is the tag order on the wire, so it must match the order the
/// native side was generated from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParametersConfig {
    entries: Vec<(String, ParameterConfig)>,
}

impl ParametersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Re-declaring an existing name keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, config: ParameterConfig) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = config,
            None => self.entries.push((name, config)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, config: ParameterConfig) -> Self {
        self.insert(name, config);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterConfig> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterConfig)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ParametersConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, config) in &self.entries {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParametersConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ParametersConfig;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter name to parameter config")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = ParametersConfig::new();
                while let Some((name, config)) = access.next_entry::<String, ParameterConfig>()? {
                    out.insert(name, config);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

impl<N: Into<String>> FromIterator<(N, ParameterConfig)> for ParametersConfig {
    fn from_iter<I: IntoIterator<Item = (N, ParameterConfig)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (name, config) in iter {
            out.insert(name, config);
        }
        out
    }
}
