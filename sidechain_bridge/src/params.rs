use sidechain_protocol::{ParameterTag, ParameterValue, ParametersConfig};
use std::collections::HashMap;

/// Name <-> tag <-> value mapping for the managed parameters.
///
/// Tags are dense, `0..len`, in config declaration order.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    names: Vec<String>,
    tags: HashMap<String, ParameterTag>,
    values: Vec<ParameterValue>,
}

impl ParameterTable {
    pub fn from_config(config: &ParametersConfig) -> Self {
        let mut table = Self::default();
        for (name, parameter) in config.iter() {
            let tag = table.names.len() as ParameterTag;
            table.names.push(name.to_string());
            table.tags.insert(name.to_string(), tag);
            table.values.push(parameter.initial_value());
        }
        table
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn tag_of(&self, name: &str) -> Option<ParameterTag> {
        self.tags.get(name).copied()
    }

    pub fn name_of(&self, tag: ParameterTag) -> Option<&str> {
        self.names.get(tag as usize).map(String::as_str)
    }

    pub fn value(&self, name: &str) -> Option<ParameterValue> {
        self.tag_of(name).and_then(|tag| self.value_by_tag(tag))
    }

    pub fn value_by_tag(&self, tag: ParameterTag) -> Option<ParameterValue> {
        self.values.get(tag as usize).copied()
    }

    /// Returns the parameter's name, or `None` for an unknown tag.
    pub fn set_by_tag(&mut self, tag: ParameterTag, value: ParameterValue) -> Option<&str> {
        let slot = self.values.get_mut(tag as usize)?;
        *slot = value;
        self.name_of(tag)
    }

    pub fn set(&mut self, name: &str, value: ParameterValue) -> Option<ParameterTag> {
        let tag = self.tag_of(name)?;
        self.set_by_tag(tag, value);
        Some(tag)
    }

    /// Current values in tag order.
    pub fn values(&self) -> Vec<(String, ParameterValue)> {
        self.names
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .collect()
    }
}
