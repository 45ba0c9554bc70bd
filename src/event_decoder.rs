use std::collections::HashMap;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, EventParam, JsonAbi};
use alloy_primitives::{Address, B256, U256};
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::types::RawLog;

#[derive(Debug, Clone)]
pub struct DecodedParam {
    pub name: String,
    pub param_type: String,
    pub value: DynSolValue,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub name: String,
    pub signature: Option<B256>, // None for anonymous events
    pub params: Vec<DecodedParam>,
    pub anonymous: bool,
}

/// Decodes raw logs against the events of one contract ABI.
pub struct EventDecoder {
    events: HashMap<B256, Event>,
    anonymous_events: Vec<Event>,
}

impl EventDecoder {
    pub fn new(abi: &JsonAbi) -> Self {
        let mut events = HashMap::new();
        let mut anonymous_events = Vec::new();

        for event in abi.events() {
            if event.anonymous {
                anonymous_events.push(event.clone());
            } else {
                events.insert(event.selector(), event.clone());
            }
        }

        Self {
            events,
            anonymous_events,
        }
    }

    /// Topic-0 hash of a non-anonymous event, looked up by name.
    pub fn selector(&self, event_name: &str) -> Option<B256> {
        self.events
            .iter()
            .find(|(_, event)| event.name == event_name)
            .map(|(selector, _)| *selector)
    }

    pub fn decode(&self, log: &RawLog) -> Result<DecodedEvent> {
        // Regular events are matched by topic 0, anonymous ones by trial
        if let Some(event) = log.topics.first().and_then(|t| self.events.get(t)) {
            return self.decode_with_event(log, event);
        }

        self.try_decode_anonymous_event(log)
    }

    fn try_decode_anonymous_event(&self, log: &RawLog) -> Result<DecodedEvent> {
        let mut last_error = None;

        for event in &self.anonymous_events {
            match self.decode_with_event(log, event) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(anyhow!("Failed to decode as any anonymous event: {}", e)),
            None => Err(anyhow!(
                "No event matches topic {:?}",
                log.topics.first()
            )),
        }
    }

    fn decode_with_event(&self, log: &RawLog, event: &Event) -> Result<DecodedEvent> {
        // Skip the signature topic for regular events
        let mut topics = log.topics.iter().skip(usize::from(!event.anonymous));

        let indexed_count = event.inputs.iter().filter(|p| p.indexed).count();
        if topics.len() != indexed_count {
            return Err(anyhow!(
                "Event {} expects {} indexed topics, log has {}",
                event.name,
                indexed_count,
                topics.len()
            ));
        }

        let non_indexed_params: Vec<&EventParam> =
            event.inputs.iter().filter(|p| !p.indexed).collect();
        let mut data_values = self
            .decode_data_params(&non_indexed_params, &log.data)?
            .into_iter();

        let mut params = Vec::with_capacity(event.inputs.len());
        for param in &event.inputs {
            let value = if param.indexed {
                let topic = topics
                    .next()
                    .ok_or_else(|| anyhow!("Not enough topics for indexed parameter: {}", param.name))?;
                self.decode_indexed_param(param, *topic)?
            } else {
                data_values
                    .next()
                    .ok_or_else(|| anyhow!("Missing data value for parameter: {}", param.name))?
            };

            params.push(DecodedParam {
                name: param.name.clone(),
                param_type: param.ty.clone(),
                value,
                indexed: param.indexed,
            });
        }

        Ok(DecodedEvent {
            name: event.name.clone(),
            signature: (!event.anonymous).then(|| event.selector()),
            params,
            anonymous: event.anonymous,
        })
    }

    /// Decode an indexed parameter from a topic
    fn decode_indexed_param(&self, param: &EventParam, topic: B256) -> Result<DynSolValue> {
        let sol_type = param
            .resolve()
            .map_err(|e| anyhow!("Unsupported type {} for {}: {}", param.ty, param.name, e))?;

        match &sol_type {
            // Dynamic types are stored as keccak256 hashes, the value is not recoverable
            DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_) => Ok(DynSolValue::FixedBytes(topic, 32)),
            _ => sol_type
                .abi_decode(topic.as_slice())
                .map_err(|e| anyhow!("Failed to decode indexed parameter {}: {}", param.name, e)),
        }
    }

    /// Decode non-indexed parameters from log data
    fn decode_data_params(&self, params: &[&EventParam], data: &[u8]) -> Result<Vec<DynSolValue>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let param_types = params
            .iter()
            .map(|p| {
                p.resolve().map_err(|e| {
                    anyhow!("Failed to resolve non-indexed parameter {} of type {}: {}", p.name, p.ty, e)
                })
            })
            .collect::<Result<Vec<DynSolType>>>()?;

        let decoded = DynSolType::Tuple(param_types)
            .abi_decode_params(data)
            .map_err(|e| anyhow!("Failed to decode log data: {}", e))?;

        match decoded {
            DynSolValue::Tuple(values) => Ok(values),
            _ => Err(anyhow!("Expected tuple from log data decoding")),
        }
    }

    pub fn regular_events_count(&self) -> usize {
        self.events.len()
    }

    pub fn anonymous_events_count(&self) -> usize {
        self.anonymous_events.len()
    }
}

impl DecodedEvent {
    pub fn param(&self, name: &str) -> Option<&DynSolValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    fn require(&self, name: &str) -> Result<&DynSolValue> {
        self.param(name)
            .ok_or_else(|| anyhow!("Event {} has no parameter {}", self.name, name))
    }

    pub fn uint(&self, name: &str) -> Result<U256> {
        match self.require(name)? {
            DynSolValue::Uint(value, _) => Ok(*value),
            other => Err(anyhow!("Parameter {} is not an unsigned integer: {:?}", name, other)),
        }
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        match self.require(name)? {
            DynSolValue::Address(addr) => Ok(*addr),
            other => Err(anyhow!("Parameter {} is not an address: {:?}", name, other)),
        }
    }

    pub fn fixed_bytes(&self, name: &str) -> Result<B256> {
        match self.require(name)? {
            DynSolValue::FixedBytes(word, _) => Ok(*word),
            other => Err(anyhow!("Parameter {} is not fixed bytes: {:?}", name, other)),
        }
    }

    pub fn uint_array(&self, name: &str) -> Result<Vec<U256>> {
        match self.require(name)? {
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => items
                .iter()
                .map(|item| match item {
                    DynSolValue::Uint(value, _) => Ok(*value),
                    other => Err(anyhow!("Element of {} is not an unsigned integer: {:?}", name, other)),
                })
                .collect(),
            other => Err(anyhow!("Parameter {} is not an array: {:?}", name, other)),
        }
    }

    pub fn address_array(&self, name: &str) -> Result<Vec<Address>> {
        match self.require(name)? {
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => items
                .iter()
                .map(|item| match item {
                    DynSolValue::Address(addr) => Ok(*addr),
                    other => Err(anyhow!("Element of {} is not an address: {:?}", name, other)),
                })
                .collect(),
            other => Err(anyhow!("Parameter {} is not an array: {:?}", name, other)),
        }
    }

    /// Named arguments as a JSON object; unnamed ones are keyed by position.
    pub fn args_json(&self) -> Value {
        let mut args = Map::new();
        for (position, param) in self.params.iter().enumerate() {
            let key = if param.name.is_empty() {
                position.to_string()
            } else {
                param.name.clone()
            };
            args.insert(key, value_to_json(&param.value));
        }
        Value::Object(args)
    }

    /// Full rendering with signature, types and indexing, for diagnostics.
    pub fn to_json(&self) -> Value {
        let mut event_json = Map::new();
        event_json.insert("name".to_string(), Value::String(self.name.clone()));
        event_json.insert("anonymous".to_string(), Value::Bool(self.anonymous));
        event_json.insert(
            "signature".to_string(),
            self.signature
                .map(|sig| Value::String(format!("{:#x}", sig)))
                .unwrap_or(Value::Null),
        );

        let params_json = self
            .params
            .iter()
            .map(|param| {
                let mut param_json = Map::new();
                param_json.insert("name".to_string(), Value::String(param.name.clone()));
                param_json.insert("type".to_string(), Value::String(param.param_type.clone()));
                param_json.insert("indexed".to_string(), Value::Bool(param.indexed));
                param_json.insert("value".to_string(), value_to_json(&param.value));
                Value::Object(param_json)
            })
            .collect();

        event_json.insert("parameters".to_string(), Value::Array(params_json));
        Value::Object(event_json)
    }
}

/// Convert DynSolValue to JSON Value for serialization
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::Address(addr) => Value::String(format!("{:#x}", addr)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        _ => Value::String(format!("{:?}", value)),
    }
}
