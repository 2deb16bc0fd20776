//! Typed parameter slots and the immutable registry that resolves them.
//!
//! Parameters are created once when the registry is built and never change
//! afterwards. The registry is shared by reference into every engine call
//! rather than looked up through ambient global state.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::{ParameterScope, ValueType};
use crate::ids::ParameterId;
use crate::structs::Value;

/// Errors raised when resolving parameters or converting raw values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    /// No parameter is registered under this name.
    #[error("unknown parameter: {name}")]
    UnknownParameter {
        /// The requested name.
        name: String,
    },

    /// A parameter was registered twice.
    #[error("duplicate parameter: {name}")]
    DuplicateParameter {
        /// The repeated name.
        name: String,
    },

    /// A raw value could not be converted to the parameter's type.
    #[error("cannot convert {raw:?} for parameter {name} of type {expected:?}")]
    InvalidValue {
        /// The parameter name.
        name: String,
        /// The declared type.
        expected: ValueType,
        /// The rejected raw input.
        raw: String,
    },

    /// A typed value does not match the parameter's declared type.
    #[error("parameter {name} expects {expected:?}, got {found:?}")]
    TypeMismatch {
        /// The parameter name.
        name: String,
        /// The declared type.
        expected: ValueType,
        /// The type supplied.
        found: ValueType,
    },
}

/// A typed, named slot that data values are recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Parameter {
    /// Unique identifier.
    pub id: ParameterId,
    /// Machine name, unique within a registry.
    pub name: String,
    /// Kind of owner values attach to.
    pub scope: ParameterScope,
    /// Declared type of values.
    pub value_type: ValueType,
    /// Allowed choices for [`ValueType::Enum`] parameters.
    pub choices: Vec<String>,
}

impl Parameter {
    /// Create a parameter with a fresh identifier.
    pub fn new(name: impl Into<String>, scope: ParameterScope, value_type: ValueType) -> Self {
        Self {
            id: ParameterId::new(),
            name: name.into(),
            scope,
            value_type,
            choices: Vec::new(),
        }
    }

    /// Convert raw text into a typed value of this parameter's type.
    pub fn convert(&self, raw: &str) -> Result<Value, ParameterError> {
        let trimmed = raw.trim();
        let invalid = || ParameterError::InvalidValue {
            name: self.name.clone(),
            expected: self.value_type,
            raw: raw.to_owned(),
        };
        match self.value_type {
            ValueType::Int => trimmed.parse::<i64>().map(Value::Int).map_err(|_| invalid()),
            ValueType::Decimal => Decimal::from_str(trimmed)
                .map(Value::Decimal)
                .map_err(|_| invalid()),
            ValueType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" | "" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            ValueType::Text => Ok(Value::Text(raw.to_owned())),
            ValueType::Enum => {
                if self.choices.iter().any(|c| c == trimmed) {
                    Ok(Value::Text(trimmed.to_owned()))
                } else {
                    Err(invalid())
                }
            }
            ValueType::Reference => Uuid::parse_str(trimmed)
                .map(Value::Reference)
                .map_err(|_| invalid()),
        }
    }

    /// Check that `value` has this parameter's declared type.
    ///
    /// Integers are accepted for decimal parameters.
    pub fn check(&self, value: &Value) -> Result<(), ParameterError> {
        let found = value.value_type();
        let ok = match (self.value_type, value) {
            (ValueType::Decimal, Value::Int(_)) => true,
            (ValueType::Enum, Value::Text(s)) => self.choices.iter().any(|c| c == s),
            (expected, _) => expected == found,
        };
        if ok {
            Ok(())
        } else {
            Err(ParameterError::TypeMismatch {
                name: self.name.clone(),
                expected: self.value_type,
                found,
            })
        }
    }
}

/// Handles to the parameters the simulation reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationParameters {
    /// Pool level, on groups and clusters.
    pub resource_level: ParameterId,
    /// A participant's requested harvest.
    pub harvest_decision: ParameterId,
    /// Total (possibly rationed) harvest taken from a group's pool.
    pub group_harvest: ParameterId,
    /// Regrowth applied to a pool, on groups and clusters.
    pub group_regrowth: ParameterId,
    /// A participant's accumulated earnings.
    pub storage: ParameterId,
    /// Whether a participant is still alive.
    pub player_status: ParameterId,
    /// Whether a participant has signalled readiness.
    pub participant_ready: ParameterId,
}

/// Immutable name-to-parameter registry.
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    by_name: BTreeMap<String, Parameter>,
    handles: SimulationParameters,
}

impl ParameterRegistry {
    /// Build the registry holding the simulation's standard parameters.
    pub fn standard() -> Self {
        let definitions = [
            ("resource_level", ParameterScope::Group, ValueType::Decimal),
            ("harvest_decision", ParameterScope::Participant, ValueType::Decimal),
            ("group_harvest", ParameterScope::Group, ValueType::Decimal),
            ("group_regrowth", ParameterScope::Group, ValueType::Decimal),
            ("storage", ParameterScope::Participant, ValueType::Decimal),
            ("player_status", ParameterScope::Participant, ValueType::Bool),
            ("participant_ready", ParameterScope::Participant, ValueType::Bool),
        ];
        let by_name: BTreeMap<String, Parameter> = definitions
            .into_iter()
            .map(|(name, scope, value_type)| {
                (name.to_owned(), Parameter::new(name, scope, value_type))
            })
            .collect();

        let id = |name: &str| by_name.get(name).map_or_else(ParameterId::new, |p| p.id);
        let handles = SimulationParameters {
            resource_level: id("resource_level"),
            harvest_decision: id("harvest_decision"),
            group_harvest: id("group_harvest"),
            group_regrowth: id("group_regrowth"),
            storage: id("storage"),
            player_status: id("player_status"),
            participant_ready: id("participant_ready"),
        };
        Self { by_name, handles }
    }

    /// Build a registry from the standard set plus extra parameters.
    pub fn with_extra(
        extra: impl IntoIterator<Item = Parameter>,
    ) -> Result<Self, ParameterError> {
        let mut registry = Self::standard();
        for parameter in extra {
            if registry.by_name.contains_key(&parameter.name) {
                return Err(ParameterError::DuplicateParameter {
                    name: parameter.name,
                });
            }
            registry.by_name.insert(parameter.name.clone(), parameter);
        }
        Ok(registry)
    }

    /// Typed handles to the simulation parameters.
    pub const fn simulation(&self) -> &SimulationParameters {
        &self.handles
    }

    /// Resolve a parameter by name.
    pub fn lookup(&self, name: &str) -> Result<&Parameter, ParameterError> {
        self.by_name
            .get(name)
            .ok_or_else(|| ParameterError::UnknownParameter {
                name: name.to_owned(),
            })
    }

    /// Resolve a parameter by identifier.
    pub fn get(&self, id: ParameterId) -> Option<&Parameter> {
        self.by_name.values().find(|p| p.id == id)
    }

    /// Convert raw text for the named parameter.
    pub fn convert(&self, name: &str, raw: &str) -> Result<Value, ParameterError> {
        self.lookup(name)?.convert(raw)
    }

    /// Iterate over all registered parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.by_name.values()
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
