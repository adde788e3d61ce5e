//! Filter argument signatures and validation.
//!
//! Filters declare their arguments as a compact signature string, e.g.
//! `"clips:vnode[];expr:data[];format:int:opt;"`. Each entry is
//! `name:type[flags]` where `type` is `int`, `float`, `data` or `vnode`,
//! a trailing `[]` marks an array, and `:opt` / `:empty` mark optional
//! arguments and arrays that may be empty.
//!
//! Validation runs before the filter constructor, so constructors only see
//! argument maps with known names, correct types and required keys present.

use crate::core::error::{ArgumentError, ArgumentResult};
use crate::core::node::Node;
use crate::core::props::{PropArray, PropertyMap};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentType {
    /// Integer values.
    Int,
    /// Float values. Integers are accepted and converted.
    Float,
    /// Byte strings.
    Data,
    /// Video nodes.
    Node,
}

impl ArgumentType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(ArgumentType::Int),
            "float" => Some(ArgumentType::Float),
            "data" => Some(ArgumentType::Data),
            "vnode" | "clip" => Some(ArgumentType::Node),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ArgumentType::Int => "int",
            ArgumentType::Float => "float",
            ArgumentType::Data => "data",
            ArgumentType::Node => "vnode",
        }
    }
}

/// Definition of one argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDefinition {
    /// Argument name.
    pub name: String,
    /// Element type.
    pub arg_type: ArgumentType,
    /// Whether more than one element is accepted.
    pub array: bool,
    /// Whether the argument may be omitted.
    pub optional: bool,
    /// Whether an array may have zero elements.
    pub empty_allowed: bool,
}

/// The full argument list of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    filter: String,
    arguments: Vec<ArgumentDefinition>,
}

impl Signature {
    /// Parse a signature string for `filter`.
    pub fn parse(filter: &str, spec: &str) -> ArgumentResult<Self> {
        let mut arguments: Vec<ArgumentDefinition> = Vec::new();
        for entry in spec.split(';').filter(|e| !e.trim().is_empty()) {
            let mut parts = entry.trim().split(':');
            let name = parts.next().unwrap_or_default();
            let type_spec = parts.next().ok_or_else(|| {
                ArgumentError::invalid(filter, format!("argument '{}' has no type", name))
            })?;
            if !crate::core::props::is_valid_key(name) {
                return Err(ArgumentError::invalid(
                    filter,
                    format!("invalid argument name '{}'", name),
                ));
            }
            if arguments.iter().any(|a| a.name == name) {
                return Err(ArgumentError::invalid(
                    filter,
                    format!("argument '{}' is declared twice", name),
                ));
            }

            let (base, array) = match type_spec.strip_suffix("[]") {
                Some(base) => (base, true),
                None => (type_spec, false),
            };
            let arg_type = ArgumentType::parse(base).ok_or_else(|| {
                ArgumentError::invalid(filter, format!("unknown argument type '{}'", base))
            })?;

            let mut definition = ArgumentDefinition {
                name: name.to_string(),
                arg_type,
                array,
                optional: false,
                empty_allowed: false,
            };
            for flag in parts {
                match flag {
                    "opt" => definition.optional = true,
                    "empty" => definition.empty_allowed = true,
                    other => {
                        return Err(ArgumentError::invalid(
                            filter,
                            format!("unknown argument flag '{}'", other),
                        ))
                    }
                }
            }
            arguments.push(definition);
        }
        Ok(Self {
            filter: filter.to_string(),
            arguments,
        })
    }

    /// Filter name this signature belongs to.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Declared arguments, in order.
    pub fn arguments(&self) -> &[ArgumentDefinition] {
        &self.arguments
    }

    /// Check `args` against the signature and return a normalized copy.
    ///
    /// Integers passed for float arguments are converted.
    pub fn validate(&self, args: &PropertyMap) -> ArgumentResult<PropertyMap> {
        for key in args.keys() {
            if !self.arguments.iter().any(|a| a.name == key) {
                return Err(ArgumentError::invalid(
                    &self.filter,
                    format!("function does not take argument(s) named {}", key),
                ));
            }
        }

        let mut normalized = PropertyMap::new();
        for def in &self.arguments {
            let Some(value) = args.get(&def.name) else {
                if !def.optional {
                    return Err(ArgumentError::missing(&self.filter, &def.name));
                }
                continue;
            };

            let value = match (def.arg_type, value) {
                (ArgumentType::Int, PropArray::Int(_))
                | (ArgumentType::Float, PropArray::Float(_))
                | (ArgumentType::Data, PropArray::Data(_))
                | (ArgumentType::Node, PropArray::Node(_)) => value.clone(),
                (ArgumentType::Float, PropArray::Int(v)) => {
                    PropArray::Float(v.iter().map(|&i| i as f64).collect())
                }
                (expected, found) => {
                    return Err(ArgumentError::invalid(
                        &self.filter,
                        format!(
                            "argument '{}' is not of type {} (got {})",
                            def.name,
                            expected.name(),
                            found.type_name()
                        ),
                    ))
                }
            };

            if !def.array && value.len() != 1 {
                return Err(ArgumentError::invalid(
                    &self.filter,
                    format!("argument '{}' is not an array", def.name),
                ));
            }
            if def.array && value.is_empty() && !def.empty_allowed {
                return Err(ArgumentError::invalid(
                    &self.filter,
                    format!("argument '{}' does not accept empty arrays", def.name),
                ));
            }
            normalized
                .set(&def.name, value)
                .map_err(|e| ArgumentError::invalid(&self.filter, e.to_string()))?;
        }
        Ok(normalized)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for def in &self.arguments {
            write!(f, "{}:{}", def.name, def.arg_type.name())?;
            if def.array {
                write!(f, "[]")?;
            }
            if def.optional {
                write!(f, ":opt")?;
            }
            if def.empty_allowed {
                write!(f, ":empty")?;
            }
            write!(f, ";")?;
        }
        Ok(())
    }
}

/// Expand an array argument to `count` elements.
///
/// A single element is repeated; otherwise the length must equal `count`.
pub fn broadcast<T: Clone>(
    filter: &str,
    name: &str,
    values: &[T],
    count: usize,
) -> ArgumentResult<Vec<T>> {
    match values.len() {
        1 => Ok(vec![values[0].clone(); count]),
        n if n == count => Ok(values.to_vec()),
        n => Err(ArgumentError::invalid(
            filter,
            format!("'{}' must have 1 or {} values, got {}", name, count, n),
        )),
    }
}

/// Typed reader over a validated argument map.
pub struct ArgReader<'a> {
    filter: &'a str,
    args: &'a PropertyMap,
}

impl<'a> ArgReader<'a> {
    /// Wrap a validated map.
    pub fn new(filter: &'a str, args: &'a PropertyMap) -> Self {
        Self { filter, args }
    }

    fn wrong(&self, name: &str, expected: &str) -> ArgumentError {
        ArgumentError::invalid(self.filter, format!("argument '{}' must be {}", name, expected))
    }

    /// Whether `name` was supplied.
    pub fn has(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    /// Optional single integer.
    pub fn int(&self, name: &str) -> ArgumentResult<Option<i64>> {
        match self.args.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_ints()
                .and_then(|v| v.first().copied())
                .map(Some)
                .ok_or_else(|| self.wrong(name, "an int")),
        }
    }

    /// Optional single float.
    pub fn float(&self, name: &str) -> ArgumentResult<Option<f64>> {
        match self.args.get(name) {
            None => Ok(None),
            Some(PropArray::Int(v)) => Ok(v.first().map(|&i| i as f64)),
            Some(v) => v
                .as_floats()
                .and_then(|v| v.first().copied())
                .map(Some)
                .ok_or_else(|| self.wrong(name, "a float")),
        }
    }

    /// Optional single string.
    pub fn string(&self, name: &str) -> ArgumentResult<Option<String>> {
        match self.args.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_data()
                .and_then(|v| v.first())
                .map(|d| Some(String::from_utf8_lossy(d).into_owned()))
                .ok_or_else(|| self.wrong(name, "data")),
        }
    }

    /// Optional single node.
    pub fn node(&self, name: &str) -> ArgumentResult<Option<Node>> {
        match self.args.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_nodes()
                .and_then(|v| v.first().cloned())
                .map(Some)
                .ok_or_else(|| self.wrong(name, "a clip")),
        }
    }

    /// Integer array, empty if absent.
    pub fn ints(&self, name: &str) -> ArgumentResult<Vec<i64>> {
        match self.args.get(name) {
            None => Ok(Vec::new()),
            Some(v) => v
                .as_ints()
                .map(<[i64]>::to_vec)
                .ok_or_else(|| self.wrong(name, "an int array")),
        }
    }

    /// Float array, empty if absent.
    pub fn floats(&self, name: &str) -> ArgumentResult<Vec<f64>> {
        match self.args.get(name) {
            None => Ok(Vec::new()),
            Some(PropArray::Int(v)) => Ok(v.iter().map(|&i| i as f64).collect()),
            Some(v) => v
                .as_floats()
                .map(<[f64]>::to_vec)
                .ok_or_else(|| self.wrong(name, "a float array")),
        }
    }

    /// String array, empty if absent.
    pub fn strings(&self, name: &str) -> ArgumentResult<Vec<String>> {
        match self.args.get(name) {
            None => Ok(Vec::new()),
            Some(v) => v
                .as_data()
                .map(|d| {
                    d.iter()
                        .map(|s| String::from_utf8_lossy(s).into_owned())
                        .collect()
                })
                .ok_or_else(|| self.wrong(name, "a data array")),
        }
    }

    /// Node array, empty if absent.
    pub fn nodes(&self, name: &str) -> ArgumentResult<Vec<Node>> {
        match self.args.get(name) {
            None => Ok(Vec::new()),
            Some(v) => v
                .as_nodes()
                .map(<[Node]>::to_vec)
                .ok_or_else(|| self.wrong(name, "a clip array")),
        }
    }
}
