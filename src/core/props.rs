//! Property maps attached to frames and used as filter argument maps.
//!
//! Keys keep insertion order. Every value is a homogeneous typed array:
//! integers, floats, byte strings or node references.

use crate::core::error::{PropertyError, PropertyResult};
use crate::core::node::Node;
use indexmap::IndexMap;
use std::fmt;

/// A typed array stored under one key.
#[derive(Clone, PartialEq)]
pub enum PropArray {
    /// 64-bit integers.
    Int(Vec<i64>),
    /// 64-bit floats.
    Float(Vec<f64>),
    /// Byte strings (text is stored as UTF-8 bytes).
    Data(Vec<Vec<u8>>),
    /// Node references.
    Node(Vec<Node>),
}

impl PropArray {
    /// Name of the element type.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropArray::Int(_) => "int",
            PropArray::Float(_) => "float",
            PropArray::Data(_) => "data",
            PropArray::Node(_) => "node",
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            PropArray::Int(v) => v.len(),
            PropArray::Float(v) => v.len(),
            PropArray::Data(v) => v.len(),
            PropArray::Node(v) => v.len(),
        }
    }

    /// Check if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer elements, if this is an int array.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            PropArray::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Float elements, if this is a float array.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            PropArray::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Byte string elements, if this is a data array.
    pub fn as_data(&self) -> Option<&[Vec<u8>]> {
        match self {
            PropArray::Data(v) => Some(v),
            _ => None,
        }
    }

    /// Node elements, if this is a node array.
    pub fn as_nodes(&self) -> Option<&[Node]> {
        match self {
            PropArray::Node(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for PropArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropArray::Int(v) => write!(f, "{:?}", v),
            PropArray::Float(v) => write!(f, "{:?}", v),
            PropArray::Data(v) => f
                .debug_list()
                .entries(v.iter().map(|d| String::from_utf8_lossy(d).into_owned()))
                .finish(),
            PropArray::Node(v) => f
                .debug_list()
                .entries(v.iter().map(|n| n.id()))
                .finish(),
        }
    }
}

impl From<i64> for PropArray {
    fn from(v: i64) -> Self {
        PropArray::Int(vec![v])
    }
}

impl From<f64> for PropArray {
    fn from(v: f64) -> Self {
        PropArray::Float(vec![v])
    }
}

impl From<&str> for PropArray {
    fn from(v: &str) -> Self {
        PropArray::Data(vec![v.as_bytes().to_vec()])
    }
}

impl From<Node> for PropArray {
    fn from(v: Node) -> Self {
        PropArray::Node(vec![v])
    }
}

impl From<Vec<i64>> for PropArray {
    fn from(v: Vec<i64>) -> Self {
        PropArray::Int(v)
    }
}

impl From<Vec<f64>> for PropArray {
    fn from(v: Vec<f64>) -> Self {
        PropArray::Float(v)
    }
}

impl From<Vec<&str>> for PropArray {
    fn from(v: Vec<&str>) -> Self {
        PropArray::Data(v.into_iter().map(|s| s.as_bytes().to_vec()).collect())
    }
}

impl From<Vec<Node>> for PropArray {
    fn from(v: Vec<Node>) -> Self {
        PropArray::Node(v)
    }
}

/// Check that a key is an identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Insertion-ordered map from keys to typed arrays.
#[derive(Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: IndexMap<String, PropArray>,
}

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Membership test.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropArray)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The array under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&PropArray> {
        self.entries.get(key)
    }

    /// A copy of the value under `key`, or `default` if absent.
    pub fn get_or(&self, key: &str, default: PropArray) -> PropArray {
        self.entries.get(key).cloned().unwrap_or(default)
    }

    /// Number of elements under `key`, or `None` if absent.
    pub fn num_elements(&self, key: &str) -> Option<usize> {
        self.entries.get(key).map(PropArray::len)
    }

    fn require(&self, key: &str) -> PropertyResult<&PropArray> {
        self.entries
            .get(key)
            .ok_or_else(|| PropertyError::KeyNotFound(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, found: &PropArray) -> PropertyError {
        PropertyError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    fn element<'a, T>(key: &str, values: &'a [T], index: usize) -> PropertyResult<&'a T> {
        values.get(index).ok_or_else(|| PropertyError::IndexOutOfBounds {
            key: key.to_string(),
            index,
            len: values.len(),
        })
    }

    /// Integer element `index` under `key`.
    pub fn get_int(&self, key: &str, index: usize) -> PropertyResult<i64> {
        let array = self.require(key)?;
        let values = array
            .as_ints()
            .ok_or_else(|| Self::mismatch(key, "int", array))?;
        Self::element(key, values, index).copied()
    }

    /// Float element `index` under `key`.
    pub fn get_float(&self, key: &str, index: usize) -> PropertyResult<f64> {
        let array = self.require(key)?;
        let values = array
            .as_floats()
            .ok_or_else(|| Self::mismatch(key, "float", array))?;
        Self::element(key, values, index).copied()
    }

    /// Byte string element `index` under `key`.
    pub fn get_data(&self, key: &str, index: usize) -> PropertyResult<&[u8]> {
        let array = self.require(key)?;
        let values = array
            .as_data()
            .ok_or_else(|| Self::mismatch(key, "data", array))?;
        Self::element(key, values, index).map(Vec::as_slice)
    }

    /// Byte string element decoded as text (lossily).
    pub fn get_str(&self, key: &str, index: usize) -> PropertyResult<String> {
        self.get_data(key, index)
            .map(|d| String::from_utf8_lossy(d).into_owned())
    }

    /// Node element `index` under `key`.
    pub fn get_node(&self, key: &str, index: usize) -> PropertyResult<Node> {
        let array = self.require(key)?;
        let values = array
            .as_nodes()
            .ok_or_else(|| Self::mismatch(key, "node", array))?;
        Self::element(key, values, index).cloned()
    }

    /// Whole integer array under `key`.
    pub fn get_int_array(&self, key: &str) -> PropertyResult<&[i64]> {
        let array = self.require(key)?;
        array.as_ints().ok_or_else(|| Self::mismatch(key, "int", array))
    }

    /// Whole float array under `key`.
    pub fn get_float_array(&self, key: &str) -> PropertyResult<&[f64]> {
        let array = self.require(key)?;
        array
            .as_floats()
            .ok_or_else(|| Self::mismatch(key, "float", array))
    }

    /// Whole node array under `key`.
    pub fn get_node_array(&self, key: &str) -> PropertyResult<&[Node]> {
        let array = self.require(key)?;
        array
            .as_nodes()
            .ok_or_else(|| Self::mismatch(key, "node", array))
    }

    /// Whole data array under `key`, decoded as text.
    pub fn get_str_array(&self, key: &str) -> PropertyResult<Vec<String>> {
        let array = self.require(key)?;
        let values = array
            .as_data()
            .ok_or_else(|| Self::mismatch(key, "data", array))?;
        Ok(values
            .iter()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .collect())
    }

    /// Replace the value under `key`, keeping its position if it existed.
    pub fn set(&mut self, key: &str, value: impl Into<PropArray>) -> PropertyResult<()> {
        if !is_valid_key(key) {
            return Err(PropertyError::InvalidKey(key.to_string()));
        }
        self.entries.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Store a single integer.
    pub fn set_int(&mut self, key: &str, value: i64) -> PropertyResult<()> {
        self.set(key, value)
    }

    /// Store a single float.
    pub fn set_float(&mut self, key: &str, value: f64) -> PropertyResult<()> {
        self.set(key, value)
    }

    /// Store a single byte string.
    pub fn set_data(&mut self, key: &str, value: impl Into<Vec<u8>>) -> PropertyResult<()> {
        self.set(key, PropArray::Data(vec![value.into()]))
    }

    /// Store a single node reference.
    pub fn set_node(&mut self, key: &str, value: Node) -> PropertyResult<()> {
        self.set(key, value)
    }

    /// Append an element to the array under `key`, creating it if absent.
    ///
    /// The element type must match the existing array.
    pub fn append(&mut self, key: &str, value: impl Into<PropArray>) -> PropertyResult<()> {
        let value = value.into();
        match self.entries.get_mut(key) {
            None => self.set(key, value),
            Some(existing) => match (existing, value) {
                (PropArray::Int(a), PropArray::Int(b)) => {
                    a.extend(b);
                    Ok(())
                }
                (PropArray::Float(a), PropArray::Float(b)) => {
                    a.extend(b);
                    Ok(())
                }
                (PropArray::Data(a), PropArray::Data(b)) => {
                    a.extend(b);
                    Ok(())
                }
                (PropArray::Node(a), PropArray::Node(b)) => {
                    a.extend(b);
                    Ok(())
                }
                (existing, value) => Err(PropertyError::TypeMismatch {
                    key: key.to_string(),
                    expected: existing.type_name(),
                    found: value.type_name(),
                }),
            },
        }
    }

    /// Remove `key`. Fails if it is absent.
    pub fn delete(&mut self, key: &str) -> PropertyResult<()> {
        self.entries
            .shift_remove(key)
            .map(|_| ())
            .ok_or_else(|| PropertyError::KeyNotFound(key.to_string()))
    }

    /// Remove and return the value under `key`.
    pub fn pop(&mut self, key: &str) -> Option<PropArray> {
        self.entries.shift_remove(key)
    }

    /// Remove and return the value under `key`, or `default` if absent.
    pub fn pop_or(&mut self, key: &str, default: PropArray) -> PropArray {
        self.pop(key).unwrap_or(default)
    }

    /// Return the value under `key`, inserting `default` first if absent.
    ///
    /// Without a default the inserted value is the integer `0`.
    pub fn setdefault(
        &mut self,
        key: &str,
        default: Option<PropArray>,
    ) -> PropertyResult<&PropArray> {
        if !self.entries.contains_key(key) {
            self.set(key, default.unwrap_or(PropArray::Int(vec![0])))?;
        }
        self.require(key)
    }

    /// Remove and return the most recently inserted entry.
    pub fn popitem(&mut self) -> PropertyResult<(String, PropArray)> {
        self.entries.pop().ok_or(PropertyError::Empty)
    }

    /// Remove every key.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy every entry of `other` into this map, overwriting existing keys.
    pub fn merge_from(&mut self, other: &PropertyMap) {
        for (key, value) in other.entries.iter() {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Debug for PropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duration_map() -> PropertyMap {
        let mut map = PropertyMap::new();
        map.set_int("_DurationDen", 24).unwrap();
        map.set_int("_DurationNum", 1).unwrap();
        map
    }

    #[test]
    fn test_insertion_order() {
        let map = duration_map();
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["_DurationDen", "_DurationNum"]);
        assert_eq!(map.get_int("_DurationDen", 0).unwrap(), 24);
    }

    #[test]
    fn test_typed_access_errors() {
        let map = duration_map();
        assert!(matches!(
            map.get_float("_DurationDen", 0),
            Err(PropertyError::TypeMismatch { expected: "float", found: "int", .. })
        ));
        assert!(matches!(
            map.get_int("Missing", 0),
            Err(PropertyError::KeyNotFound(_))
        ));
        assert!(matches!(
            map.get_int("_DurationDen", 1),
            Err(PropertyError::IndexOutOfBounds { len: 1, .. })
        ));
    }

    #[test]
    fn test_pop_and_popitem() {
        let mut map = duration_map();
        assert_eq!(map.pop("_DurationDen"), Some(PropArray::Int(vec![24])));
        assert_eq!(map.pop("_DurationDen"), None);
        let (key, value) = map.popitem().unwrap();
        assert_eq!(key, "_DurationNum");
        assert_eq!(value, PropArray::Int(vec![1]));
        assert_eq!(map.popitem(), Err(PropertyError::Empty));
    }

    #[test]
    fn test_defaulting_access() {
        let mut map = duration_map();
        assert_eq!(map.get_or("_DurationDen", PropArray::from(7)), PropArray::Int(vec![24]));
        assert_eq!(map.get_or("_Missing", PropArray::from(7)), PropArray::Int(vec![7]));
        assert_eq!(map.len(), 2);

        assert_eq!(map.pop_or("_DurationDen", PropArray::from(7)), PropArray::Int(vec![24]));
        assert_eq!(map.pop_or("_DurationDen", PropArray::from(7)), PropArray::Int(vec![7]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_setdefault() {
        let mut map = duration_map();
        assert_eq!(
            map.setdefault("_DurationDen", Some(PropArray::from(5))).unwrap(),
            &PropArray::Int(vec![24])
        );
        assert_eq!(
            map.setdefault("test", None).unwrap(),
            &PropArray::Int(vec![0])
        );
        assert_eq!(
            map.setdefault("test2", Some(PropArray::from("abc"))).unwrap(),
            &PropArray::Data(vec![b"abc".to_vec()])
        );
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_delete() {
        let mut map = duration_map();
        map.delete("_DurationNum").unwrap();
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key("_DurationNum"));
        assert!(matches!(
            map.delete("_DurationNum"),
            Err(PropertyError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_append_type_checked() {
        let mut map = PropertyMap::new();
        map.append("v", 1i64).unwrap();
        map.append("v", 2i64).unwrap();
        assert_eq!(map.get_int_array("v").unwrap(), &[1, 2]);
        assert!(map.append("v", 1.5f64).is_err());
    }

    #[test]
    fn test_invalid_keys() {
        let mut map = PropertyMap::new();
        assert!(map.set_int("1abc", 1).is_err());
        assert!(map.set_int("has space", 1).is_err());
        assert!(map.set_int("", 1).is_err());
        assert!(map.set_int("_ok_1", 1).is_ok());
    }

    #[test]
    fn test_strings_are_stored_as_data() {
        let mut map = PropertyMap::new();
        map.set("expr", vec!["x 2 *", ""]).unwrap();
        assert_eq!(map.get_str_array("expr").unwrap(), vec!["x 2 *", ""]);
        assert_eq!(map.get_data("expr", 0).unwrap(), b"x 2 *");
    }
}
