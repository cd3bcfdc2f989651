//! Move-only builders for outgoing values
//!
//! A builder is consumed when it is attached to a parent or handed to the bridge.
//! Reuse after that point does not compile:
//!
//! ```compile_fail
//! use otter_bridge::value::WritableArray;
//!
//! let mut parent = WritableArray::new();
//! let mut child = WritableArray::new();
//! parent.push_array(child);
//! child.push_int(1);
//! ```
//!
//! ```compile_fail
//! use otter_bridge::value::{WritableArray, WritableMap};
//!
//! let mut first = WritableMap::new();
//! let mut second = WritableArray::new();
//! let child = WritableMap::new();
//! first.put_map("a", child);
//! second.push_map(child);
//! ```

use super::{ReadableArray, ReadableMap, Value};
use std::collections::BTreeMap;

/// Write side of an array crossing the boundary
#[derive(Debug, Default, PartialEq)]
#[must_use]
pub struct WritableArray {
    items: Vec<Value>,
}

impl WritableArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push_null(&mut self) {
        self.items.push(Value::Null);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.items.push(Value::Bool(value));
    }

    pub fn push_int(&mut self, value: i32) {
        self.items.push(Value::Number(f64::from(value)));
    }

    pub fn push_double(&mut self, value: f64) {
        self.items.push(Value::Number(value));
    }

    pub fn push_string(&mut self, value: impl Into<String>) {
        self.items.push(Value::String(value.into()));
    }

    /// Attach a child array, consuming it
    pub fn push_array(&mut self, child: WritableArray) {
        self.items.push(child.into_value());
    }

    /// Attach a child map, consuming it
    pub fn push_map(&mut self, child: WritableMap) {
        self.items.push(child.into_value());
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Array(self.items)
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }

    /// Freeze into the read side, as the receiving runtime would see it
    pub fn into_readable(self) -> ReadableArray {
        ReadableArray::new(self.items)
    }
}

impl From<Vec<Value>> for WritableArray {
    fn from(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl FromIterator<Value> for WritableArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl From<WritableArray> for Value {
    fn from(array: WritableArray) -> Self {
        array.into_value()
    }
}

/// Write side of a string-keyed map crossing the boundary
#[derive(Debug, Default, PartialEq)]
#[must_use]
pub struct WritableMap {
    entries: BTreeMap<String, Value>,
}

impl WritableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_null(&mut self, key: impl Into<String>) {
        self.entries.insert(key.into(), Value::Null);
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) {
        self.entries.insert(key.into(), Value::Bool(value));
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) {
        self.entries
            .insert(key.into(), Value::Number(f64::from(value)));
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) {
        self.entries.insert(key.into(), Value::Number(value));
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), Value::String(value.into()));
    }

    /// Attach a child array, consuming it
    pub fn put_array(&mut self, key: impl Into<String>, child: WritableArray) {
        self.entries.insert(key.into(), child.into_value());
    }

    /// Attach a child map, consuming it
    pub fn put_map(&mut self, key: impl Into<String>, child: WritableMap) {
        self.entries.insert(key.into(), child.into_value());
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Copy every entry of `source` into this map, overwriting existing keys
    pub fn merge(&mut self, source: &ReadableMap) {
        for (key, value) in source.entries() {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Map(self.entries)
    }

    pub fn into_readable(self) -> ReadableMap {
        ReadableMap::new(self.entries)
    }
}

impl From<BTreeMap<String, Value>> for WritableMap {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }
}

impl From<WritableMap> for Value {
    fn from(map: WritableMap) -> Self {
        map.into_value()
    }
}

/// Build a [`WritableArray`] from a list of values
///
/// ```
/// let args = otter_bridge::array![1, "two", true];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! array {
    () => {
        $crate::value::WritableArray::new()
    };
    ($($item:expr),+ $(,)?) => {{
        let mut array = $crate::value::WritableArray::new();
        $( array.push($item); )+
        array
    }};
}

/// Build a [`WritableMap`] from `key => value` pairs
///
/// ```
/// let user_info = otter_bridge::map! { "retry" => false, "attempts" => 3 };
/// assert_eq!(user_info.len(), 2);
/// ```
#[macro_export]
macro_rules! map {
    () => {
        $crate::value::WritableMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::WritableMap::new();
        $( map.put($key, $value); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn test_nested_builders() {
        let mut inner = WritableMap::new();
        inner.put_string("name", "otter");
        let mut list = WritableArray::new();
        list.push_int(1);
        list.push_map(inner);

        let mut root = WritableMap::new();
        root.put_array("list", list);
        root.put_null("missing");

        let readable = root.into_readable();
        let list = readable.get_array("list").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_map(1).unwrap().get_string("name").unwrap(), "otter");
        assert_eq!(readable.get_type("missing").unwrap(), ValueType::Null);
    }

    #[test]
    fn test_macros() {
        let args = crate::array![1, 2.5, "s", crate::map! { "k" => true }];
        let values = args.into_vec();
        assert_eq!(values[0], Value::Number(1.0));
        assert_eq!(values[3].value_type(), ValueType::Map);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut target = crate::map! { "a" => 1, "b" => 2 };
        let source = crate::map! { "b" => 3, "c" => 4 }.into_readable();
        target.merge(&source);
        let merged = target.into_readable();
        assert_eq!(merged.get_int("b").unwrap(), 3);
        assert_eq!(merged.len(), 3);
    }
}
