//! Read-only accessors for incoming values

use super::{Value, ValueType};
use crate::error::ValueError;
use std::collections::BTreeMap;

fn expect_number(value: &Value) -> Result<f64, ValueError> {
    value
        .as_f64()
        .ok_or_else(|| ValueError::unexpected(ValueType::Number, value.value_type()))
}

fn expect_bool(value: &Value) -> Result<bool, ValueError> {
    value
        .as_bool()
        .ok_or_else(|| ValueError::unexpected(ValueType::Boolean, value.value_type()))
}

fn expect_str(value: &Value) -> Result<&str, ValueError> {
    value
        .as_str()
        .ok_or_else(|| ValueError::unexpected(ValueType::String, value.value_type()))
}

fn expect_array(value: &Value) -> Result<ReadableArray, ValueError> {
    match value {
        Value::Array(items) => Ok(ReadableArray::new(items.clone())),
        other => Err(ValueError::unexpected(ValueType::Array, other.value_type())),
    }
}

fn expect_map(value: &Value) -> Result<ReadableMap, ValueError> {
    match value {
        Value::Map(entries) => Ok(ReadableMap::new(entries.clone())),
        other => Err(ValueError::unexpected(ValueType::Map, other.value_type())),
    }
}

/// Numbers arrive as doubles; ints are recovered with a truncating cast.
fn truncate_to_int(n: f64) -> i32 {
    n as i32
}

/// Incoming array
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadableArray {
    items: Vec<Value>,
}

impl ReadableArray {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Raw access to one element
    pub fn get(&self, index: usize) -> Result<&Value, ValueError> {
        self.items.get(index).ok_or(ValueError::IndexOutOfBounds {
            index,
            len: self.items.len(),
        })
    }

    pub fn is_null(&self, index: usize) -> Result<bool, ValueError> {
        Ok(self.get(index)?.is_null())
    }

    pub fn get_type(&self, index: usize) -> Result<ValueType, ValueError> {
        Ok(self.get(index)?.value_type())
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, ValueError> {
        expect_bool(self.get(index)?)
    }

    pub fn get_double(&self, index: usize) -> Result<f64, ValueError> {
        expect_number(self.get(index)?)
    }

    pub fn get_int(&self, index: usize) -> Result<i32, ValueError> {
        self.get_double(index).map(truncate_to_int)
    }

    pub fn get_string(&self, index: usize) -> Result<&str, ValueError> {
        expect_str(self.get(index)?)
    }

    pub fn get_array(&self, index: usize) -> Result<ReadableArray, ValueError> {
        expect_array(self.get(index)?)
    }

    pub fn get_map(&self, index: usize) -> Result<ReadableMap, ValueError> {
        expect_map(self.get(index)?)
    }

    pub fn get_dynamic(&self, index: usize) -> Result<Dynamic, ValueError> {
        self.get(index).map(|value| Dynamic::new(value.clone()))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }
}

impl From<Vec<Value>> for ReadableArray {
    fn from(items: Vec<Value>) -> Self {
        Self::new(items)
    }
}

impl<'a> IntoIterator for &'a ReadableArray {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Incoming string-keyed map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadableMap {
    entries: BTreeMap<String, Value>,
}

impl ReadableMap {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&Value, ValueError> {
        self.entries
            .get(key)
            .ok_or_else(|| ValueError::NoSuchKey(key.to_string()))
    }

    pub fn is_null(&self, key: &str) -> Result<bool, ValueError> {
        Ok(self.get(key)?.is_null())
    }

    pub fn get_type(&self, key: &str) -> Result<ValueType, ValueError> {
        Ok(self.get(key)?.value_type())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ValueError> {
        expect_bool(self.get(key)?)
    }

    pub fn get_double(&self, key: &str) -> Result<f64, ValueError> {
        expect_number(self.get(key)?)
    }

    pub fn get_int(&self, key: &str) -> Result<i32, ValueError> {
        self.get_double(key).map(truncate_to_int)
    }

    pub fn get_string(&self, key: &str) -> Result<&str, ValueError> {
        expect_str(self.get(key)?)
    }

    pub fn get_array(&self, key: &str) -> Result<ReadableArray, ValueError> {
        expect_array(self.get(key)?)
    }

    pub fn get_map(&self, key: &str) -> Result<ReadableMap, ValueError> {
        expect_map(self.get(key)?)
    }

    pub fn get_dynamic(&self, key: &str) -> Result<Dynamic, ValueError> {
        self.get(key).map(|value| Dynamic::new(value.clone()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.entries
    }
}

impl From<BTreeMap<String, Value>> for ReadableMap {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::new(entries)
    }
}

/// A value whose type is only known at runtime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dynamic {
    value: Value,
}

impl Dynamic {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn get_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        expect_bool(&self.value)
    }

    pub fn as_double(&self) -> Result<f64, ValueError> {
        expect_number(&self.value)
    }

    pub fn as_int(&self) -> Result<i32, ValueError> {
        self.as_double().map(truncate_to_int)
    }

    pub fn as_string(&self) -> Result<&str, ValueError> {
        expect_str(&self.value)
    }

    pub fn as_array(&self) -> Result<ReadableArray, ValueError> {
        expect_array(&self.value)
    }

    pub fn as_map(&self) -> Result<ReadableMap, ValueError> {
        expect_map(&self.value)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}
