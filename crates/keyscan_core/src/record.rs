use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::keyspace::Partition;

/// One remote object: a mandatory orderable key plus whatever else the
/// service chose to send back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub key: i64,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Record {
    pub fn new(key: i64) -> Self {
        Self {
            key,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    /// Reads a scalar field as text. Numbers are rendered, strings are
    /// returned without quotes, everything else is `None`.
    pub fn string_field(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    /// Reads an array field as a list of scalar strings, skipping anything
    /// that is not a string or number. Missing or non-array fields are empty.
    pub fn string_list(&self, field: &str) -> Vec<String> {
        match self.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text.clone()),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// `key` followed by every property name.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once("key").chain(self.properties.keys().map(String::as_str))
    }
}

/// Lower bound for the next page request inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub key: i64,
    pub inclusive: bool,
}

impl Cursor {
    pub fn start_of(partition: &Partition) -> Self {
        Self {
            key: partition.start,
            inclusive: true,
        }
    }

    /// Resume strictly after `key`.
    pub fn after(key: i64) -> Self {
        Self {
            key,
            inclusive: false,
        }
    }

    pub fn admits(&self, key: i64) -> bool {
        if self.inclusive {
            key >= self.key
        } else {
            key > self.key
        }
    }
}

/// Records returned by one fetch, in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    records: Vec<Record>,
}

impl Page {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A page smaller than requested means the window has nothing left.
    pub fn is_short(&self, page_size: u32) -> bool {
        self.records.len() < page_size as usize
    }

    pub fn last_key(&self) -> Option<i64> {
        self.records.last().map(|record| record.key)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for Page {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
