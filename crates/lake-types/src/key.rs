//! Sort keys, spans and ordering.
//!
//! A pool sorts its rows by one field. [`Key`] is the value of that field
//! lifted into a totally ordered domain so that data objects can carry
//! min/max bounds and reads can be planned by range overlap.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// A totally ordered sort-key value.
///
/// Ordering across kinds: `Null < Bool < Int/Float < Str`. Integers and
/// floats compare numerically; when numerically equal an `Int` sorts before a
/// `Float`. Floats use IEEE total ordering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Key {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Key {
    /// Lift a JSON value into a key. Arrays and objects have no natural
    /// order and map to their canonical JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Key::Null,
            Value::Bool(b) => Key::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Key::Int(i),
                None => Key::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Key::Str(s.clone()),
            other => Key::Str(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Null => 0,
            Key::Bool(_) => 1,
            Key::Int(_) | Key::Float(_) => 2,
            Key::Str(_) => 3,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Null, Key::Null) => Ordering::Equal,
            (Key::Bool(a), Key::Bool(b)) => a.cmp(b),
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => a.total_cmp(b),
            (Key::Int(a), Key::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Key::Float(a), Key::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Key::Str(a), Key::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => write!(f, "null"),
            Key::Bool(b) => write!(f, "{b}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Float(x) => write!(f, "{x}"),
            Key::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_string())
    }
}

/// Sort direction of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => write!(f, "asc"),
            Order::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for Order {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            _ => Err(TypeError::InvalidOrder(s.to_string())),
        }
    }
}

/// The field a pool is sorted by, and in which direction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: Order,
}

impl SortKey {
    pub fn new(field: impl Into<String>, order: Order) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    /// Extract this sort key from a JSON record. Missing fields are `Null`.
    pub fn key_of(&self, record: &serde_json::Map<String, Value>) -> Key {
        record.get(&self.field).map(Key::from_json).unwrap_or(Key::Null)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.order)
    }
}

/// An inclusive range of keys.
///
/// `first` and `last` may be given in either order; the span is normalized
/// on construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub first: Key,
    pub last: Key,
}

impl Span {
    pub fn new(a: Key, b: Key) -> Self {
        if a <= b {
            Self { first: a, last: b }
        } else {
            Self { first: b, last: a }
        }
    }

    /// Returns `true` if `[min, max]` intersects this span.
    pub fn overlaps(&self, min: &Key, max: &Key) -> bool {
        min <= &self.last && max >= &self.first
    }

    pub fn contains(&self, key: &Key) -> bool {
        key >= &self.first && key <= &self.last
    }
}
