/*!
 * Core data types for Tangoflow.
 *
 * Values travelling between device servers and signals, together with the
 * reading and descriptor records handed to data-acquisition consumers.
 */
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Operating state reported by a device server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DevState {
    /// Device is on
    On,
    /// Device is off
    Off,
    /// Device is closed
    Close,
    /// Device is open
    Open,
    /// Device is inserted
    Insert,
    /// Device is extracted
    Extract,
    /// Device is moving
    Moving,
    /// Device is in standby
    Standby,
    /// Device is faulty
    Fault,
    /// Device is initialising
    Init,
    /// Device is running
    Running,
    /// Device is in alarm
    Alarm,
    /// Device is disabled
    Disable,
    /// State is unknown
    Unknown,
}

impl DevState {
    /// Upper-case name as reported by the device server
    pub fn as_str(&self) -> &'static str {
        match self {
            DevState::On => "ON",
            DevState::Off => "OFF",
            DevState::Close => "CLOSE",
            DevState::Open => "OPEN",
            DevState::Insert => "INSERT",
            DevState::Extract => "EXTRACT",
            DevState::Moving => "MOVING",
            DevState::Standby => "STANDBY",
            DevState::Fault => "FAULT",
            DevState::Init => "INIT",
            DevState::Running => "RUNNING",
            DevState::Alarm => "ALARM",
            DevState::Disable => "DISABLE",
            DevState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DevState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let state = match s.to_ascii_uppercase().as_str() {
            "ON" => DevState::On,
            "OFF" => DevState::Off,
            "CLOSE" => DevState::Close,
            "OPEN" => DevState::Open,
            "INSERT" => DevState::Insert,
            "EXTRACT" => DevState::Extract,
            "MOVING" => DevState::Moving,
            "STANDBY" => DevState::Standby,
            "FAULT" => DevState::Fault,
            "INIT" => DevState::Init,
            "RUNNING" => DevState::Running,
            "ALARM" => DevState::Alarm,
            "DISABLE" => DevState::Disable,
            "UNKNOWN" => DevState::Unknown,
            other => return Err(Error::validation(format!("Unknown device state: {}", other))),
        };
        Ok(state)
    }
}

/// One named entry of a pipe blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeRecord {
    /// Record name
    pub name: String,
    /// Record value
    pub value: Value,
}

impl PipeRecord {
    /// Create a new pipe record
    pub fn new<S: Into<String>, V: Into<Value>>(name: S, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Structured pipe payload: a blob name plus its records
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipeData {
    /// Blob name
    pub name: String,
    /// Records in the blob
    pub records: Vec<PipeRecord>,
}

impl PipeData {
    /// Create an empty blob with the given name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }

    /// Append a record
    pub fn with_record<S: Into<String>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        self.records.push(PipeRecord::new(name, value));
        self
    }

    /// Look up a record value by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.records.iter().find(|r| r.name == name).map(|r| &r.value)
    }
}

/// A value read from or written to a device endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value, also the result of commands without output
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Device state
    State(DevState),
    /// Array of values; nested once for images
    Array(Vec<Value>),
    /// Pipe blob
    Pipe(PipeData),
    /// Binary data
    Binary(Vec<u8>),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is numeric (integer or float)
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get a float value; integers are widened
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a device state
    pub fn as_state(&self) -> Option<DevState> {
        match self {
            Value::State(s) => Some(*s),
            _ => None,
        }
    }

    /// Try to get an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get a pipe blob
    pub fn as_pipe(&self) -> Option<&PipeData> {
        match self {
            Value::Pipe(p) => Some(p),
            _ => None,
        }
    }

    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::State(_) => "state",
            Value::Array(_) => "array",
            Value::Pipe(_) => "pipe",
            Value::Binary(_) => "binary",
        }
    }

    /// Infer the descriptor dtype of this value
    ///
    /// Null, binary, and pipe values have no scalar dtype and are rejected.
    pub fn dtype(&self) -> Result<Dtype> {
        match self {
            Value::Float(_) => Ok(Dtype::Number),
            Value::Integer(_) => Ok(Dtype::Integer),
            Value::Array(_) => Ok(Dtype::Array),
            Value::String(_) | Value::State(_) => Ok(Dtype::String),
            Value::Bool(_) => Ok(Dtype::Boolean),
            other => Err(Error::validation(format!(
                "Unsupported value type {} for descriptor",
                other.type_name()
            ))),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::State(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Pipe(p) => write!(f, "<pipe {} ({} records)>", p.name, p.records.len()),
            Value::Binary(b) => write!(f, "<binary {} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DevState> for Value {
    fn from(s: DevState) -> Self {
        Value::State(s)
    }
}

impl From<PipeData> for Value {
    fn from(p: PipeData) -> Self {
        Value::Pipe(p)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Data-type tag of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Floating-point number
    Number,
    /// Integer
    Integer,
    /// Array (spectrum, image, or pipe blob)
    Array,
    /// String or device state
    String,
    /// Boolean
    Boolean,
}

impl Dtype {
    /// Tag as written into descriptors
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Number => "number",
            Dtype::Integer => "integer",
            Dtype::Array => "array",
            Dtype::String => "string",
            Dtype::Boolean => "boolean",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value with the time it was taken, in seconds since the Unix epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// The value
    pub value: Value,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl Reading {
    /// Create a new reading
    pub fn new<V: Into<Value>>(value: V, timestamp: f64) -> Self {
        Self {
            value: value.into(),
            timestamp,
        }
    }
}

/// Shape, type, and origin of a signal's data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Dimensions; empty for scalars
    pub shape: Vec<usize>,
    /// Data type
    pub dtype: Dtype,
    /// Source locator
    pub source: String,
}

impl Descriptor {
    /// Create a new descriptor
    pub fn new<S: Into<String>>(shape: Vec<usize>, dtype: Dtype, source: S) -> Self {
        Self {
            shape,
            dtype,
            source: source.into(),
        }
    }
}

/// Derive a descriptor shape from reported x/y dimensions
///
/// Images report both dimensions, spectra only `dim_x`, scalars neither.
pub fn shape_from_dims(dim_x: usize, dim_y: usize) -> Vec<usize> {
    if dim_y > 0 {
        let mut shape = Vec::with_capacity(2);
        if dim_x > 0 {
            shape.push(dim_x);
        }
        shape.push(dim_y);
        shape
    } else if dim_x > 1 {
        vec![dim_x]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_inference() {
        assert_eq!(Value::Float(1.5).dtype().unwrap(), Dtype::Number);
        assert_eq!(Value::Integer(3).dtype().unwrap(), Dtype::Integer);
        assert_eq!(Value::from(vec![1.0, 2.0]).dtype().unwrap(), Dtype::Array);
        assert_eq!(Value::from("abc").dtype().unwrap(), Dtype::String);
        assert_eq!(Value::State(DevState::Moving).dtype().unwrap(), Dtype::String);
        assert_eq!(Value::Bool(true).dtype().unwrap(), Dtype::Boolean);
        assert!(matches!(Value::Null.dtype(), Err(Error::Validation(_))));
        assert!(Value::Binary(vec![1, 2]).dtype().is_err());
    }

    #[test]
    fn test_shape_from_dims() {
        assert_eq!(shape_from_dims(1, 0), Vec::<usize>::new());
        assert_eq!(shape_from_dims(0, 0), Vec::<usize>::new());
        assert_eq!(shape_from_dims(5, 0), vec![5]);
        assert_eq!(shape_from_dims(4, 3), vec![4, 3]);
        assert_eq!(shape_from_dims(0, 3), vec![3]);
    }

    #[test]
    fn test_dev_state_parse() {
        assert_eq!("moving".parse::<DevState>().unwrap(), DevState::Moving);
        assert_eq!(DevState::Standby.to_string(), "STANDBY");
        assert!("sideways".parse::<DevState>().is_err());
    }

    #[test]
    fn test_pipe_data() {
        let blob = PipeData::new("blob")
            .with_record("a", 1)
            .with_record("b", "two");
        assert_eq!(blob.records.len(), 2);
        assert_eq!(blob.get("b"), Some(&Value::from("two")));
        assert_eq!(blob.get("c"), None);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Integer(2).as_float(), Some(2.0));
        assert_eq!(Value::Float(2.5).as_integer(), None);
        assert_eq!(Value::State(DevState::On).as_state(), Some(DevState::On));
        assert_eq!(Value::from(vec![1, 2]).as_array().map(|a| a.len()), Some(2));
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = Descriptor::new(vec![2], Dtype::Array, "tango://host:1/dev:pipe(Pipe)");
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["dtype"], "array");
        assert_eq!(json["shape"], serde_json::json!([2]));
    }
}
