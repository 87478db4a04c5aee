//! Timestamps, typed values and fetch results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::desc::ValueType;
use super::ids::Pmid;
use crate::error::ErrorKind;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Instance id used by singular metrics (null InDom).
pub const IN_NULL: i32 = -1;

/// Wall-clock time with nanosecond resolution.
///
/// `nsec` is always normalized to `0..1_000_000_000`, so the derived
/// ordering is chronological.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: u32) -> Self {
        Self::from_nanos(sec as i128 * NANOS_PER_SEC + nsec as i128)
    }

    pub fn from_secs(sec: i64) -> Self {
        Timestamp { sec, nsec: 0 }
    }

    pub fn now() -> Self {
        let now = Utc::now();
        Timestamp {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos(),
        }
    }

    pub fn as_nanos(self) -> i128 {
        self.sec as i128 * NANOS_PER_SEC + self.nsec as i128
    }

    pub fn from_nanos(nanos: i128) -> Self {
        Timestamp {
            sec: nanos.div_euclid(NANOS_PER_SEC) as i64,
            nsec: nanos.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    /// Shifts by a signed number of nanoseconds.
    pub fn offset_by(self, nanos: i64) -> Self {
        Self::from_nanos(self.as_nanos() + nanos as i128)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.sec as f64 + self.nsec as f64 / 1e9
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.sec, self.nsec)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
            None => write!(f, "{}.{:09}", self.sec, self.nsec),
        }
    }
}

/// A single typed metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Aggregate(Vec<u8>),
    Event(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::U32(_) => ValueType::U32,
            Value::I64(_) => ValueType::I64,
            Value::U64(_) => ValueType::U64,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Aggregate(_) => ValueType::Aggregate,
            Value::Event(_) => ValueType::Event,
        }
    }

    /// Numeric view of the value, `None` for strings and blobs.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::I32(v) => Some(v as f64),
            Value::U32(v) => Some(v as f64),
            Value::I64(v) => Some(v as f64),
            Value::U64(v) => Some(v as f64),
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Exact integer view, `None` for floating point and non-numeric values.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::I32(v) => Some(v as i128),
            Value::U32(v) => Some(v as i128),
            Value::I64(v) => Some(v as i128),
            Value::U64(v) => Some(v as i128),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Aggregate(b) => write!(f, "[aggregate {} bytes]", b.len()),
            Value::Event(b) => write!(f, "[event records {} bytes]", b.len()),
        }
    }
}

/// One (instance, value) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceValue {
    pub inst: i32,
    pub value: Value,
}

impl InstanceValue {
    pub fn new(inst: i32, value: Value) -> Self {
        Self { inst, value }
    }
}

/// Per-PMID slot of a [`FetchResult`]: either values or a status.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSet {
    pub pmid: Pmid,
    pub values: Result<Vec<InstanceValue>, ErrorKind>,
}

impl ValueSet {
    pub fn new(pmid: Pmid, values: Vec<InstanceValue>) -> Self {
        Self {
            pmid,
            values: Ok(values),
        }
    }

    pub fn error(pmid: Pmid, kind: ErrorKind) -> Self {
        Self {
            pmid,
            values: Err(kind),
        }
    }

    pub fn empty(pmid: Pmid) -> Self {
        Self::new(pmid, Vec::new())
    }

    /// Number of values, or the negative status code.
    pub fn status_code(&self) -> i32 {
        match &self.values {
            Ok(v) => v.len() as i32,
            Err(kind) => kind.code(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.values.is_err()
    }

    pub fn value_of(&self, inst: i32) -> Option<&Value> {
        self.values
            .as_ref()
            .ok()?
            .iter()
            .find(|iv| iv.inst == inst)
            .map(|iv| &iv.value)
    }
}

/// A timestamped, ordered collection of value sets.
///
/// A result with no value sets is a mark: a gap in an archive, e.g. a
/// collector restart.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub timestamp: Timestamp,
    pub vsets: Vec<ValueSet>,
}

impl FetchResult {
    pub fn new(timestamp: Timestamp, vsets: Vec<ValueSet>) -> Self {
        Self { timestamp, vsets }
    }

    pub fn mark(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            vsets: Vec::new(),
        }
    }

    pub fn is_mark(&self) -> bool {
        self.vsets.is_empty()
    }

    pub fn get(&self, pmid: Pmid) -> Option<&ValueSet> {
        self.vsets.iter().find(|vs| vs.pmid == pmid)
    }

    pub fn pmids(&self) -> Vec<Pmid> {
        self.vsets.iter().map(|vs| vs.pmid).collect()
    }
}
