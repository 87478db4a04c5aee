//! Metric descriptors: value type, semantics, instance domain and units.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{InDom, Pmid};

/// Storage type of a metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    I32,
    U32,
    I64,
    U64,
    Float,
    Double,
    String,
    /// Opaque byte aggregate.
    Aggregate,
    /// Packed event records.
    Event,
}

impl ValueType {
    pub fn code(self) -> u8 {
        match self {
            ValueType::I32 => 0,
            ValueType::U32 => 1,
            ValueType::I64 => 2,
            ValueType::U64 => 3,
            ValueType::Float => 4,
            ValueType::Double => 5,
            ValueType::String => 6,
            ValueType::Aggregate => 7,
            ValueType::Event => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ValueType::I32,
            1 => ValueType::U32,
            2 => ValueType::I64,
            3 => ValueType::U64,
            4 => ValueType::Float,
            5 => ValueType::Double,
            6 => ValueType::String,
            7 => ValueType::Aggregate,
            9 => ValueType::Event,
            _ => return None,
        })
    }

    /// Numeric types can be blended during interpolation.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            ValueType::I32
                | ValueType::U32
                | ValueType::I64
                | ValueType::U64
                | ValueType::Float
                | ValueType::Double
        )
    }

    /// Encoded size for fixed-width types.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ValueType::I32 | ValueType::U32 | ValueType::Float => Some(4),
            ValueType::I64 | ValueType::U64 | ValueType::Double => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "32",
            ValueType::U32 => "U32",
            ValueType::I64 => "64",
            ValueType::U64 => "U64",
            ValueType::Float => "FLOAT",
            ValueType::Double => "DOUBLE",
            ValueType::String => "STRING",
            ValueType::Aggregate => "AGGREGATE",
            ValueType::Event => "EVENT",
        };
        f.write_str(name)
    }
}

/// How successive values of a metric relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Semantics {
    /// Monotonically increasing count.
    Counter,
    /// Point-in-time measurement.
    Instant,
    /// Changes rarely; holds its value between samples.
    Discrete,
}

impl Semantics {
    pub fn code(self) -> i32 {
        match self {
            Semantics::Counter => 1,
            Semantics::Instant => 3,
            Semantics::Discrete => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Semantics::Counter),
            3 => Some(Semantics::Instant),
            4 => Some(Semantics::Discrete),
            _ => None,
        }
    }
}

impl fmt::Display for Semantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Semantics::Counter => "counter",
            Semantics::Instant => "instant",
            Semantics::Discrete => "discrete",
        };
        f.write_str(name)
    }
}

/// Dimensions and scales of a metric's values.
///
/// Packed on the wire as eight 4-bit fields:
/// `dim_space dim_time dim_count scale_space scale_time scale_count pad pad`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Units {
    pub dim_space: i8,
    pub dim_time: i8,
    pub dim_count: i8,
    pub scale_space: u8,
    pub scale_time: u8,
    pub scale_count: i8,
}

pub const SPACE_BYTE: u8 = 0;
pub const SPACE_KBYTE: u8 = 1;
pub const TIME_NSEC: u8 = 0;
pub const TIME_MSEC: u8 = 2;
pub const TIME_SEC: u8 = 3;

impl Units {
    pub const NONE: Units = Units {
        dim_space: 0,
        dim_time: 0,
        dim_count: 0,
        scale_space: 0,
        scale_time: 0,
        scale_count: 0,
    };

    pub fn count() -> Self {
        Units {
            dim_count: 1,
            ..Units::NONE
        }
    }

    pub fn bytes(scale: u8) -> Self {
        Units {
            dim_space: 1,
            scale_space: scale,
            ..Units::NONE
        }
    }

    pub fn time(scale: u8) -> Self {
        Units {
            dim_time: 1,
            scale_time: scale,
            ..Units::NONE
        }
    }

    pub fn pack(self) -> u32 {
        let nibble = |v: i8| (v as u32) & 0xf;
        (nibble(self.dim_space) << 28)
            | (nibble(self.dim_time) << 24)
            | (nibble(self.dim_count) << 20)
            | ((self.scale_space as u32 & 0xf) << 16)
            | ((self.scale_time as u32 & 0xf) << 12)
            | (nibble(self.scale_count) << 8)
    }

    pub fn unpack(raw: u32) -> Self {
        // 4-bit two's complement
        let signed = |v: u32| {
            let v = (v & 0xf) as i8;
            if v & 0x8 != 0 { v - 16 } else { v }
        };
        Units {
            dim_space: signed(raw >> 28),
            dim_time: signed(raw >> 24),
            dim_count: signed(raw >> 20),
            scale_space: ((raw >> 16) & 0xf) as u8,
            scale_time: ((raw >> 12) & 0xf) as u8,
            scale_count: signed(raw >> 8),
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SPACE: [&str; 7] = ["byte", "Kbyte", "Mbyte", "Gbyte", "Tbyte", "Pbyte", "Ebyte"];
        const TIME: [&str; 6] = ["nsec", "usec", "msec", "sec", "min", "hour"];

        let space = SPACE.get(self.scale_space as usize).copied().unwrap_or("?byte");
        let time = TIME.get(self.scale_time as usize).copied().unwrap_or("?sec");
        let count = if self.scale_count == 0 {
            "count".to_string()
        } else {
            format!("count x 10^{}", self.scale_count)
        };

        let mut num = Vec::new();
        let mut den = Vec::new();
        for (dim, name) in [
            (self.dim_space, space.to_string()),
            (self.dim_time, time.to_string()),
            (self.dim_count, count),
        ] {
            let term = |d: i8| {
                if d.abs() == 1 {
                    name.clone()
                } else {
                    format!("{}^{}", name, d.abs())
                }
            };
            if dim > 0 {
                num.push(term(dim));
            } else if dim < 0 {
                den.push(term(dim));
            }
        }

        match (num.is_empty(), den.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => write!(f, "{}", num.join(" ")),
            (true, false) => write!(f, "/ {}", den.join(" ")),
            (false, false) => write!(f, "{} / {}", num.join(" "), den.join(" ")),
        }
    }
}

/// Metric descriptor. Looked up once per PMID per context and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Desc {
    pub pmid: Pmid,
    pub value_type: ValueType,
    pub indom: InDom,
    pub semantics: Semantics,
    pub units: Units,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_pack_round_trip() {
        let units = Units {
            dim_space: 1,
            dim_time: -1,
            dim_count: 0,
            scale_space: SPACE_KBYTE,
            scale_time: TIME_SEC,
            scale_count: 0,
        };
        assert_eq!(Units::unpack(units.pack()), units);
        assert_eq!(units.to_string(), "Kbyte / sec");
    }

    #[test]
    fn test_units_display_count() {
        assert_eq!(Units::count().to_string(), "count");
        assert_eq!(Units::NONE.to_string(), "");
        assert_eq!(Units::time(TIME_MSEC).to_string(), "msec");
    }

    #[test]
    fn test_value_type_codes() {
        for vt in [
            ValueType::I32,
            ValueType::U64,
            ValueType::Double,
            ValueType::String,
            ValueType::Event,
        ] {
            assert_eq!(ValueType::from_code(vt.code()), Some(vt));
        }
        assert_eq!(ValueType::from_code(8), None);
        assert!(ValueType::Float.is_arithmetic());
        assert!(!ValueType::Aggregate.is_arithmetic());
    }
}
