//! Small helpers shared by the library and the dump tool.

pub mod time_parser;

pub use time_parser::{TimeParseError, interval_nanos, parse_interval, parse_time, parse_time_with_base};
