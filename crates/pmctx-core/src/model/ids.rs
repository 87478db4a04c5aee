//! Packed metric and instance-domain identifiers.
//!
//! ```text
//! PMID   │ flag:1 │ domain:9 │ cluster:12 │ item:10 │
//! InDom  │ flag:1 │ domain:9 │ serial:22            │
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DOMAIN_MASK: u32 = 0x1ff;
const CLUSTER_MASK: u32 = 0xfff;
const ITEM_MASK: u32 = 0x3ff;
const SERIAL_MASK: u32 = 0x3f_ffff;

/// Error returned when parsing a dotted identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError(String);

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identifier '{}'", self.0)
    }
}

impl std::error::Error for ParseIdError {}

/// Metric identifier: (domain, cluster, item) packed into 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pmid(u32);

impl Pmid {
    pub const NULL: Pmid = Pmid(0xffff_ffff);

    pub fn new(domain: u32, cluster: u32, item: u32) -> Self {
        Pmid(((domain & DOMAIN_MASK) << 22) | ((cluster & CLUSTER_MASK) << 10) | (item & ITEM_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Pmid(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Domain selects the owning agent.
    pub fn domain(self) -> u32 {
        (self.0 >> 22) & DOMAIN_MASK
    }

    pub fn cluster(self) -> u32 {
        (self.0 >> 10) & CLUSTER_MASK
    }

    pub fn item(self) -> u32 {
        self.0 & ITEM_MASK
    }
}

impl fmt::Display for Pmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Pmid::NULL {
            return f.write_str("PM_ID_NULL");
        }
        write!(f, "{}.{}.{}", self.domain(), self.cluster(), self.item())
    }
}

impl FromStr for Pmid {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = parse_dotted(s, 3)?;
        if parts[0] > DOMAIN_MASK || parts[1] > CLUSTER_MASK || parts[2] > ITEM_MASK {
            return Err(ParseIdError(s.to_string()));
        }
        Ok(Pmid::new(parts[0], parts[1], parts[2]))
    }
}

/// Instance domain identifier: (domain, serial) packed into 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InDom(u32);

impl InDom {
    /// Singular metrics (exactly one value) carry the null InDom.
    pub const NULL: InDom = InDom(0xffff_ffff);

    pub fn new(domain: u32, serial: u32) -> Self {
        InDom(((domain & DOMAIN_MASK) << 22) | (serial & SERIAL_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        InDom(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self == InDom::NULL
    }

    pub fn domain(self) -> u32 {
        (self.0 >> 22) & DOMAIN_MASK
    }

    pub fn serial(self) -> u32 {
        self.0 & SERIAL_MASK
    }
}

impl fmt::Display for InDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("PM_INDOM_NULL");
        }
        write!(f, "{}.{}", self.domain(), self.serial())
    }
}

impl FromStr for InDom {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = parse_dotted(s, 2)?;
        if parts[0] > DOMAIN_MASK || parts[1] > SERIAL_MASK {
            return Err(ParseIdError(s.to_string()));
        }
        Ok(InDom::new(parts[0], parts[1]))
    }
}

fn parse_dotted(s: &str, count: usize) -> Result<Vec<u32>, ParseIdError> {
    let parts: Vec<u32> = s
        .trim()
        .split('.')
        .map(|p| p.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| ParseIdError(s.to_string()))?;
    if parts.len() != count {
        return Err(ParseIdError(s.to_string()));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pmid_packing() {
        let pmid = Pmid::new(60, 1, 22);
        assert_eq!(pmid.domain(), 60);
        assert_eq!(pmid.cluster(), 1);
        assert_eq!(pmid.item(), 22);
        assert_eq!(pmid.to_string(), "60.1.22");
        assert_eq!("60.1.22".parse::<Pmid>().unwrap(), pmid);
    }

    #[test]
    fn test_pmid_parse_rejects_out_of_range() {
        assert!("512.0.0".parse::<Pmid>().is_err());
        assert!("1.2".parse::<Pmid>().is_err());
        assert!("a.b.c".parse::<Pmid>().is_err());
    }

    #[test]
    fn test_indom_packing() {
        let indom = InDom::new(60, 3);
        assert_eq!(indom.domain(), 60);
        assert_eq!(indom.serial(), 3);
        assert!(!indom.is_null());
        assert!(InDom::NULL.is_null());
        assert_eq!("60.3".parse::<InDom>().unwrap(), indom);
    }
}
